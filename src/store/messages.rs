//! MessageStore: in-memory, per-record-locked collection of triaged messages.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{GenerationError, StoreError};
use crate::pipeline::types::{
    ActionBucket, ActionableBuckets, Classification, DraftStatus, GenerationState, MessageRecord,
};

type Slot = Arc<Mutex<MessageRecord>>;

/// Authoritative store of message records.
///
/// The id index is built once in [`MessageStore::load`] and never mutated, so
/// lookups take no lock. Each record sits behind its own mutex; there is no
/// store-wide lock.
pub struct MessageStore {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
    actionable: ActionableBuckets,
}

/// Proof that the caller owns one in-flight generation attempt.
///
/// Dropping a permit while its own attempt is still `in_flight` (for instance
/// when the generating task is cancelled) releases the record to `failed`. A
/// permit from an earlier attempt never touches a later one.
#[derive(Debug)]
pub struct GenerationPermit {
    message_id: String,
    attempt: u64,
    slot: Slot,
}

impl GenerationPermit {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    fn is_live(&self, record: &MessageRecord) -> bool {
        record.generation == GenerationState::InFlight && record.generation_attempt == self.attempt
    }
}

impl Drop for GenerationPermit {
    fn drop(&mut self) {
        let mut record = self.slot.lock();
        if self.is_live(&record) {
            warn!(
                message_id = %self.message_id,
                attempt = self.attempt,
                "Generation abandoned while in flight"
            );
            record.generation = GenerationState::Failed {
                error: GenerationError::Cancelled,
            };
            record.updated_at = Utc::now();
        }
    }
}

/// Per-status record counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub unclassified: usize,
    pub not_actionable: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub drafted: usize,
    pub failed: usize,
}

impl MessageStore {
    /// Bulk-initialize the store. Load order is preserved for every listing.
    pub fn load(
        records: Vec<MessageRecord>,
        actionable: ActionableBuckets,
    ) -> Result<Self, StoreError> {
        let mut index = HashMap::with_capacity(records.len());
        let mut slots = Vec::with_capacity(records.len());
        for record in records {
            if index.contains_key(&record.message_id) {
                return Err(StoreError::DuplicateMessageId {
                    id: record.message_id,
                });
            }
            index.insert(record.message_id.clone(), slots.len());
            slots.push(Arc::new(Mutex::new(record)));
        }
        debug!(count = slots.len(), "Message store loaded");
        Ok(Self {
            slots,
            index,
            actionable,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn actionable(&self) -> &ActionableBuckets {
        &self.actionable
    }

    fn slot(&self, message_id: &str) -> Result<&Slot, StoreError> {
        self.index
            .get(message_id)
            .map(|&i| &self.slots[i])
            .ok_or_else(|| StoreError::NotFound {
                id: message_id.to_string(),
            })
    }

    /// Snapshot of one record.
    pub fn get(&self, message_id: &str) -> Result<MessageRecord, StoreError> {
        Ok(self.slot(message_id)?.lock().clone())
    }

    /// Snapshot of every record, in load order.
    pub fn all(&self) -> Vec<MessageRecord> {
        self.slots.iter().map(|s| s.lock().clone()).collect()
    }

    /// Records classified into `bucket`, in load order.
    pub fn list_by_bucket(&self, bucket: ActionBucket) -> Vec<MessageRecord> {
        self.slots
            .iter()
            .filter_map(|s| {
                let record = s.lock();
                (record.bucket() == Some(bucket)).then(|| record.clone())
            })
            .collect()
    }

    /// Ids of records that have not been classified, in load order.
    pub fn unclassified_ids(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter_map(|s| {
                let record = s.lock();
                record
                    .classification
                    .is_none()
                    .then(|| record.message_id.clone())
            })
            .collect()
    }

    /// Ids of actionable records whose draft has not been attempted, in load order.
    pub fn pending_draft_ids(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter_map(|s| {
                let record = s.lock();
                (record.draft_status(&self.actionable) == DraftStatus::Pending)
                    .then(|| record.message_id.clone())
            })
            .collect()
    }

    /// Set a record's bucket and confidence. Classification is write-once.
    pub fn update_classification(
        &self,
        message_id: &str,
        bucket: ActionBucket,
        confidence: f32,
    ) -> Result<(), StoreError> {
        self.commit_classifications(&[(message_id.to_string(), bucket, confidence)])
    }

    /// Apply a batch of classifications atomically.
    ///
    /// Every target is locked and validated before anything is written; if
    /// any entry is rejected no record changes. Entries are applied in the
    /// order given.
    pub fn commit_classifications(
        &self,
        results: &[(String, ActionBucket, f32)],
    ) -> Result<(), StoreError> {
        let mut positions = Vec::with_capacity(results.len());
        for (id, _, confidence) in results {
            if !(0.0..=1.0).contains(confidence) {
                return Err(StoreError::InvalidConfidence {
                    id: id.clone(),
                    value: *confidence,
                });
            }
            let position = *self
                .index
                .get(id)
                .ok_or_else(|| StoreError::NotFound { id: id.clone() })?;
            positions.push(position);
        }

        // Lock in slot order so concurrent batch commits cannot deadlock.
        let mut lock_order: Vec<usize> = (0..results.len()).collect();
        lock_order.sort_by_key(|&i| positions[i]);
        let mut guards: Vec<Option<parking_lot::MutexGuard<'_, MessageRecord>>> =
            (0..results.len()).map(|_| None).collect();
        let mut previous = None;
        for i in lock_order {
            if previous == Some(positions[i]) {
                return Err(StoreError::InvalidStateTransition {
                    id: results[i].0.clone(),
                    state: "listed twice in one batch".to_string(),
                    action: "classify",
                });
            }
            previous = Some(positions[i]);
            let guard = self.slots[positions[i]].lock();
            if let Some(existing) = &guard.classification {
                return Err(StoreError::InvalidStateTransition {
                    id: results[i].0.clone(),
                    state: format!("already classified as {}", existing.bucket),
                    action: "classify",
                });
            }
            guards[i] = Some(guard);
        }

        let now = Utc::now();
        for (guard, (id, bucket, confidence)) in guards.iter_mut().zip(results) {
            if let Some(record) = guard.as_mut() {
                record.classification = Some(Classification {
                    bucket: *bucket,
                    confidence: *confidence,
                    classified_at: now,
                });
                record.updated_at = now;
                debug!(message_id = %id, bucket = %bucket, confidence, "Message classified");
            }
        }
        Ok(())
    }

    /// Atomically move a record from `not_attempted` to `in_flight`.
    ///
    /// This is the only way a generation starts. Every caller that loses the
    /// race gets [`StoreError::AlreadyInFlight`].
    pub fn try_begin_generation(&self, message_id: &str) -> Result<GenerationPermit, StoreError> {
        let slot = self.slot(message_id)?;
        let mut record = slot.lock();
        match &record.generation {
            GenerationState::InFlight => {
                return Err(StoreError::AlreadyInFlight {
                    id: message_id.to_string(),
                });
            }
            GenerationState::NotAttempted => {}
            other => {
                return Err(StoreError::InvalidStateTransition {
                    id: message_id.to_string(),
                    state: other.label().to_string(),
                    action: "begin generation",
                });
            }
        }
        self.ensure_actionable(&record, "begin generation")?;

        record.generation = GenerationState::InFlight;
        record.generation_attempt += 1;
        record.updated_at = Utc::now();
        debug!(message_id, attempt = record.generation_attempt, "Draft generation started");
        Ok(GenerationPermit {
            message_id: message_id.to_string(),
            attempt: record.generation_attempt,
            slot: Arc::clone(slot),
        })
    }

    /// Record the outcome of the attempt `permit` started.
    ///
    /// Rejected unless that attempt is still the record's live `in_flight`
    /// one.
    pub fn update_draft(
        &self,
        permit: &GenerationPermit,
        outcome: Result<String, GenerationError>,
    ) -> Result<(), StoreError> {
        let message_id = permit.message_id();
        let mut record = self.slot(message_id)?.lock();
        if record.generation != GenerationState::InFlight {
            return Err(StoreError::InvalidStateTransition {
                id: message_id.to_string(),
                state: record.generation.label().to_string(),
                action: "record a draft",
            });
        }
        if !permit.is_live(&record) {
            return Err(StoreError::InvalidStateTransition {
                id: message_id.to_string(),
                state: format!(
                    "in flight for attempt {}, not {}",
                    record.generation_attempt,
                    permit.attempt()
                ),
                action: "record a draft",
            });
        }
        self.ensure_actionable(&record, "record a draft")?;

        record.generation = match outcome {
            Ok(draft) => GenerationState::Done { draft },
            Err(error) => GenerationState::Failed { error },
        };
        record.updated_at = Utc::now();
        debug!(message_id, state = record.generation.label(), "Draft outcome recorded");
        Ok(())
    }

    /// Administrative reset of a failed draft so it can be attempted again.
    pub fn reset_failed(&self, message_id: &str) -> Result<(), StoreError> {
        let mut record = self.slot(message_id)?.lock();
        if !matches!(record.generation, GenerationState::Failed { .. }) {
            return Err(StoreError::InvalidStateTransition {
                id: message_id.to_string(),
                state: record.generation.label().to_string(),
                action: "reset",
            });
        }
        record.generation = GenerationState::NotAttempted;
        record.updated_at = Utc::now();
        debug!(message_id, "Failed draft reset");
        Ok(())
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts {
            total: self.slots.len(),
            ..StatusCounts::default()
        };
        for slot in &self.slots {
            match slot.lock().draft_status(&self.actionable) {
                DraftStatus::Unclassified => counts.unclassified += 1,
                DraftStatus::NotActionable => counts.not_actionable += 1,
                DraftStatus::Pending => counts.pending += 1,
                DraftStatus::InFlight => counts.in_flight += 1,
                DraftStatus::Drafted => counts.drafted += 1,
                DraftStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Overwrite a record's generation state, bypassing the transition rules.
    #[cfg(test)]
    pub(crate) fn force_generation_state(&self, message_id: &str, state: GenerationState) {
        if let Ok(slot) = self.slot(message_id) {
            slot.lock().generation = state;
        }
    }

    fn ensure_actionable(
        &self,
        record: &MessageRecord,
        action: &'static str,
    ) -> Result<(), StoreError> {
        match record.bucket() {
            Some(bucket) if self.actionable.contains(bucket) => Ok(()),
            Some(bucket) => Err(StoreError::InvalidStateTransition {
                id: record.message_id.clone(),
                state: format!("not actionable ({bucket})"),
                action,
            }),
            None => Err(StoreError::InvalidStateTransition {
                id: record.message_id.clone(),
                state: "unclassified".to_string(),
                action,
            }),
        }
    }
}
