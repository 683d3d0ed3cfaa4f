//! Draft orchestrator: generates and caches draft replies for actionable messages.
//!
//! Two entry points:
//! - [`DraftOrchestrator::pregenerate_all`]: startup bulk pass, sequential
//!   fixed-size batches, failures recorded per message.
//! - [`DraftOrchestrator::request_draft`]: on-demand draft for one message,
//!   returning the cached draft once one exists.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::error::{DraftError, GenerationError, StoreError};
use crate::llm::{Generator, PromptTemplate};
use crate::pipeline::types::{GenerationState, MessageRecord};
use crate::store::{GenerationPermit, MessageStore};

/// Default number of drafts generated concurrently in one batch.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Default deadline for a single generation call.
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftConfig {
    /// Max generations outstanding at once during the bulk pass.
    pub batch_size: usize,
    /// A generation that takes longer is recorded as a timeout failure.
    pub generation_timeout: Duration,
    pub prompt: PromptTemplate,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            prompt: PromptTemplate::default(),
        }
    }
}

/// Summary of a bulk pre-generation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub drafted: usize,
    pub failed: usize,
    /// Messages picked up concurrently by an on-demand request.
    pub skipped: usize,
}

/// Drives draft generation and writes every outcome back to the store.
pub struct DraftOrchestrator {
    store: Arc<MessageStore>,
    generator: Arc<dyn Generator>,
    config: DraftConfig,
}

impl DraftOrchestrator {
    pub fn new(store: Arc<MessageStore>, generator: Arc<dyn Generator>, config: DraftConfig) -> Self {
        Self {
            store,
            generator,
            config,
        }
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    /// Generate drafts for every actionable message not yet attempted.
    ///
    /// Batches run strictly one after another; inside a batch the
    /// generations start in load order and run concurrently. A failed
    /// message never aborts its batch.
    pub async fn pregenerate_all(&self) -> BulkReport {
        let ids = self.store.pending_draft_ids();
        let total = ids.len();
        let mut report = BulkReport::default();
        if total == 0 {
            info!("No actionable messages awaiting drafts");
            return report;
        }

        info!(
            total,
            batch_size = self.config.batch_size,
            model = self.generator.model_name(),
            "Pre-generating drafts"
        );
        let batch_size = self.config.batch_size.max(1);
        for (batch_index, batch) in ids.chunks(batch_size).enumerate() {
            let start = batch_index * batch_size;
            info!(
                "Generating drafts {}-{} of {}",
                start + 1,
                start + batch.len(),
                total
            );

            let mut jobs = Vec::with_capacity(batch.len());
            for id in batch {
                match self.begin(id) {
                    Ok((permit, record)) => jobs.push(self.generate_and_record(permit, record)),
                    Err(e) => {
                        debug!(message_id = %id, error = %e, "Skipping draft");
                        report.skipped += 1;
                    }
                }
            }

            for outcome in join_all(jobs).await {
                match outcome {
                    Ok(_) => report.drafted += 1,
                    Err(_) => report.failed += 1,
                }
            }
        }

        info!(
            drafted = report.drafted,
            failed = report.failed,
            skipped = report.skipped,
            "Draft pre-generation complete"
        );
        report
    }

    /// Return the draft for one message, generating it if none exists yet.
    ///
    /// A drafted message returns its cached draft without calling the
    /// backend. A message whose earlier attempt failed stays failed until
    /// [`DraftOrchestrator::retry_draft`] is called.
    pub async fn request_draft(&self, message_id: &str) -> Result<String, DraftError> {
        let record = self.store.get(message_id).map_err(|e| not_found_or(e, message_id))?;
        let bucket = record.bucket().ok_or_else(|| DraftError::Unclassified {
            id: message_id.to_string(),
        })?;
        if !self.store.actionable().contains(bucket) {
            return Err(DraftError::NotActionable {
                id: message_id.to_string(),
                bucket,
            });
        }
        if let Some(settled) = settled_outcome(&record) {
            return settled;
        }

        let permit = match self.store.try_begin_generation(message_id) {
            Ok(permit) => permit,
            Err(StoreError::AlreadyInFlight { .. }) => {
                return Err(DraftError::ConcurrentGenerationInProgress {
                    id: message_id.to_string(),
                });
            }
            Err(StoreError::InvalidStateTransition { .. }) => {
                // Settled between the snapshot and the begin attempt.
                let record = self.store.get(message_id)?;
                return settled_outcome(&record).unwrap_or_else(|| {
                    Err(DraftError::ConcurrentGenerationInProgress {
                        id: message_id.to_string(),
                    })
                });
            }
            Err(e) => return Err(e.into()),
        };

        self.generate_and_record(permit, record).await
    }

    /// Reset a failed draft and generate it again.
    pub async fn retry_draft(&self, message_id: &str) -> Result<String, DraftError> {
        self.store
            .reset_failed(message_id)
            .map_err(|e| not_found_or(e, message_id))?;
        info!(message_id, "Retrying failed draft");
        self.request_draft(message_id).await
    }

    fn begin(&self, message_id: &str) -> Result<(GenerationPermit, MessageRecord), StoreError> {
        let permit = self.store.try_begin_generation(message_id)?;
        let record = self.store.get(message_id)?;
        Ok((permit, record))
    }

    /// Run one generation under `permit` and record the outcome.
    ///
    /// The draft is only handed back once the store has accepted it.
    async fn generate_and_record(
        &self,
        permit: GenerationPermit,
        record: MessageRecord,
    ) -> Result<String, DraftError> {
        let message_id = permit.message_id().to_string();
        let prompt = self.config.prompt.render(&record.source);
        let timeout = self.config.generation_timeout;

        debug!(message_id = %message_id, attempt = permit.attempt(), "Requesting draft");
        let outcome = match tokio::time::timeout(timeout, self.generator.generate(&prompt)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout { timeout }),
        };

        match &outcome {
            Ok(draft) => info!(message_id = %message_id, chars = draft.len(), "Draft generated"),
            Err(e) => warn!(
                message_id = %message_id,
                kind = e.kind(),
                error = %e,
                "Draft generation failed"
            ),
        }

        if let Err(e) = self.store.update_draft(&permit, outcome.clone()) {
            warn!(message_id = %message_id, error = %e, "Could not record draft outcome");
            return Err(e.into());
        }
        outcome.map_err(|source| DraftError::Generation {
            id: message_id,
            source,
        })
    }
}

/// The caller-facing result for a record whose generation has already settled.
fn settled_outcome(record: &MessageRecord) -> Option<Result<String, DraftError>> {
    match &record.generation {
        GenerationState::Done { draft } => {
            debug!(message_id = %record.message_id, "Returning cached draft");
            Some(Ok(draft.clone()))
        }
        GenerationState::Failed { error } => Some(Err(DraftError::PreviouslyFailed {
            id: record.message_id.clone(),
            source: error.clone(),
        })),
        GenerationState::InFlight => Some(Err(DraftError::ConcurrentGenerationInProgress {
            id: record.message_id.clone(),
        })),
        GenerationState::NotAttempted => None,
    }
}

fn not_found_or(error: StoreError, message_id: &str) -> DraftError {
    match error {
        StoreError::NotFound { .. } => DraftError::NotFound {
            id: message_id.to_string(),
        },
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::pipeline::types::{ActionBucket, ActionableBuckets, DraftStatus, SourceFields};

    /// Generator that echoes the subject line and tracks concurrency.
    #[derive(Default)]
    struct EchoGenerator {
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
        fail_subjects: Vec<String>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Generator for EchoGenerator {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay.unwrap_or(Duration::from_millis(5))).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let subject = prompt
                .lines()
                .find_map(|l| l.strip_prefix("- Subject: "))
                .unwrap_or_default()
                .to_string();
            if self.fail_subjects.contains(&subject) {
                return Err(GenerationError::Backend {
                    status: Some(500),
                    payload: format!("{{\"error\":\"cannot draft {subject}\"}}"),
                });
            }
            Ok(format!("Re: {subject}"))
        }
    }

    /// Generator that blocks until released.
    struct GatedGenerator {
        gate: Arc<Notify>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Generator for GatedGenerator {
        fn model_name(&self) -> &str {
            "gated"
        }

        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok("released".into())
        }
    }

    /// Generator whose record is released out from under it mid-call.
    struct PreemptedGenerator {
        store: Arc<MessageStore>,
        message_id: &'static str,
    }

    #[async_trait]
    impl Generator for PreemptedGenerator {
        fn model_name(&self) -> &str {
            "preempted"
        }

        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            self.store.force_generation_state(
                self.message_id,
                GenerationState::Failed {
                    error: GenerationError::Cancelled,
                },
            );
            Ok("unrecorded draft".into())
        }
    }

    fn message(id: &str, subject: &str) -> MessageRecord {
        MessageRecord::new(
            id,
            SourceFields {
                subject_or_topic: subject.into(),
                ..SourceFields::default()
            },
        )
    }

    fn classified_store(entries: &[(&str, ActionBucket)]) -> Arc<MessageStore> {
        let store = MessageStore::load(
            entries.iter().map(|(id, _)| message(id, &format!("subject {id}"))).collect(),
            ActionableBuckets::default(),
        )
        .unwrap();
        for (id, bucket) in entries {
            store.update_classification(id, *bucket, 0.9).unwrap();
        }
        Arc::new(store)
    }

    fn scenario_store() -> Arc<MessageStore> {
        classified_store(&[
            ("M1", ActionBucket::RequiresResponse),
            ("M2", ActionBucket::Personal),
            ("M3", ActionBucket::Alert),
        ])
    }

    fn orchestrator(store: &Arc<MessageStore>, generator: Arc<dyn Generator>) -> DraftOrchestrator {
        DraftOrchestrator::new(Arc::clone(store), generator, DraftConfig::default())
    }

    #[tokio::test]
    async fn scenario_only_actionable_message_is_drafted() {
        let store = scenario_store();
        let generator = Arc::new(EchoGenerator::default());
        let drafts = orchestrator(&store, generator.clone());

        let report = drafts.pregenerate_all().await;
        assert_eq!(report, BulkReport { drafted: 1, failed: 0, skipped: 0 });
        assert_eq!(store.get("M1").unwrap().draft_response(), Some("Re: subject M1"));
        assert!(store.get("M2").unwrap().draft_response().is_none());
        assert!(store.get("M3").unwrap().draft_response().is_none());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_store_write_is_not_reported_as_drafted() {
        let store = scenario_store();
        let generator = Arc::new(PreemptedGenerator {
            store: Arc::clone(&store),
            message_id: "M1",
        });
        let drafts = orchestrator(&store, generator);

        let result = drafts.request_draft("M1").await;
        assert!(
            matches!(
                result,
                Err(DraftError::Store(StoreError::InvalidStateTransition { .. }))
            ),
            "got {result:?}"
        );
        let record = store.get("M1").unwrap();
        assert!(record.draft_response().is_none());
        assert_eq!(record.draft_status(store.actionable()), DraftStatus::Failed);
    }

    #[tokio::test]
    async fn rejected_store_write_counts_as_failed_in_bulk() {
        let store = scenario_store();
        let generator = Arc::new(PreemptedGenerator {
            store: Arc::clone(&store),
            message_id: "M1",
        });
        let drafts = orchestrator(&store, generator);

        let report = drafts.pregenerate_all().await;
        assert_eq!(report, BulkReport { drafted: 0, failed: 1, skipped: 0 });
        assert!(store.get("M1").unwrap().draft_response().is_none());
    }

    #[tokio::test]
    async fn on_demand_errors_are_distinct() {
        let store = scenario_store();
        let drafts = orchestrator(&store, Arc::new(EchoGenerator::default()));

        assert!(matches!(
            drafts.request_draft("unknown").await,
            Err(DraftError::NotFound { .. })
        ));
        assert!(matches!(
            drafts.request_draft("M2").await,
            Err(DraftError::NotActionable { bucket: ActionBucket::Personal, .. })
        ));
    }

    #[tokio::test]
    async fn on_demand_for_unclassified_message() {
        let store = Arc::new(
            MessageStore::load(vec![message("U1", "hello")], ActionableBuckets::default()).unwrap(),
        );
        let drafts = orchestrator(&store, Arc::new(EchoGenerator::default()));
        assert!(matches!(
            drafts.request_draft("U1").await,
            Err(DraftError::Unclassified { .. })
        ));
    }

    #[tokio::test]
    async fn drafted_message_returns_cached_draft() {
        let store = scenario_store();
        let generator = Arc::new(EchoGenerator::default());
        let drafts = orchestrator(&store, generator.clone());
        drafts.pregenerate_all().await;

        let first = drafts.request_draft("M1").await.unwrap();
        let second = drafts.request_draft("M1").await.unwrap();
        assert_eq!(first, "Re: subject M1");
        assert_eq!(first, second);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn on_demand_generates_when_not_attempted() {
        let store = scenario_store();
        let generator = Arc::new(EchoGenerator::default());
        let drafts = orchestrator(&store, generator.clone());

        assert_eq!(drafts.request_draft("M1").await.unwrap(), "Re: subject M1");
        assert_eq!(
            store.get("M1").unwrap().draft_status(store.actionable()),
            DraftStatus::Drafted
        );
        // Bulk pass afterwards has nothing left to do.
        assert_eq!(drafts.pregenerate_all().await, BulkReport::default());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batches_bound_concurrency() {
        let entries: Vec<(String, ActionBucket)> = (0..12)
            .map(|i| (format!("m{i}"), ActionBucket::RequiresDecision))
            .collect();
        let refs: Vec<(&str, ActionBucket)> =
            entries.iter().map(|(id, b)| (id.as_str(), *b)).collect();
        let store = classified_store(&refs);
        let generator = Arc::new(EchoGenerator {
            delay: Some(Duration::from_millis(20)),
            ..EchoGenerator::default()
        });
        let drafts = DraftOrchestrator::new(
            Arc::clone(&store),
            generator.clone(),
            DraftConfig {
                batch_size: 5,
                ..DraftConfig::default()
            },
        );

        let report = drafts.pregenerate_all().await;
        assert_eq!(report.drafted, 12);
        assert_eq!(generator.peak.load(Ordering::SeqCst), 5);
        assert_eq!(store.counts().drafted, 12);
    }

    #[tokio::test]
    async fn failure_is_isolated_within_batch() {
        let store = classified_store(&[
            ("a", ActionBucket::RequiresResponse),
            ("b", ActionBucket::RequiresResponse),
            ("c", ActionBucket::RequiresDecision),
        ]);
        let generator = Arc::new(EchoGenerator {
            fail_subjects: vec!["subject b".into()],
            ..EchoGenerator::default()
        });
        let drafts = orchestrator(&store, generator);

        let report = drafts.pregenerate_all().await;
        assert_eq!(report, BulkReport { drafted: 2, failed: 1, skipped: 0 });

        let failed = store.get("b").unwrap();
        assert!(failed.draft_response().is_none());
        match failed.generation {
            GenerationState::Failed { error: GenerationError::Backend { payload, .. } } => {
                assert!(payload.contains("cannot draft subject b"));
            }
            other => panic!("expected backend failure, got {other:?}"),
        }
        assert_eq!(store.get("c").unwrap().draft_response(), Some("Re: subject c"));

        // Failed stays failed until explicitly retried.
        assert!(matches!(
            drafts.request_draft("b").await,
            Err(DraftError::PreviouslyFailed { .. })
        ));
    }

    #[tokio::test]
    async fn retry_regenerates_failed_draft() {
        let store = classified_store(&[("a", ActionBucket::RequiresResponse)]);
        let failing = Arc::new(EchoGenerator {
            fail_subjects: vec!["subject a".into()],
            ..EchoGenerator::default()
        });
        let result = orchestrator(&store, failing).request_draft("a").await;
        assert!(matches!(result, Err(DraftError::Generation { .. })));

        let working = orchestrator(&store, Arc::new(EchoGenerator::default()));
        assert!(matches!(
            working.request_draft("a").await,
            Err(DraftError::PreviouslyFailed { .. })
        ));
        assert_eq!(working.retry_draft("a").await.unwrap(), "Re: subject a");
        assert!(working.retry_draft("a").await.is_err());
        assert!(matches!(
            working.retry_draft("zzz").await,
            Err(DraftError::NotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_generation_times_out_to_failed() {
        let store = classified_store(&[("a", ActionBucket::RequiresResponse)]);
        let generator = Arc::new(GatedGenerator {
            gate: Arc::new(Notify::new()),
            calls: AtomicUsize::new(0),
        });
        let drafts = DraftOrchestrator::new(
            Arc::clone(&store),
            generator,
            DraftConfig {
                generation_timeout: Duration::from_secs(3),
                ..DraftConfig::default()
            },
        );

        let err = drafts.request_draft("a").await.unwrap_err();
        match err {
            DraftError::Generation { source, .. } => assert_eq!(source.kind(), "timeout"),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(
            store.get("a").unwrap().draft_status(store.actionable()),
            DraftStatus::Failed
        );
    }

    #[tokio::test]
    async fn concurrent_on_demand_requests_do_not_duplicate_work() {
        let store = classified_store(&[("a", ActionBucket::RequiresResponse)]);
        let gate = Arc::new(Notify::new());
        let generator = Arc::new(GatedGenerator {
            gate: Arc::clone(&gate),
            calls: AtomicUsize::new(0),
        });
        let drafts = Arc::new(orchestrator(&store, generator.clone()));

        let first = {
            let drafts = Arc::clone(&drafts);
            tokio::spawn(async move { drafts.request_draft("a").await })
        };
        while generator.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            drafts.request_draft("a").await,
            Err(DraftError::ConcurrentGenerationInProgress { .. })
        ));
        assert_eq!(
            store.get("a").unwrap().draft_status(store.actionable()),
            DraftStatus::InFlight
        );

        gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), "released");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(drafts.request_draft("a").await.unwrap(), "released");
    }

    #[tokio::test]
    async fn draft_never_set_for_non_actionable() {
        let store = classified_store(&[
            ("n1", ActionBucket::Notification),
            ("n2", ActionBucket::FinancialAction),
            ("n3", ActionBucket::RequiresReview),
        ]);
        let generator = Arc::new(EchoGenerator::default());
        let drafts = orchestrator(&store, generator.clone());

        assert_eq!(drafts.pregenerate_all().await, BulkReport::default());
        for id in ["n1", "n2", "n3"] {
            assert!(drafts.request_draft(id).await.is_err());
            assert!(store.get(id).unwrap().draft_response().is_none());
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }
}
