//! Shared types for the triage-and-draft pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GenerationError, QueryError};

// ── Action buckets ──────────────────────────────────────────────────

/// The fixed set of labels the classifier assigns.
///
/// Variant order is the classifier's class-index order and must not change:
/// the exported model emits scores in exactly this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionBucket {
    RequiresResponse,
    RequiresDecision,
    RequiresReview,
    FinancialAction,
    Alert,
    Notification,
    Personal,
}

impl ActionBucket {
    /// Every bucket, in class-index order.
    pub const ALL: [ActionBucket; 7] = [
        Self::RequiresResponse,
        Self::RequiresDecision,
        Self::RequiresReview,
        Self::FinancialAction,
        Self::Alert,
        Self::Notification,
        Self::Personal,
    ];

    /// Map a model class index to its bucket.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequiresResponse => "requires_response",
            Self::RequiresDecision => "requires_decision",
            Self::RequiresReview => "requires_review",
            Self::FinancialAction => "financial_action",
            Self::Alert => "alert",
            Self::Notification => "notification",
            Self::Personal => "personal",
        }
    }
}

impl fmt::Display for ActionBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionBucket {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| QueryError::UnknownTag { tag: s.to_string() })
    }
}

/// The subset of buckets that get a draft reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ActionableBuckets(Vec<ActionBucket>);

impl ActionableBuckets {
    /// Build a set; duplicates are collapsed and the result is kept in class-index order.
    pub fn new(buckets: impl IntoIterator<Item = ActionBucket>) -> Self {
        let mut buckets: Vec<ActionBucket> = buckets.into_iter().collect();
        buckets.sort();
        buckets.dedup();
        Self(buckets)
    }

    pub fn contains(&self, bucket: ActionBucket) -> bool {
        self.0.contains(&bucket)
    }

    pub fn iter(&self) -> impl Iterator<Item = ActionBucket> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for ActionableBuckets {
    fn default() -> Self {
        Self::new([ActionBucket::RequiresResponse, ActionBucket::RequiresDecision])
    }
}

impl FromStr for ActionableBuckets {
    type Err = QueryError;

    /// Parse a comma-separated list of bucket names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let buckets = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(ActionBucket::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(buckets))
    }
}

// ── Message records ─────────────────────────────────────────────────

/// Upstream fields carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceFields {
    pub sender_name: String,
    pub sender_handle_or_email: String,
    pub subject_or_topic: String,
    pub message_snippet: String,
    pub source_system: String,
    pub channel_name: String,
    pub category: String,
    pub order_id: Option<String>,
}

/// Result of classifying one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub bucket: ActionBucket,
    /// Top-label probability, in [0, 1].
    pub confidence: f32,
    pub classified_at: DateTime<Utc>,
}

/// Lifecycle of a message's draft reply.
///
/// `NotAttempted -> InFlight -> Done | Failed`; `Failed -> NotAttempted`
/// only through an explicit reset.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationState {
    NotAttempted,
    InFlight,
    Done { draft: String },
    Failed { error: GenerationError },
}

impl GenerationState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotAttempted => "not_attempted",
            Self::InFlight => "in_flight",
            Self::Done { .. } => "done",
            Self::Failed { .. } => "failed",
        }
    }
}

/// One inbound message and its triage state.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub message_id: String,
    pub source: SourceFields,
    pub classification: Option<Classification>,
    pub generation: GenerationState,
    /// Bumped by every generation start; identifies the live attempt.
    pub generation_attempt: u64,
    pub updated_at: DateTime<Utc>,
}

impl MessageRecord {
    /// A freshly loaded, unclassified record.
    pub fn new(message_id: impl Into<String>, source: SourceFields) -> Self {
        Self {
            message_id: message_id.into(),
            source,
            classification: None,
            generation: GenerationState::NotAttempted,
            generation_attempt: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn bucket(&self) -> Option<ActionBucket> {
        self.classification.as_ref().map(|c| c.bucket)
    }

    /// The generated draft, if one exists.
    pub fn draft_response(&self) -> Option<&str> {
        match &self.generation {
            GenerationState::Done { draft } => Some(draft),
            _ => None,
        }
    }

    pub fn draft_status(&self, actionable: &ActionableBuckets) -> DraftStatus {
        let Some(bucket) = self.bucket() else {
            return DraftStatus::Unclassified;
        };
        if !actionable.contains(bucket) {
            return DraftStatus::NotActionable;
        }
        match self.generation {
            GenerationState::NotAttempted => DraftStatus::Pending,
            GenerationState::InFlight => DraftStatus::InFlight,
            GenerationState::Done { .. } => DraftStatus::Drafted,
            GenerationState::Failed { .. } => DraftStatus::Failed,
        }
    }
}

/// Externally visible draft state. Each variant is a distinct answer to
/// "what happened to this message", so none may be folded into another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Unclassified,
    NotActionable,
    Pending,
    InFlight,
    Drafted,
    Failed,
}

// ── Query views ─────────────────────────────────────────────────────

/// JSON view of a record returned by the query surface.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub message_id: String,
    #[serde(flatten)]
    pub source: SourceFields,
    pub action_bucket: Option<ActionBucket>,
    pub classification_confidence: Option<f32>,
    /// Empty unless a draft has been generated.
    pub draft_response: String,
    pub draft_status: DraftStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_error: Option<DraftErrorView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftErrorView {
    pub kind: &'static str,
    pub message: String,
}

impl MessageView {
    pub fn from_record(record: &MessageRecord, actionable: &ActionableBuckets) -> Self {
        let draft_error = match &record.generation {
            GenerationState::Failed { error } => Some(DraftErrorView {
                kind: error.kind(),
                message: error.to_string(),
            }),
            _ => None,
        };
        Self {
            message_id: record.message_id.clone(),
            source: record.source.clone(),
            action_bucket: record.bucket(),
            classification_confidence: record.classification.as_ref().map(|c| c.confidence),
            draft_response: record.draft_response().unwrap_or_default().to_string(),
            draft_status: record.draft_status(actionable),
            draft_error,
        }
    }
}
