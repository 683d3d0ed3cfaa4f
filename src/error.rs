//! Error types for inbox triage.

use std::time::Duration;

use crate::pipeline::types::ActionBucket;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Triage error: {0}")]
    Triage(#[from] TriageError),

    #[error("Draft error: {0}")]
    Draft(#[from] DraftError),

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors raised while reading the bulk message input.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to open {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Malformed CSV input: {0}")]
    Csv(#[from] csv::Error),

    #[error("Row {line} has an empty message_id")]
    MissingMessageId { line: u64 },
}

/// Classifier backend errors. Always fatal to the triage call that hit them.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier model unavailable: {reason}")]
    ModelUnavailable { reason: String },
}

/// Draft generation failures, recorded per message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("Generation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Generation backend error (status {status:?}): {payload}")]
    Backend { status: Option<u16>, payload: String },

    #[error("Malformed generation response: {payload}")]
    MalformedResponse { payload: String },

    #[error("Generation cancelled before completion")]
    Cancelled,
}

impl GenerationError {
    /// Short, stable kind name for logs and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Backend { .. } => "backend_error",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Message store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Duplicate message id: {id}")]
    DuplicateMessageId { id: String },

    #[error("Message not found: {id}")]
    NotFound { id: String },

    #[error("Draft generation already in flight for message {id}")]
    AlreadyInFlight { id: String },

    #[error("Message {id} is {state}, cannot {action}")]
    InvalidStateTransition {
        id: String,
        state: String,
        action: &'static str,
    },

    #[error("Confidence {value} for message {id} is outside [0, 1]")]
    InvalidConfidence { id: String, value: f32 },
}

/// Query-surface errors.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Unknown tag: {tag}")]
    UnknownTag { tag: String },
}

/// Triage pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors returned to a caller requesting a single draft.
#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("Message not found: {id}")]
    NotFound { id: String },

    #[error("Message {id} has not been classified yet")]
    Unclassified { id: String },

    #[error("Message {id} is not actionable (tag: {bucket})")]
    NotActionable { id: String, bucket: ActionBucket },

    #[error("Draft generation already in progress for message {id}")]
    ConcurrentGenerationInProgress { id: String },

    #[error("Draft generation for message {id} failed earlier ({source}); retry required")]
    PreviouslyFailed { id: String, source: GenerationError },

    #[error("Draft generation for message {id} failed: {source}")]
    Generation { id: String, source: GenerationError },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
