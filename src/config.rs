//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::llm::{OllamaConfig, PromptTemplate};
use crate::pipeline::drafts::{DEFAULT_BATCH_SIZE, DEFAULT_GENERATION_TIMEOUT, DraftConfig};
use crate::pipeline::types::ActionableBuckets;

/// Default CSV input path.
pub const DEFAULT_MESSAGES_PATH: &str = "./data/your_messages.csv";

/// Default exported classifier directory.
pub const DEFAULT_MODEL_DIR: &str = "./models/message_classifier_model";

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 8000;

/// Service configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// CSV file with the messages to triage.
    pub messages_path: PathBuf,
    /// Directory holding `model.onnx` and `tokenizer.json`.
    pub model_dir: PathBuf,
    pub ollama: OllamaConfig,
    /// Buckets that get a draft reply.
    pub actionable: ActionableBuckets,
    pub drafts: DraftConfig,
    pub port: u16,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            messages_path: PathBuf::from(DEFAULT_MESSAGES_PATH),
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            ollama: OllamaConfig::default(),
            actionable: ActionableBuckets::default(),
            drafts: DraftConfig::default(),
            port: DEFAULT_PORT,
        }
    }
}

impl TriageConfig {
    /// Build configuration from `TRIAGE_*` / `OLLAMA_HOST` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup. Unset or blank keys
    /// fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let actionable = match get("TRIAGE_ACTIONABLE_BUCKETS") {
            Some(raw) => {
                let set = ActionableBuckets::from_str(&raw).map_err(|e| invalid(
                    "TRIAGE_ACTIONABLE_BUCKETS",
                    e.to_string(),
                ))?;
                if set.is_empty() {
                    return Err(invalid("TRIAGE_ACTIONABLE_BUCKETS", "no buckets listed"));
                }
                set
            }
            None => defaults.actionable,
        };

        let batch_size = parse_positive(get("TRIAGE_DRAFT_BATCH_SIZE"), "TRIAGE_DRAFT_BATCH_SIZE")?
            .unwrap_or(DEFAULT_BATCH_SIZE as u64) as usize;
        let generation_timeout = parse_positive(
            get("TRIAGE_GENERATION_TIMEOUT_SECS"),
            "TRIAGE_GENERATION_TIMEOUT_SECS",
        )?
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_GENERATION_TIMEOUT);

        let port = match get("TRIAGE_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| invalid("TRIAGE_PORT", e.to_string()))?,
            None => DEFAULT_PORT,
        };

        let prompt = match get("TRIAGE_PERSONA") {
            Some(persona) => PromptTemplate {
                persona,
                ..PromptTemplate::default()
            },
            None => PromptTemplate::default(),
        };

        Ok(Self {
            messages_path: get("TRIAGE_MESSAGES_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.messages_path),
            model_dir: get("TRIAGE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            ollama: OllamaConfig {
                host: get("OLLAMA_HOST").unwrap_or(defaults.ollama.host),
                model: get("TRIAGE_OLLAMA_MODEL").unwrap_or(defaults.ollama.model),
            },
            actionable,
            drafts: DraftConfig {
                batch_size,
                generation_timeout,
                prompt,
            },
            port,
        })
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

fn parse_positive(raw: Option<String>, key: &str) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(invalid(key, "must be at least 1")),
        Ok(value) => Ok(Some(value)),
        Err(e) => Err(invalid(key, e.to_string())),
    }
}
