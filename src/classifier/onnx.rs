//! ONNX classifier backend for the exported SetFit model.
//!
//! Expects `model.onnx` and `tokenizer.json` in the model directory. The
//! graph takes `input_ids`, `attention_mask` and `token_type_ids` and emits
//! one row of seven class scores per input, in [`ActionBucket::ALL`] order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use ndarray::Array2;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::TensorRef;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{Classifier, Prediction, prediction_from_scores};
use crate::error::ClassifierError;
use crate::pipeline::types::ActionBucket;

/// Loaded model and tokenizer. Held for the whole process lifetime.
pub struct OnnxClassifier {
    inner: Arc<Inner>,
}

struct Inner {
    session: Mutex<Session>,
    tokenizer: tokenizers::Tokenizer,
}

fn unavailable(reason: impl Into<String>) -> ClassifierError {
    ClassifierError::ModelUnavailable {
        reason: reason.into(),
    }
}

impl OnnxClassifier {
    /// Load the model from `model_dir`. Expensive; call once at startup.
    pub fn load(model_dir: &Path) -> Result<Self, ClassifierError> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            unavailable(format!(
                "failed to load tokenizer from {}: {e}",
                tokenizer_path.display()
            ))
        })?;

        let session = Session::builder()
            .map_err(|e| unavailable(format!("failed to create ONNX session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| unavailable(format!("failed to set optimization level: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| {
                unavailable(format!(
                    "failed to load ONNX model from {}: {e}",
                    model_path.display()
                ))
            })?;

        info!(model = %model_path.display(), "Classifier model loaded");
        Ok(Self {
            inner: Arc::new(Inner {
                session: Mutex::new(session),
                tokenizer,
            }),
        })
    }
}

impl Inner {
    fn run(&self, texts: Vec<String>) -> Result<Vec<Prediction>, ClassifierError> {
        let batch = texts.len();
        let encodings = self
            .tokenizer
            .encode_batch(texts, true)
            .map_err(|e| unavailable(format!("tokenization failed: {e}")))?;

        // Right-pad every row to the longest encoding; padding has a zero mask.
        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);
        let mut input_ids = Array2::<i64>::zeros((batch, seq_len));
        let mut attention_mask = Array2::<i64>::zeros((batch, seq_len));
        let mut token_type_ids = Array2::<i64>::zeros((batch, seq_len));
        for (row, encoding) in encodings.iter().enumerate() {
            let columns = encoding
                .get_ids()
                .iter()
                .zip(encoding.get_attention_mask())
                .zip(encoding.get_type_ids())
                .enumerate();
            for (col, ((&id, &mask), &type_id)) in columns {
                input_ids[[row, col]] = i64::from(id);
                attention_mask[[row, col]] = i64::from(mask);
                token_type_ids[[row, col]] = i64::from(type_id);
            }
        }

        let input_ids = TensorRef::from_array_view(&input_ids)
            .map_err(|e| unavailable(format!("failed to create input_ids tensor: {e}")))?;
        let attention_mask = TensorRef::from_array_view(&attention_mask)
            .map_err(|e| unavailable(format!("failed to create attention_mask tensor: {e}")))?;
        let token_type_ids = TensorRef::from_array_view(&token_type_ids)
            .map_err(|e| unavailable(format!("failed to create token_type_ids tensor: {e}")))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids
            ])
            .map_err(|e| unavailable(format!("ONNX inference failed: {e}")))?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| unavailable(format!("failed to extract output tensor: {e}")))?;

        let classes = shape.last().copied().unwrap_or(0) as usize;
        if classes != ActionBucket::ALL.len() || data.len() != batch * classes {
            return Err(unavailable(format!(
                "unexpected output shape {shape:?} for batch of {batch}"
            )));
        }

        debug!(batch, seq_len, "Classifier batch complete");
        data.chunks(classes).map(prediction_from_scores).collect()
    }
}

#[async_trait]
impl Classifier for OnnxClassifier {
    async fn classify_batch(&self, texts: &[String]) -> Result<Vec<Prediction>, ClassifierError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let inner = Arc::clone(&self.inner);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || inner.run(texts))
            .await
            .map_err(|e| unavailable(format!("classifier task failed: {e}")))?
    }
}
