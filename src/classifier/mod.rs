//! Classifier gateway.
//!
//! The pipeline only sees the [`Classifier`] trait. The production backend is
//! [`OnnxClassifier`], a SetFit model exported to ONNX and loaded once at
//! startup.

mod onnx;

pub use onnx::OnnxClassifier;

use async_trait::async_trait;

use crate::error::ClassifierError;
use crate::pipeline::types::ActionBucket;

/// Top label and its probability for one input text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub bucket: ActionBucket,
    pub confidence: f32,
}

/// Categorical text classifier.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify every text. The result has the same length and order as `texts`.
    async fn classify_batch(&self, texts: &[String]) -> Result<Vec<Prediction>, ClassifierError>;
}

/// Tolerance used to decide whether a score row is already a distribution.
const DISTRIBUTION_EPSILON: f32 = 1e-3;

/// Turn one row of class scores into a prediction.
///
/// Rows that already form a probability distribution are used as-is; any
/// other row is treated as logits and softmax-normalized first.
pub fn prediction_from_scores(scores: &[f32]) -> Result<Prediction, ClassifierError> {
    if scores.len() != ActionBucket::ALL.len() {
        return Err(ClassifierError::ModelUnavailable {
            reason: format!(
                "model emitted {} classes, expected {}",
                scores.len(),
                ActionBucket::ALL.len()
            ),
        });
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(ClassifierError::ModelUnavailable {
            reason: "model emitted a non-finite score".to_string(),
        });
    }

    let sum: f32 = scores.iter().sum();
    let is_distribution =
        scores.iter().all(|s| (0.0..=1.0).contains(s)) && (sum - 1.0).abs() <= DISTRIBUTION_EPSILON;
    let probabilities = if is_distribution {
        scores.to_vec()
    } else {
        softmax(scores)
    };

    let (index, confidence) = probabilities
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::MIN), |best, (i, p)| if p > best.1 { (i, p) } else { best });

    let bucket = ActionBucket::from_index(index).ok_or_else(|| ClassifierError::ModelUnavailable {
        reason: format!("unknown class index {index}"),
    })?;

    Ok(Prediction {
        bucket,
        confidence: confidence.clamp(0.0, 1.0),
    })
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::MIN, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.iter().map(|e| e / total).collect()
}
