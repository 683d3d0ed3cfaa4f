//! Triage pipeline: classifies loaded messages in one batch.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::classifier::Classifier;
use crate::error::{ClassifierError, TriageError};
use crate::pipeline::types::{ActionBucket, SourceFields};
use crate::store::MessageStore;

/// Text the classifier sees for a message: `subject: snippet`.
///
/// The exact format matters; the model was trained on this concatenation.
pub fn classification_text(source: &SourceFields) -> String {
    format!("{}: {}", source.subject_or_topic, source.message_snippet)
}

/// Outcome of a triage call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriageReport {
    /// Messages classified by this call.
    pub classified: usize,
    /// Messages skipped because they were already classified.
    pub skipped: usize,
    /// Per-bucket count of the newly classified messages.
    pub by_bucket: BTreeMap<ActionBucket, usize>,
}

/// Classifies batches of messages and commits the results to the store.
pub struct TriagePipeline {
    classifier: Arc<dyn Classifier>,
    store: Arc<MessageStore>,
}

impl TriagePipeline {
    pub fn new(classifier: Arc<dyn Classifier>, store: Arc<MessageStore>) -> Self {
        Self { classifier, store }
    }

    /// Classify every unclassified message in the store.
    pub async fn triage_all(&self) -> Result<TriageReport, TriageError> {
        let ids = self.store.unclassified_ids();
        self.triage(&ids).await
    }

    /// Classify the given messages with a single classifier call.
    ///
    /// All-or-nothing: if the classifier fails, or returns a result that
    /// cannot be committed, no message in the batch is classified.
    pub async fn triage(&self, message_ids: &[String]) -> Result<TriageReport, TriageError> {
        let mut report = TriageReport::default();
        let mut ids = Vec::with_capacity(message_ids.len());
        let mut texts = Vec::with_capacity(message_ids.len());
        for id in message_ids {
            let record = self.store.get(id)?;
            if record.classification.is_some() {
                debug!(message_id = %id, "Already classified, skipping");
                report.skipped += 1;
                continue;
            }
            texts.push(classification_text(&record.source));
            ids.push(record.message_id);
        }

        if ids.is_empty() {
            debug!(skipped = report.skipped, "Nothing to classify");
            return Ok(report);
        }

        info!(count = ids.len(), "Classifying message batch");
        let predictions = self.classifier.classify_batch(&texts).await.map_err(|e| {
            error!(error = %e, count = ids.len(), "Classifier failed, batch left unclassified");
            e
        })?;

        if predictions.len() != ids.len() {
            return Err(ClassifierError::ModelUnavailable {
                reason: format!(
                    "classifier returned {} results for {} inputs",
                    predictions.len(),
                    ids.len()
                ),
            }
            .into());
        }

        let results: Vec<_> = ids
            .into_iter()
            .zip(&predictions)
            .map(|(id, p)| (id, p.bucket, p.confidence))
            .collect();
        self.store.commit_classifications(&results)?;

        report.classified = results.len();
        for (_, bucket, _) in &results {
            *report.by_bucket.entry(*bucket).or_default() += 1;
        }
        info!(
            classified = report.classified,
            skipped = report.skipped,
            buckets = ?report.by_bucket,
            "Triage complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::classifier::Prediction;
    use crate::pipeline::types::{ActionableBuckets, MessageRecord};

    /// Classifier keyed on the exact classification text.
    struct LookupClassifier {
        labels: HashMap<String, ActionBucket>,
        calls: AtomicUsize,
        seen: parking_lot::Mutex<Vec<String>>,
    }

    impl LookupClassifier {
        fn new(labels: &[(&str, ActionBucket)]) -> Self {
            Self {
                labels: labels.iter().map(|(t, b)| (t.to_string(), *b)).collect(),
                calls: AtomicUsize::new(0),
                seen: parking_lot::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Classifier for LookupClassifier {
        async fn classify_batch(
            &self,
            texts: &[String],
        ) -> Result<Vec<Prediction>, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().extend(texts.iter().cloned());
            texts
                .iter()
                .map(|t| {
                    self.labels
                        .get(t)
                        .map(|&bucket| Prediction {
                            bucket,
                            confidence: 0.9,
                        })
                        .ok_or_else(|| ClassifierError::ModelUnavailable {
                            reason: format!("no label for {t}"),
                        })
                })
                .collect()
        }
    }

    struct DownClassifier;

    #[async_trait]
    impl Classifier for DownClassifier {
        async fn classify_batch(&self, _: &[String]) -> Result<Vec<Prediction>, ClassifierError> {
            Err(ClassifierError::ModelUnavailable {
                reason: "backend down".into(),
            })
        }
    }

    struct ShortClassifier;

    #[async_trait]
    impl Classifier for ShortClassifier {
        async fn classify_batch(&self, _: &[String]) -> Result<Vec<Prediction>, ClassifierError> {
            Ok(vec![Prediction {
                bucket: ActionBucket::Alert,
                confidence: 0.5,
            }])
        }
    }

    fn message(id: &str, subject: &str, snippet: &str) -> MessageRecord {
        MessageRecord::new(
            id,
            SourceFields {
                subject_or_topic: subject.into(),
                message_snippet: snippet.into(),
                ..SourceFields::default()
            },
        )
    }

    fn scenario_store() -> Arc<MessageStore> {
        Arc::new(
            MessageStore::load(
                vec![
                    message("M1", "Order 10234 shipping question", "confirm shipping"),
                    message("M2", "Dinner on Sunday", "free Sunday?"),
                    message("M3", "Low stock alert", "SKU below threshold"),
                ],
                ActionableBuckets::default(),
            )
            .unwrap(),
        )
    }

    fn scenario_classifier() -> LookupClassifier {
        LookupClassifier::new(&[
            ("Order 10234 shipping question: confirm shipping", ActionBucket::RequiresResponse),
            ("Dinner on Sunday: free Sunday?", ActionBucket::Personal),
            ("Low stock alert: SKU below threshold", ActionBucket::Alert),
        ])
    }

    #[test]
    fn classification_text_format() {
        let source = SourceFields {
            subject_or_topic: "Invoice overdue".into(),
            message_snippet: "INV-4420 is 7 days past due".into(),
            ..SourceFields::default()
        };
        assert_eq!(
            classification_text(&source),
            "Invoice overdue: INV-4420 is 7 days past due"
        );
    }

    #[tokio::test]
    async fn scenario_buckets_assigned_in_one_call() {
        let store = scenario_store();
        let classifier = Arc::new(scenario_classifier());
        let pipeline = TriagePipeline::new(classifier.clone(), Arc::clone(&store));

        let report = pipeline.triage_all().await.unwrap();
        assert_eq!(report.classified, 3);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *classifier.seen.lock(),
            vec![
                "Order 10234 shipping question: confirm shipping",
                "Dinner on Sunday: free Sunday?",
                "Low stock alert: SKU below threshold",
            ]
        );

        assert_eq!(store.get("M1").unwrap().bucket(), Some(ActionBucket::RequiresResponse));
        assert_eq!(store.get("M2").unwrap().bucket(), Some(ActionBucket::Personal));
        assert_eq!(store.get("M3").unwrap().bucket(), Some(ActionBucket::Alert));
        assert_eq!(report.by_bucket.get(&ActionBucket::Alert), Some(&1));
    }

    #[tokio::test]
    async fn classifier_failure_leaves_batch_unclassified() {
        let store = scenario_store();
        let pipeline = TriagePipeline::new(Arc::new(DownClassifier), Arc::clone(&store));

        let err = pipeline.triage_all().await.unwrap_err();
        assert!(matches!(
            err,
            TriageError::Classifier(ClassifierError::ModelUnavailable { .. })
        ));
        for record in store.all() {
            assert!(record.classification.is_none());
        }
    }

    #[tokio::test]
    async fn short_result_is_rejected_atomically() {
        let store = scenario_store();
        let pipeline = TriagePipeline::new(Arc::new(ShortClassifier), Arc::clone(&store));

        assert!(pipeline.triage_all().await.is_err());
        assert_eq!(store.unclassified_ids().len(), 3);
    }

    #[tokio::test]
    async fn retriage_is_a_no_op() {
        let store = scenario_store();
        let classifier = Arc::new(scenario_classifier());
        let pipeline = TriagePipeline::new(classifier.clone(), Arc::clone(&store));
        pipeline.triage_all().await.unwrap();

        let ids: Vec<String> = vec!["M1".into(), "M2".into()];
        let report = pipeline.triage(&ids).await.unwrap();
        assert_eq!(report.classified, 0);
        assert_eq!(report.skipped, 2);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get("M2").unwrap().bucket(), Some(ActionBucket::Personal));
    }

    #[tokio::test]
    async fn unknown_id_fails_before_classifying() {
        let store = scenario_store();
        let classifier = Arc::new(scenario_classifier());
        let pipeline = TriagePipeline::new(classifier.clone(), Arc::clone(&store));

        let ids: Vec<String> = vec!["M1".into(), "nope".into()];
        assert!(matches!(
            pipeline.triage(&ids).await,
            Err(TriageError::Store(_))
        ));
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        assert!(store.get("M1").unwrap().classification.is_none());
    }
}
