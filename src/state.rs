use crate::classifier::{Classifier, Label, Prediction};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

pub const PLACEHOLDER_TEXT: &str = "Test the IA model...";

pub enum ModelStatus {
    Loading,
    Ready(Arc<dyn Classifier>),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum ModelStatusView {
    Loading,
    Ready,
    Failed { error: String },
}

/// Holds the classifier handle once the loader resolves. The slot is written
/// exactly once; later writes are ignored.
pub struct ModelSlot {
    status: RwLock<ModelStatus>,
}

impl ModelSlot {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(ModelStatus::Loading),
        }
    }

    pub fn publish(&self, classifier: Arc<dyn Classifier>) {
        let mut status = self.status.write();
        if matches!(*status, ModelStatus::Loading) {
            *status = ModelStatus::Ready(classifier);
        } else {
            tracing::warn!("model slot already resolved, ignoring publish");
        }
    }

    pub fn fail(&self, reason: String) {
        let mut status = self.status.write();
        if matches!(*status, ModelStatus::Loading) {
            *status = ModelStatus::Failed(reason);
        } else {
            tracing::warn!("model slot already resolved, ignoring failure");
        }
    }

    pub fn ready_or_reason(&self) -> Result<Arc<dyn Classifier>, String> {
        match &*self.status.read() {
            ModelStatus::Ready(classifier) => Ok(classifier.clone()),
            ModelStatus::Loading => Err("model is still loading".to_string()),
            ModelStatus::Failed(reason) => Err(format!("model failed to load: {}", reason)),
        }
    }

    pub fn describe(&self) -> ModelStatusView {
        match &*self.status.read() {
            ModelStatus::Loading => ModelStatusView::Loading,
            ModelStatus::Ready(_) => ModelStatusView::Ready,
            ModelStatus::Failed(reason) => ModelStatusView::Failed {
                error: reason.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionView {
    pub display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<Label>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

struct PredictionRecord {
    sequence: u64,
    outcome: Result<Prediction, String>,
}

/// The shared prediction cell. Every upload is issued a monotonically
/// increasing sequence number; only the outcome matching the latest issued
/// sequence may be published, so a slow response for an older upload can
/// never overwrite a newer one.
pub struct PredictionCell {
    issued: AtomicU64,
    latest: RwLock<Option<PredictionRecord>>,
}

impl PredictionCell {
    pub fn new() -> Self {
        Self {
            issued: AtomicU64::new(0),
            latest: RwLock::new(None),
        }
    }

    /// Issues the sequence number for a new upload. Sequences start at 1.
    pub fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Publishes an outcome. Returns false when the outcome is stale, i.e. a
    /// newer upload has been issued since `sequence` was handed out.
    pub fn publish(&self, sequence: u64, outcome: Result<Prediction, String>) -> bool {
        if sequence != self.issued.load(Ordering::SeqCst) {
            return false;
        }

        let mut latest = self.latest.write();
        if latest.as_ref().is_some_and(|r| r.sequence > sequence) {
            return false;
        }
        *latest = Some(PredictionRecord { sequence, outcome });

        true
    }

    pub fn view(&self) -> PredictionView {
        match &*self.latest.read() {
            None => PredictionView {
                display: PLACEHOLDER_TEXT.to_string(),
                label: None,
                score: None,
                sequence: None,
            },
            Some(record) => match &record.outcome {
                Ok(prediction) => PredictionView {
                    display: prediction.label.display().to_string(),
                    label: Some(prediction.label),
                    score: Some(prediction.score),
                    sequence: Some(record.sequence),
                },
                Err(reason) => PredictionView {
                    display: format!("Prediction failed: {}", reason),
                    label: None,
                    score: None,
                    sequence: Some(record.sequence),
                },
            },
        }
    }
}
