use crate::{
    classifier::{ClassifierError, Label},
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("model is not available: {0}")]
    ModelUnavailable(String),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
}

impl PredictError {
    fn status_code(&self) -> StatusCode {
        match self {
            PredictError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            PredictError::Classifier(ClassifierError::EmptyImage)
            | PredictError::Classifier(ClassifierError::Decode(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            PredictError::Classifier(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub label: Label,
    pub score: f32,
    pub display: String,
    pub sequence: u64,
    pub stale: bool,
}

/// Runs the full upload-to-label pipeline. The classifier is only invoked
/// once the model slot is ready; the outcome is published to the shared
/// prediction cell unless a newer upload was issued in the meantime.
#[instrument(skip(state, image_data))]
pub async fn predict_image(
    State(state): State<SharedState>,
    image_data: Bytes,
) -> Result<Json<PredictResponse>, PredictError> {
    state.metrics.record_request("predict");

    let classifier = state
        .model
        .ready_or_reason()
        .map_err(PredictError::ModelUnavailable)?;

    let sequence = state.predictions.issue();

    let started = Instant::now();
    let result = classifier.classify(&image_data);
    state
        .metrics
        .record_prediction_duration(started.elapsed().as_millis() as u64, "predict");

    let outcome = result.as_ref().map(|p| *p).map_err(|e| e.to_string());
    let published = state.predictions.publish(sequence, outcome);
    if !published {
        tracing::debug!(sequence, "discarding stale prediction");
        state.metrics.record_stale_prediction();
    }

    let prediction = result?;
    Ok(Json(PredictResponse {
        label: prediction.label,
        score: prediction.score,
        display: prediction.label.display().to_string(),
        sequence,
        stale: !published,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classifier::{Classifier, Prediction},
        state::{ModelSlot, PredictionCell, PLACEHOLDER_TEXT},
        telemetry::Metrics,
    };
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    struct StubClassifier {
        score: f32,
        calls: AtomicUsize,
    }

    impl StubClassifier {
        fn new(score: f32) -> Self {
            Self {
                score,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Classifier for StubClassifier {
        fn classify(&self, _image_data: &[u8]) -> Result<Prediction, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Prediction {
                label: Label::from_score(self.score, 0.5),
                score: self.score,
            })
        }
    }

    struct FailingClassifier;

    impl Classifier for FailingClassifier {
        fn classify(&self, _image_data: &[u8]) -> Result<Prediction, ClassifierError> {
            Err(ClassifierError::Decode("not an image".to_string()))
        }
    }

    fn shared_state() -> SharedState {
        SharedState {
            model: Arc::new(ModelSlot::new()),
            predictions: Arc::new(PredictionCell::new()),
            metrics: Arc::new(Metrics::new()),
        }
    }

    #[tokio::test]
    async fn test_no_inference_while_model_is_loading() {
        let state = shared_state();

        let result = predict_image(State(state.clone()), Bytes::from_static(b"fake")).await;

        assert!(matches!(result, Err(PredictError::ModelUnavailable(_))));
        assert_eq!(state.predictions.view().display, PLACEHOLDER_TEXT);
    }

    #[tokio::test]
    async fn test_failed_model_load_is_surfaced() {
        let state = shared_state();
        state.model.fail("model file not found".to_string());

        let result = predict_image(State(state.clone()), Bytes::from_static(b"fake")).await;

        match result {
            Err(PredictError::ModelUnavailable(reason)) => {
                assert!(reason.contains("model file not found"))
            }
            other => panic!("unexpected result: {:?}", other.map(|r| r.0)),
        }
    }

    #[tokio::test]
    async fn test_high_score_is_a_dog() {
        let state = shared_state();
        state.model.publish(Arc::new(StubClassifier::new(0.92)));

        let response = predict_image(State(state.clone()), Bytes::from_static(b"fake"))
            .await
            .unwrap();

        assert_eq!(response.0.display, "It's a Dog!");
        assert_eq!(response.0.label, Label::Dog);
        assert!(!response.0.stale);
        assert_eq!(state.predictions.view().display, "It's a Dog!");
    }

    #[tokio::test]
    async fn test_low_score_is_a_cat() {
        let state = shared_state();
        state.model.publish(Arc::new(StubClassifier::new(0.03)));

        let response = predict_image(State(state.clone()), Bytes::from_static(b"fake"))
            .await
            .unwrap();

        assert_eq!(response.0.display, "It's a Cat!");
        assert_eq!(response.0.label, Label::Cat);
    }

    #[tokio::test]
    async fn test_reupload_recomputes_instead_of_caching() {
        let state = shared_state();
        let stub = Arc::new(StubClassifier::new(0.92));
        state.model.publish(stub.clone());

        let first = predict_image(State(state.clone()), Bytes::from_static(b"same"))
            .await
            .unwrap();
        let second = predict_image(State(state.clone()), Bytes::from_static(b"same"))
            .await
            .unwrap();

        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.0.sequence, 1);
        assert_eq!(second.0.sequence, 2);
    }

    #[tokio::test]
    async fn test_classify_failure_is_published_and_returned() {
        let state = shared_state();
        state.model.publish(Arc::new(FailingClassifier));

        let result = predict_image(State(state.clone()), Bytes::from_static(b"fake")).await;

        assert!(matches!(
            result,
            Err(PredictError::Classifier(ClassifierError::Decode(_)))
        ));
        let view = state.predictions.view();
        assert!(view.display.starts_with("Prediction failed:"));
        assert_eq!(view.sequence, Some(1));
    }
}
