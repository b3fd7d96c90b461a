mod health;
mod index;
mod metrics;
mod predict;
mod prediction;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(index::demo_page))
        .route("/healthz", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/predict", post(predict::predict_image))
        .route("/prediction", get(prediction::current_prediction))
}
