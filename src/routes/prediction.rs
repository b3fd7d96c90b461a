use crate::{server::SharedState, state::PredictionView};
use axum::{extract::State, response::Json};

pub async fn current_prediction(State(state): State<SharedState>) -> Json<PredictionView> {
    state.metrics.record_request("prediction");
    Json(state.predictions.view())
}
