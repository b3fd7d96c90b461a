use crate::{server::SharedState, state::ModelStatusView};
use axum::{extract::State, response::IntoResponse, response::Json};
use serde::Serialize;

#[derive(Serialize)]
pub struct Status {
    status: String,
    model: ModelStatusView,
}

pub async fn healthcheck(State(state): State<SharedState>) -> impl IntoResponse {
    Json(Status {
        status: "Available".into(),
        model: state.model.describe(),
    })
}
