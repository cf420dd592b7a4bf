use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::health::check_health;
use crate::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = check_health(&state.health_checkers, state.started_at).await;

    let status = if response.status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status, Json(response))
}
