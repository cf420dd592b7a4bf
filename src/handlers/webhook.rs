use axum::{body::Bytes, extract::State, http::HeaderMap, Json};

use crate::error::AppError;
use crate::gateway::SIGNATURE_HEADER;
use crate::services::WebhookAck;
use crate::AppState;

/// Gateway callback endpoint. The body is taken raw so the signature is
/// checked over the exact bytes that were signed.
pub async fn gateway_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok());

    let ack = state.webhooks.process(&body, signature).await?;
    Ok(Json(ack))
}
