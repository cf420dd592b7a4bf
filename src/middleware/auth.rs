use axum::{
    extract::State,
    http::{header::AUTHORIZATION, Request},
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::AppState;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Guards admin routes. Accepts `Authorization: Bearer <key>`, a bare key in
/// `Authorization`, or the `X-Admin-Key` header.
pub async fn admin_auth<B>(
    State(state): State<AppState>,
    req: Request<B>,
    next: Next<B>,
) -> Result<Response, AppError> {
    let headers = req.headers();
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(|auth| auth.strip_prefix("Bearer ").unwrap_or(auth))
        .or_else(|| headers.get(ADMIN_KEY_HEADER).and_then(|h| h.to_str().ok()));

    let authorized = presented.map_or(false, |key| keys_match(key.trim(), &state.admin_api_key));

    if authorized {
        Ok(next.run(req).await)
    } else {
        tracing::warn!(uri = %req.uri(), "Rejected admin request");
        Err(AppError::Unauthorized("invalid admin API key".to_string()))
    }
}

fn keys_match(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
