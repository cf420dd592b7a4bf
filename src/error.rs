use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ports::{GatewayError, RepositoryError};
use crate::services::refund_workflow::RefundError;
use crate::services::transitions::PaymentError;
use crate::services::webhook_processor::WebhookError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Bad gateway: {0}")]
    BadGateway(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(what) => AppError::NotFound(what),
            RepositoryError::DuplicateOrderId(_) | RepositoryError::DuplicateActiveRequest(_) => {
                AppError::Conflict(e.to_string())
            }
            RepositoryError::Corrupt(_) | RepositoryError::Database(_) => {
                AppError::Internal(e.to_string())
            }
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::CircuitOpen => AppError::ServiceUnavailable(e.to_string()),
            _ => AppError::BadGateway(e.to_string()),
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::NotFound(what) => AppError::NotFound(what),
            PaymentError::DuplicateOrderId(_) => AppError::Conflict(e.to_string()),
            PaymentError::Validation(e) => e.into(),
            PaymentError::Transition(e) => AppError::Validation(e.to_string()),
            PaymentError::Gateway(e) => e.into(),
            PaymentError::Repository(e) => e.into(),
        }
    }
}

impl From<RefundError> for AppError {
    fn from(e: RefundError) -> Self {
        match e {
            RefundError::RequestNotFound(_) => AppError::NotFound(e.to_string()),
            RefundError::PaymentNotCaptured { .. }
            | RefundError::DuplicateActiveRequest(_)
            | RefundError::InvalidStatus { .. } => AppError::Conflict(e.to_string()),
            RefundError::AmountExceedsPayment { .. } => AppError::Validation(e.to_string()),
            RefundError::NotAParty => AppError::Forbidden(e.to_string()),
            RefundError::GatewayRefundFailed { .. } => AppError::BadGateway(e.to_string()),
            RefundError::Validation(e) => e.into(),
            RefundError::Payment(e) => e.into(),
            RefundError::Repository(e) => e.into(),
        }
    }
}

impl From<WebhookError> for AppError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::InvalidSignature => AppError::Unauthorized(e.to_string()),
            WebhookError::Malformed(_) => AppError::BadRequest(e.to_string()),
            WebhookError::NotYetRecorded(_) => AppError::Conflict(e.to_string()),
            WebhookError::Payment(_) | WebhookError::Refund(_) | WebhookError::Storage(_) => {
                AppError::Internal(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_validation_error_status_code() {
        let error = AppError::Validation("Invalid input".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_not_found_error_status_code() {
        let error = AppError::NotFound("Resource not found".to_string());
        assert_eq!(error.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_database_error_status_code() {
        let error = AppError::Database(sqlx::Error::RowNotFound);
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_unauthorized_error_status_code() {
        let error = AppError::Unauthorized("Unauthorized access".to_string());
        assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_repository_errors_map_to_http() {
        let missing: AppError = RepositoryError::NotFound("payment ord_1".to_string()).into();
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let duplicate: AppError = RepositoryError::DuplicateActiveRequest(Uuid::new_v4()).into();
        assert_eq!(duplicate.status_code(), StatusCode::CONFLICT);

        let database: AppError = RepositoryError::Database("connection reset".to_string()).into();
        assert_eq!(database.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_gateway_errors_map_to_http() {
        let rejected: AppError = GatewayError::Rejected("400".to_string()).into();
        assert_eq!(rejected.status_code(), StatusCode::BAD_GATEWAY);

        let open: AppError = GatewayError::CircuitOpen.into();
        assert_eq!(open.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_refund_errors_map_to_http() {
        let not_party: AppError = RefundError::NotAParty.into();
        assert_eq!(not_party.status_code(), StatusCode::FORBIDDEN);

        let failed: AppError = RefundError::GatewayRefundFailed {
            request_id: Uuid::new_v4(),
            reason: "insufficient balance".to_string(),
        }
        .into();
        assert_eq!(failed.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_webhook_errors_are_retryable() {
        let signature: AppError = WebhookError::InvalidSignature.into();
        assert_eq!(signature.status_code(), StatusCode::UNAUTHORIZED);

        let malformed: AppError = WebhookError::Malformed("missing type".to_string()).into();
        assert_eq!(malformed.status_code(), StatusCode::BAD_REQUEST);

        let pending: AppError = WebhookError::NotYetRecorded("rfnd_1".to_string()).into();
        assert_eq!(pending.status_code(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_error_response_body() {
        let response = AppError::Conflict("already refunded".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
