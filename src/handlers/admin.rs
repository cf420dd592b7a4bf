use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::config::settings::RuntimeSettings;
use crate::domain::{AuditEvent, WebhookDeadLetter};
use crate::error::AppError;
use crate::handlers::LimitQuery;
use crate::services::RepairReport;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub refund_reason_min_len: usize,
    pub refund_reason_max_len: usize,
    pub refund_evidence_max_items: usize,
    pub stale_refund_after_secs: u64,
    pub dead_letter_unknown_orders: bool,
}

impl From<&RuntimeSettings> for SettingsView {
    fn from(settings: &RuntimeSettings) -> Self {
        Self {
            refund_reason_min_len: settings.refund_reason_min_len,
            refund_reason_max_len: settings.refund_reason_max_len,
            refund_evidence_max_items: settings.refund_evidence_max_items,
            stale_refund_after_secs: settings.stale_refund_after.as_secs(),
            dead_letter_unknown_orders: settings.dead_letter_unknown_orders,
        }
    }
}

pub async fn reload_settings(State(state): State<AppState>) -> Result<Json<SettingsView>, AppError> {
    let settings = state
        .settings
        .reload()
        .await
        .map_err(|e| AppError::Internal(format!("settings reload failed: {}", e)))?;
    Ok(Json(SettingsView::from(settings.as_ref())))
}

pub async fn run_reconciliation(State(state): State<AppState>) -> Result<Json<RepairReport>, AppError> {
    Ok(Json(state.reconciliation.repair().await?))
}

pub async fn list_dead_letters(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<WebhookDeadLetter>>, AppError> {
    Ok(Json(state.reconciliation.dead_letters(query.or(50)).await?))
}

pub async fn audit_trail(
    State(state): State<AppState>,
    Path(target_id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<AuditEvent>>, AppError> {
    Ok(Json(state.reconciliation.audit_trail(target_id, query.or(50)).await?))
}
