use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{Evidence, Party, RefundDraft, RefundFilter, RefundRequest, RefundStatus};
use crate::error::AppError;
use crate::services::RefundPage;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRefundRequest {
    pub payment_id: Uuid,
    pub booking_id: Option<String>,
    pub requested_by: Party,
    pub amount: i64,
    pub reason: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRefundsQuery {
    pub payment_id: Option<Uuid>,
    pub status: Option<RefundStatus>,
    pub requested_by: Option<String>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRefundBody {
    pub reviewer_id: String,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectRefundBody {
    pub reviewer_id: String,
    pub reason: String,
}

pub async fn open_refund(
    State(state): State<AppState>,
    Json(body): Json<OpenRefundRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request = state
        .refunds
        .open(RefundDraft {
            payment_id: body.payment_id,
            booking_id: body.booking_id,
            requested_by: body.requested_by,
            amount: body.amount,
            reason: body.reason,
            evidence: body.evidence,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn list_refunds(
    State(state): State<AppState>,
    Query(query): Query<ListRefundsQuery>,
) -> Result<Json<RefundPage>, AppError> {
    let filter = RefundFilter {
        payment_id: query.payment_id,
        status: query.status,
        requested_by_id: query.requested_by,
    };

    let page = state
        .reconciliation
        .list_refund_requests(&filter, query.limit, query.cursor.as_deref())
        .await?;
    Ok(Json(page))
}

pub async fn get_refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RefundRequest>, AppError> {
    Ok(Json(state.refunds.get(id).await?))
}

pub async fn approve_refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ApproveRefundBody>,
) -> Result<Json<RefundRequest>, AppError> {
    let request = state
        .refunds
        .approve(id, &body.reviewer_id, body.note)
        .await?;
    Ok(Json(request))
}

pub async fn reject_refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RejectRefundBody>,
) -> Result<Json<RefundRequest>, AppError> {
    let request = state
        .refunds
        .reject(id, &body.reviewer_id, body.reason)
        .await?;
    Ok(Json(request))
}
