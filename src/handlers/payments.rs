use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::{Actor, Party, PaymentLookup, PaymentPurpose, PaymentView};
use crate::error::AppError;
use crate::services::{NewPayment, OutcomeKind};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub order_id: String,
    pub amount: i64,
    pub currency: Option<String>,
    pub payer: Party,
    pub recipient: Option<Party>,
    pub purpose: PaymentPurpose,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub outcome: OutcomeKind,
    pub payment: PaymentView,
}

pub async fn create_payment(
    State(state): State<AppState>,
    Json(body): Json<CreatePaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .payments
        .create(NewPayment {
            order_id: body.order_id,
            amount: body.amount,
            currency: body.currency,
            payer: body.payer,
            recipient: body.recipient,
            purpose: body.purpose,
            metadata: body.metadata,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(PaymentView::from(record))))
}

pub async fn begin_checkout(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CheckoutResponse>, AppError> {
    let outcome = state
        .payments
        .begin_checkout(&PaymentLookup::Id(id), Actor::system())
        .await?;

    Ok(Json(CheckoutResponse {
        outcome: outcome.kind(),
        payment: outcome.record().clone().into(),
    }))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentView>, AppError> {
    lookup(&state, PaymentLookup::Id(id)).await
}

pub async fn get_payment_by_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<PaymentView>, AppError> {
    lookup(&state, PaymentLookup::OrderId(order_id)).await
}

pub async fn get_payment_by_gateway_order(
    State(state): State<AppState>,
    Path(gateway_order_id): Path<String>,
) -> Result<Json<PaymentView>, AppError> {
    lookup(&state, PaymentLookup::GatewayOrderId(gateway_order_id)).await
}

async fn lookup(state: &AppState, lookup: PaymentLookup) -> Result<Json<PaymentView>, AppError> {
    Ok(Json(state.reconciliation.get_transaction(&lookup).await?))
}
