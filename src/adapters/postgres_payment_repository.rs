//! Postgres implementation of PaymentRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{is_unique_violation, parse_column};
use crate::domain::{
    Party, PaymentDraft, PaymentLookup, PaymentStatus, TransactionRecord, TransitionFields,
};
use crate::ports::{AppliedTransition, PaymentRepository, RepositoryError, RepositoryResult};

const PAYMENT_COLUMNS: &str = r#"
    p.id, p.order_id, p.gateway_order_id, p.gateway_payment_id, p.amount, p.currency,
    p.status, p.payer_id, p.payer_kind, p.recipient_id, p.recipient_kind, p.purpose,
    p.metadata, p.failure_reason, p.refund_id, p.refund_amount, p.refunded_at,
    p.created_at, p.updated_at
"#;

/// Postgres-backed payment store.
#[derive(Clone)]
pub struct PostgresPaymentRepository {
    pool: PgPool,
}

impl PostgresPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentRepository for PostgresPaymentRepository {
    async fn create(&self, draft: PaymentDraft) -> RepositoryResult<TransactionRecord> {
        let order_id = draft.order_id.clone();
        let record = TransactionRecord::from_draft(draft);

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            r#"
            INSERT INTO payments AS p (
                id, order_id, gateway_order_id, amount, currency, status,
                payer_id, payer_kind, recipient_id, recipient_kind, purpose, metadata,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(record.id)
        .bind(&record.order_id)
        .bind(&record.gateway_order_id)
        .bind(record.amount)
        .bind(&record.currency)
        .bind(record.status.as_str())
        .bind(&record.payer.id)
        .bind(record.payer.kind.as_str())
        .bind(record.recipient.as_ref().map(|r| r.id.clone()))
        .bind(record.recipient.as_ref().map(|r| r.kind.as_str()))
        .bind(record.purpose.as_str())
        .bind(Json(&record.metadata))
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::DuplicateOrderId(order_id)
            } else {
                RepositoryError::from(e)
            }
        })?;

        row.into_domain()
    }

    async fn get(&self, lookup: &PaymentLookup) -> RepositoryResult<TransactionRecord> {
        let base = format!("SELECT {} FROM payments p", PAYMENT_COLUMNS);
        let query = match lookup {
            PaymentLookup::Id(id) => {
                sqlx::query_as::<_, PaymentRow>(&format!("{} WHERE p.id = $1", base))
                    .bind(*id)
                    .fetch_optional(&self.pool)
                    .await
            }
            PaymentLookup::OrderId(order_id) => {
                sqlx::query_as::<_, PaymentRow>(&format!("{} WHERE p.order_id = $1", base))
                    .bind(order_id)
                    .fetch_optional(&self.pool)
                    .await
            }
            PaymentLookup::GatewayOrderId(gateway_order_id) => {
                sqlx::query_as::<_, PaymentRow>(&format!(
                    "{} WHERE p.gateway_order_id = $1",
                    base
                ))
                .bind(gateway_order_id)
                .fetch_optional(&self.pool)
                .await
            }
        };

        query
            .map_err(RepositoryError::from)?
            .ok_or_else(|| RepositoryError::NotFound(lookup.to_string()))?
            .into_domain()
    }

    async fn apply_transition(
        &self,
        id: Uuid,
        expected: &[PaymentStatus],
        next: PaymentStatus,
        fields: &TransitionFields,
    ) -> RepositoryResult<Option<AppliedTransition>> {
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();

        // One statement: the CTE locks the row, the UPDATE only matches when
        // the locked status is in the expected set.
        let row = sqlx::query_as::<_, AppliedRow>(&format!(
            r#"
            WITH prev AS (
                SELECT id, status FROM payments WHERE id = $1 FOR UPDATE
            )
            UPDATE payments AS p
            SET status = $2,
                gateway_payment_id = COALESCE($3, p.gateway_payment_id),
                failure_reason = COALESCE($4, p.failure_reason),
                refund_id = COALESCE($5, p.refund_id),
                refund_amount = COALESCE($6, p.refund_amount),
                refunded_at = COALESCE($7, p.refunded_at),
                updated_at = NOW()
            FROM prev
            WHERE p.id = prev.id AND prev.status = ANY($8)
            RETURNING prev.status AS previous_status, {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .bind(next.as_str())
        .bind(&fields.gateway_payment_id)
        .bind(&fields.failure_reason)
        .bind(&fields.refund_id)
        .bind(fields.refund_amount)
        .bind(fields.refunded_at)
        .bind(&expected)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        row.map(|r| {
            Ok(AppliedTransition {
                previous: parse_column("previous_status", &r.previous_status)?,
                record: r.payment.into_domain()?,
            })
        })
        .transpose()
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    order_id: String,
    gateway_order_id: String,
    gateway_payment_id: Option<String>,
    amount: i64,
    currency: String,
    status: String,
    payer_id: String,
    payer_kind: String,
    recipient_id: Option<String>,
    recipient_kind: Option<String>,
    purpose: String,
    metadata: Json<BTreeMap<String, String>>,
    failure_reason: Option<String>,
    refund_id: Option<String>,
    refund_amount: Option<i64>,
    refunded_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct AppliedRow {
    previous_status: String,
    #[sqlx(flatten)]
    payment: PaymentRow,
}

impl PaymentRow {
    fn into_domain(self) -> RepositoryResult<TransactionRecord> {
        let recipient = match (self.recipient_id, self.recipient_kind) {
            (Some(id), Some(kind)) => Some(Party::new(id, parse_column("recipient_kind", &kind)?)),
            _ => None,
        };

        Ok(TransactionRecord {
            id: self.id,
            order_id: self.order_id,
            gateway_order_id: self.gateway_order_id,
            gateway_payment_id: self.gateway_payment_id,
            amount: self.amount,
            currency: self.currency,
            status: parse_column("status", &self.status)?,
            payer: Party::new(self.payer_id, parse_column("payer_kind", &self.payer_kind)?),
            recipient,
            purpose: parse_column("purpose", &self.purpose)?,
            metadata: self.metadata.0,
            failure_reason: self.failure_reason,
            refund_id: self.refund_id,
            refund_amount: self.refund_amount,
            refunded_at: self.refunded_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
