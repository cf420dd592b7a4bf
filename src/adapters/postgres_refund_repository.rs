//! Postgres implementation of RefundRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{is_unique_violation, parse_column};
use crate::domain::{
    AdminResponse, Evidence, Party, RefundFilter, RefundRequest, RefundStatus, RefundUpdate,
};
use crate::ports::{PageRequest, RefundRepository, RepositoryError, RepositoryResult};

const REFUND_COLUMNS: &str = r#"
    id, payment_id, booking_id, requested_by_id, requested_by_kind, amount, reason,
    evidence, status, admin_response, gateway_refund_id, gateway_refund_status,
    processed_at, failure_reason, created_at, updated_at
"#;

#[derive(Clone)]
pub struct PostgresRefundRepository {
    pool: PgPool,
}

impl PostgresRefundRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        value: impl ToString,
    ) -> RepositoryResult<Option<RefundRequest>> {
        sqlx::query_as::<_, RefundRow>(&format!(
            "SELECT {} FROM refund_requests WHERE {}",
            REFUND_COLUMNS, clause
        ))
        .bind(value.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?
        .map(RefundRow::into_domain)
        .transpose()
    }
}

#[async_trait]
impl RefundRepository for PostgresRefundRepository {
    async fn insert(&self, request: RefundRequest) -> RepositoryResult<RefundRequest> {
        let payment_id = request.payment_id;

        let row = sqlx::query_as::<_, RefundRow>(&format!(
            r#"
            INSERT INTO refund_requests (
                id, payment_id, booking_id, requested_by_id, requested_by_kind, amount,
                reason, evidence, status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            REFUND_COLUMNS
        ))
        .bind(request.id)
        .bind(request.payment_id)
        .bind(&request.booking_id)
        .bind(&request.requested_by.id)
        .bind(request.requested_by.kind.as_str())
        .bind(request.amount)
        .bind(&request.reason)
        .bind(Json(&request.evidence))
        .bind(request.status.as_str())
        .bind(request.created_at)
        .bind(request.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::DuplicateActiveRequest(payment_id)
            } else {
                RepositoryError::from(e)
            }
        })?;

        row.into_domain()
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<RefundRequest> {
        sqlx::query_as::<_, RefundRow>(&format!(
            "SELECT {} FROM refund_requests WHERE id = $1",
            REFUND_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?
        .ok_or_else(|| RepositoryError::NotFound(format!("refund request {}", id)))?
        .into_domain()
    }

    async fn find_by_gateway_refund_id(
        &self,
        gateway_refund_id: &str,
    ) -> RepositoryResult<Option<RefundRequest>> {
        self.fetch_one_where("gateway_refund_id = $1", gateway_refund_id)
            .await
    }

    async fn find_active_for_payment(
        &self,
        payment_id: Uuid,
    ) -> RepositoryResult<Option<RefundRequest>> {
        self.fetch_one_where(
            "payment_id = $1::uuid AND status IN ('pending', 'approved', 'processing')",
            payment_id,
        )
        .await
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: &[RefundStatus],
        next: RefundStatus,
        update: &RefundUpdate,
    ) -> RepositoryResult<Option<RefundRequest>> {
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();

        sqlx::query_as::<_, RefundRow>(&format!(
            r#"
            UPDATE refund_requests
            SET status = $1,
                admin_response = COALESCE(admin_response, $2),
                gateway_refund_id = COALESCE($3, gateway_refund_id),
                gateway_refund_status = COALESCE($4, gateway_refund_status),
                processed_at = COALESCE($5, processed_at),
                failure_reason = COALESCE($6, failure_reason),
                updated_at = NOW()
            WHERE id = $7 AND status = ANY($8)
            RETURNING {}
            "#,
            REFUND_COLUMNS
        ))
        .bind(next.as_str())
        .bind(update.admin_response.as_ref().map(Json))
        .bind(&update.gateway_refund_id)
        .bind(&update.gateway_refund_status)
        .bind(update.processed_at)
        .bind(&update.failure_reason)
        .bind(id)
        .bind(&expected)
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?
        .map(RefundRow::into_domain)
        .transpose()
    }

    async fn list(
        &self,
        filter: &RefundFilter,
        page: PageRequest,
    ) -> RepositoryResult<Vec<RefundRequest>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM refund_requests WHERE TRUE",
            REFUND_COLUMNS
        ));

        if let Some(payment_id) = filter.payment_id {
            builder.push(" AND payment_id = ").push_bind(payment_id);
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(requested_by_id) = &filter.requested_by_id {
            builder
                .push(" AND requested_by_id = ")
                .push_bind(requested_by_id.clone());
        }
        if let Some((created_at, id)) = page.after {
            builder
                .push(" AND (created_at, id) < (")
                .push_bind(created_at)
                .push(", ")
                .push_bind(id)
                .push(")");
        }
        builder
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit);

        builder
            .build_query_as::<RefundRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?
            .into_iter()
            .map(RefundRow::into_domain)
            .collect()
    }

    async fn list_in_status_updated_before(
        &self,
        status: RefundStatus,
        updated_before: DateTime<Utc>,
    ) -> RepositoryResult<Vec<RefundRequest>> {
        sqlx::query_as::<_, RefundRow>(&format!(
            r#"
            SELECT {} FROM refund_requests
            WHERE status = $1 AND updated_at < $2
            ORDER BY updated_at ASC
            "#,
            REFUND_COLUMNS
        ))
        .bind(status.as_str())
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?
        .into_iter()
        .map(RefundRow::into_domain)
        .collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RefundRow {
    id: Uuid,
    payment_id: Uuid,
    booking_id: Option<String>,
    requested_by_id: String,
    requested_by_kind: String,
    amount: i64,
    reason: String,
    evidence: Json<Vec<Evidence>>,
    status: String,
    admin_response: Option<Json<AdminResponse>>,
    gateway_refund_id: Option<String>,
    gateway_refund_status: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RefundRow {
    fn into_domain(self) -> RepositoryResult<RefundRequest> {
        Ok(RefundRequest {
            id: self.id,
            payment_id: self.payment_id,
            booking_id: self.booking_id,
            requested_by: Party::new(
                self.requested_by_id,
                parse_column("requested_by_kind", &self.requested_by_kind)?,
            ),
            amount: self.amount,
            reason: self.reason,
            evidence: self.evidence.0,
            status: parse_column("status", &self.status)?,
            admin_response: self.admin_response.map(|r| r.0),
            gateway_refund_id: self.gateway_refund_id,
            gateway_refund_status: self.gateway_refund_status,
            processed_at: self.processed_at,
            failure_reason: self.failure_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
