//! Postgres implementations of the audit and dead-letter ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::parse_column;
use crate::domain::{Actor, AuditEvent, WebhookDeadLetter};
use crate::ports::{AuditSink, DeadLetterRepository, RepositoryResult};

#[derive(Clone)]
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    async fn record(&self, event: AuditEvent) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (
                id, actor_id, actor_kind, action, target_type, target_id,
                before_status, after_status, details, occurred_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.id)
        .bind(&event.actor.id)
        .bind(event.actor.kind.as_str())
        .bind(&event.action)
        .bind(&event.target_type)
        .bind(event.target_id)
        .bind(&event.before_status)
        .bind(&event.after_status)
        .bind(Json(&event.details))
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_target(
        &self,
        target_id: Uuid,
        limit: i64,
    ) -> RepositoryResult<Vec<AuditEvent>> {
        sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, actor_id, actor_kind, action, target_type, target_id,
                   before_status, after_status, details, occurred_at
            FROM audit_events
            WHERE target_id = $1
            ORDER BY occurred_at DESC
            LIMIT $2
            "#,
        )
        .bind(target_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(AuditRow::into_domain)
        .collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    actor_id: String,
    actor_kind: String,
    action: String,
    target_type: String,
    target_id: Uuid,
    before_status: Option<String>,
    after_status: Option<String>,
    details: Json<serde_json::Value>,
    occurred_at: DateTime<Utc>,
}

impl AuditRow {
    fn into_domain(self) -> RepositoryResult<AuditEvent> {
        Ok(AuditEvent {
            id: self.id,
            actor: Actor::new(self.actor_id, parse_column("actor_kind", &self.actor_kind)?),
            action: self.action,
            target_type: self.target_type,
            target_id: self.target_id,
            before_status: self.before_status,
            after_status: self.after_status,
            details: self.details.0,
            occurred_at: self.occurred_at,
        })
    }
}

#[derive(Clone)]
pub struct PostgresDeadLetterRepository {
    pool: PgPool,
}

impl PostgresDeadLetterRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterRepository for PostgresDeadLetterRepository {
    async fn record(&self, letter: WebhookDeadLetter) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_dead_letters (id, event_type, gateway_order_id, payload, reason, received_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(letter.id)
        .bind(&letter.event_type)
        .bind(&letter.gateway_order_id)
        .bind(Json(&letter.payload))
        .bind(&letter.reason)
        .bind(letter.received_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self, limit: i64) -> RepositoryResult<Vec<WebhookDeadLetter>> {
        let rows = sqlx::query_as::<_, (Uuid, String, String, Json<serde_json::Value>, String, DateTime<Utc>)>(
            r#"
            SELECT id, event_type, gateway_order_id, payload, reason, received_at
            FROM webhook_dead_letters
            ORDER BY received_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, event_type, gateway_order_id, payload, reason, received_at)| {
                    WebhookDeadLetter {
                        id,
                        event_type,
                        gateway_order_id,
                        payload: payload.0,
                        reason,
                        received_at,
                    }
                },
            )
            .collect())
    }
}
