//! Read side and the refund repair pass.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use crate::config::settings::SettingsStore;
use crate::domain::{
    Actor, AuditEvent, GatewayRefundOutcome, PaymentLookup, PaymentStatus, PaymentView,
    RefundFilter, RefundRequest, RefundStatus, WebhookDeadLetter,
};
use crate::ports::{
    AuditSink, DeadLetterRepository, PageRequest, PaymentRepository, RefundRepository,
    RepositoryResult,
};
use crate::services::refund_workflow::{RefundError, RefundWorkflow};
use crate::services::transitions::PaymentError;
use crate::utils::cursor;
use crate::validation::ValidationError;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundPage {
    pub items: Vec<RefundRequest>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub examined: usize,
    pub repaired: Vec<Uuid>,
    pub stale: Vec<Uuid>,
    pub errors: usize,
}

pub struct ReconciliationService {
    payments: Arc<dyn PaymentRepository>,
    refunds: Arc<dyn RefundRepository>,
    audit: Arc<dyn AuditSink>,
    dead_letters: Arc<dyn DeadLetterRepository>,
    workflow: Arc<RefundWorkflow>,
    settings: Arc<SettingsStore>,
}

impl ReconciliationService {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        refunds: Arc<dyn RefundRepository>,
        audit: Arc<dyn AuditSink>,
        dead_letters: Arc<dyn DeadLetterRepository>,
        workflow: Arc<RefundWorkflow>,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            payments,
            refunds,
            audit,
            dead_letters,
            workflow,
            settings,
        }
    }

    pub async fn get_transaction(&self, lookup: &PaymentLookup) -> Result<PaymentView, PaymentError> {
        Ok(self.payments.get(lookup).await?.into())
    }

    /// Newest first. `page_cursor` is the `next_cursor` of the previous page.
    pub async fn list_refund_requests(
        &self,
        filter: &RefundFilter,
        limit: Option<i64>,
        page_cursor: Option<&str>,
    ) -> Result<RefundPage, RefundError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let after = page_cursor
            .map(cursor::decode)
            .transpose()
            .map_err(|e| ValidationError::new("cursor", e))?;

        let mut items = self
            .refunds
            .list(
                filter,
                PageRequest {
                    limit: limit + 1,
                    after,
                },
            )
            .await?;

        let next_cursor = if items.len() as i64 > limit {
            items.truncate(limit as usize);
            items.last().map(|last| cursor::encode(last.created_at, last.id))
        } else {
            None
        };

        Ok(RefundPage { items, next_cursor })
    }

    pub async fn audit_trail(&self, target_id: Uuid, limit: i64) -> RepositoryResult<Vec<AuditEvent>> {
        self.audit
            .list_for_target(target_id, limit.clamp(1, MAX_PAGE_SIZE))
            .await
    }

    pub async fn dead_letters(&self, limit: i64) -> RepositoryResult<Vec<WebhookDeadLetter>> {
        self.dead_letters.list(limit.clamp(1, MAX_PAGE_SIZE)).await
    }

    /// Finishes refunds whose payment already moved to `refunded` while the
    /// request stayed in `processing`, and raises an alert for requests that
    /// have waited longer than the configured timeout. That includes requests
    /// left in `approved` when recording the gateway refund failed.
    pub async fn repair(&self) -> Result<RepairReport, RefundError> {
        let now = Utc::now();
        let stale_before = now - stale_after(&self.settings);
        let processing = self
            .refunds
            .list_in_status_updated_before(RefundStatus::Processing, now)
            .await?;

        let unsubmitted = self
            .refunds
            .list_in_status_updated_before(RefundStatus::Approved, stale_before)
            .await?;

        let mut report = RepairReport {
            examined: processing.len() + unsubmitted.len(),
            ..Default::default()
        };

        for request in processing {
            match self.repair_one(&request).await {
                Ok(true) => report.repaired.push(request.id),
                Ok(false) if request.updated_at < stale_before => {
                    alert_stale(&request);
                    report.stale.push(request.id);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(refund_request_id = %request.id, error = %e, "Refund repair failed");
                    report.errors += 1;
                }
            }
        }

        for request in unsubmitted {
            alert_stale(&request);
            report.stale.push(request.id);
        }

        tracing::info!(
            examined = report.examined,
            repaired = report.repaired.len(),
            stale = report.stale.len(),
            errors = report.errors,
            "Refund repair pass finished"
        );
        Ok(report)
    }

    async fn repair_one(&self, request: &RefundRequest) -> Result<bool, RefundError> {
        let payment = self
            .payments
            .get(&PaymentLookup::Id(request.payment_id))
            .await
            .map_err(PaymentError::from)?;

        let refunded_by_this_request = payment.status == PaymentStatus::Refunded
            && payment.refund_id.is_some()
            && payment.refund_id == request.gateway_refund_id;
        if !refunded_by_this_request {
            return Ok(false);
        }

        tracing::warn!(
            refund_request_id = %request.id,
            payment_id = %payment.id,
            "Re-driving partially completed refund"
        );
        self.workflow
            .reconcile_gateway_outcome(request.id, GatewayRefundOutcome::Succeeded, Actor::system())
            .await?;
        Ok(true)
    }

    /// Requests left in `processing` or `approved` past the configured
    /// timeout. Each one is logged as an operational alert; nothing is changed.
    pub async fn stale_refunds(&self) -> Result<Vec<RefundRequest>, RefundError> {
        let stale_before = Utc::now() - stale_after(&self.settings);
        let mut stale = Vec::new();
        for status in [RefundStatus::Processing, RefundStatus::Approved] {
            stale.extend(
                self.refunds
                    .list_in_status_updated_before(status, stale_before)
                    .await?,
            );
        }

        for request in &stale {
            alert_stale(request);
        }
        Ok(stale)
    }
}

fn stale_after(settings: &SettingsStore) -> ChronoDuration {
    ChronoDuration::from_std(settings.current().stale_refund_after)
        .unwrap_or_else(|_| ChronoDuration::hours(24))
}

fn alert_stale(request: &RefundRequest) {
    tracing::error!(
        refund_request_id = %request.id,
        payment_id = %request.payment_id,
        status = %request.status,
        gateway_refund_id = ?request.gateway_refund_id,
        since = %request.updated_at,
        "Refund stuck waiting on the gateway"
    );
}

/// Runs the repair pass every `interval` until the task is dropped.
pub async fn run_reconciler(service: Arc<ReconciliationService>, interval: Duration) {
    tracing::info!(interval_secs = interval.as_secs(), "Refund reconciler started");

    loop {
        sleep(interval).await;

        if let Err(e) = service.repair().await {
            tracing::error!(error = %e, "Refund repair pass error");
        }
    }
}
