//! Refund request domain entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::payment::Party;

/// Status of a human-reviewed refund request.
///
/// Non-terminal: `Pending`, `Approved`, `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Approved,
    Rejected,
    Processing,
    Processed,
    Failed,
}

impl RefundStatus {
    pub const ACTIVE: [RefundStatus; 3] = [
        RefundStatus::Pending,
        RefundStatus::Approved,
        RefundStatus::Processing,
    ];

    #[inline]
    pub fn is_active(&self) -> bool {
        RefundStatus::ACTIVE.contains(self)
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::Pending => "pending",
            RefundStatus::Approved => "approved",
            RefundStatus::Rejected => "rejected",
            RefundStatus::Processing => "processing",
            RefundStatus::Processed => "processed",
            RefundStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RefundStatus::Pending),
            "approved" => Ok(RefundStatus::Approved),
            "rejected" => Ok(RefundStatus::Rejected),
            "processing" => Ok(RefundStatus::Processing),
            "processed" => Ok(RefundStatus::Processed),
            "failed" => Ok(RefundStatus::Failed),
            other => Err(format!("unknown refund status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: String,
    pub url: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approved,
    Rejected,
}

/// The reviewer's decision. Written once, never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminResponse {
    pub reviewer_id: String,
    pub action: ReviewAction,
    pub reason: Option<String>,
    pub responded_at: DateTime<Utc>,
}

/// Input accepted by `RefundWorkflow::open`.
#[derive(Debug, Clone)]
pub struct RefundDraft {
    pub payment_id: Uuid,
    pub booking_id: Option<String>,
    pub requested_by: Party,
    pub amount: i64,
    pub reason: String,
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub booking_id: Option<String>,
    pub requested_by: Party,
    pub amount: i64,
    pub reason: String,
    pub evidence: Vec<Evidence>,
    pub status: RefundStatus,
    pub admin_response: Option<AdminResponse>,
    pub gateway_refund_id: Option<String>,
    pub gateway_refund_status: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefundRequest {
    pub fn from_draft(draft: RefundDraft) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            payment_id: draft.payment_id,
            booking_id: draft.booking_id,
            requested_by: draft.requested_by,
            amount: draft.amount,
            reason: draft.reason,
            evidence: draft.evidence,
            status: RefundStatus::Pending,
            admin_response: None,
            gateway_refund_id: None,
            gateway_refund_status: None,
            processed_at: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Fields written alongside a refund request status change.
///
/// `None` leaves the stored value untouched; `admin_response` is only written
/// when none is stored yet.
#[derive(Debug, Clone, Default)]
pub struct RefundUpdate {
    pub admin_response: Option<AdminResponse>,
    pub gateway_refund_id: Option<String>,
    pub gateway_refund_status: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

/// Outcome reported by the gateway for an issued refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayRefundOutcome {
    Succeeded,
    Failed { reason: String },
}

/// Filter for the paginated refund listing.
#[derive(Debug, Clone, Default)]
pub struct RefundFilter {
    pub payment_id: Option<Uuid>,
    pub status: Option<RefundStatus>,
    pub requested_by_id: Option<String>,
}

impl RefundFilter {
    pub fn matches(&self, request: &RefundRequest) -> bool {
        self.payment_id.map_or(true, |id| request.payment_id == id)
            && self.status.map_or(true, |s| request.status == s)
            && self
                .requested_by_id
                .as_deref()
                .map_or(true, |id| request.requested_by.id == id)
    }
}
