//! Payment state transition rules.
//!
//! Pure functions only: which states a transition may start from, which
//! fields it writes, and how a transition that found no matching record is
//! classified. Storage applies the resulting plan as one conditional update.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use super::payment::{PaymentStatus, TransactionRecord};

use PaymentStatus::*;

/// Directed edges of the payment lifecycle graph.
const EDGES: &[(PaymentStatus, PaymentStatus)] = &[
    (Created, Pending),
    (Pending, Authorized),
    (Authorized, Captured),
    (Captured, Refunded),
    (Created, Failed),
    (Pending, Failed),
    (Authorized, Failed),
];

/// True when `to` is reachable from `from` along the lifecycle graph.
///
/// Gateway signals may skip intermediate states (a capture can arrive for an
/// order that never reported authorization), so reachability rather than a
/// single edge is what makes a transition legal.
pub fn is_reachable(from: PaymentStatus, to: PaymentStatus) -> bool {
    if from == to {
        return false;
    }
    EDGES
        .iter()
        .filter(|(src, _)| *src == from)
        .any(|(_, dst)| *dst == to || is_reachable(*dst, to))
}

/// A requested change to a payment's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionRequest {
    BeginCheckout,
    Authorize {
        gateway_payment_id: Option<String>,
    },
    Capture {
        gateway_payment_id: String,
    },
    Fail {
        gateway_payment_id: Option<String>,
        reason: Option<String>,
    },
    Refund {
        refund_id: String,
        amount: i64,
    },
}

impl TransitionRequest {
    pub fn action(&self) -> &'static str {
        match self {
            TransitionRequest::BeginCheckout => "payment.begin_checkout",
            TransitionRequest::Authorize { .. } => "payment.authorize",
            TransitionRequest::Capture { .. } => "payment.capture",
            TransitionRequest::Fail { .. } => "payment.fail",
            TransitionRequest::Refund { .. } => "payment.refund",
        }
    }

    /// Checks that depend on the record's immutable fields, run before the
    /// conditional update is attempted.
    pub fn validate(&self, record: &TransactionRecord) -> Result<(), TransitionError> {
        match self {
            TransitionRequest::Capture { gateway_payment_id } if gateway_payment_id.is_empty() => {
                Err(TransitionError::MissingPaymentId)
            }
            TransitionRequest::Refund { refund_id, .. } if refund_id.is_empty() => {
                Err(TransitionError::MissingRefundId)
            }
            TransitionRequest::Refund { amount, .. } if *amount <= 0 => {
                Err(TransitionError::InvalidRefundAmount(*amount))
            }
            TransitionRequest::Refund { amount, .. } if *amount > record.amount => {
                Err(TransitionError::RefundExceedsAmount {
                    requested: *amount,
                    captured: record.amount,
                })
            }
            _ => Ok(()),
        }
    }

    /// Builds the conditional update for this request.
    pub fn plan(&self, now: DateTime<Utc>) -> TransitionPlan {
        match self {
            TransitionRequest::BeginCheckout => TransitionPlan {
                expected: &[Created],
                next: Pending,
                fields: TransitionFields::default(),
            },
            TransitionRequest::Authorize { gateway_payment_id } => TransitionPlan {
                expected: &[Created, Pending],
                next: Authorized,
                fields: TransitionFields {
                    gateway_payment_id: gateway_payment_id.clone(),
                    ..Default::default()
                },
            },
            TransitionRequest::Capture { gateway_payment_id } => TransitionPlan {
                expected: &[Created, Pending, Authorized],
                next: Captured,
                fields: TransitionFields {
                    gateway_payment_id: Some(gateway_payment_id.clone()),
                    ..Default::default()
                },
            },
            TransitionRequest::Fail {
                gateway_payment_id,
                reason,
            } => TransitionPlan {
                expected: &[Created, Pending, Authorized],
                next: Failed,
                fields: TransitionFields {
                    gateway_payment_id: gateway_payment_id.clone(),
                    failure_reason: reason.clone(),
                    ..Default::default()
                },
            },
            TransitionRequest::Refund { refund_id, amount } => TransitionPlan {
                expected: &[Captured],
                next: Refunded,
                fields: TransitionFields {
                    refund_id: Some(refund_id.clone()),
                    refund_amount: Some(*amount),
                    refunded_at: Some(now),
                    ..Default::default()
                },
            },
        }
    }

    /// Classifies a request whose conditional update matched nothing, given
    /// the record as it stands now.
    pub fn classify_no_match(&self, current: &TransactionRecord) -> NoMatch {
        match (self, current.status) {
            (TransitionRequest::BeginCheckout, Pending) => NoMatch::Duplicate,
            (TransitionRequest::Authorize { gateway_payment_id }, Authorized) => {
                if gateway_payment_id.is_none()
                    || *gateway_payment_id == current.gateway_payment_id
                {
                    NoMatch::Duplicate
                } else {
                    NoMatch::Stale
                }
            }
            (TransitionRequest::Capture { gateway_payment_id }, Captured | Refunded) => {
                if current.gateway_payment_id.as_deref() == Some(gateway_payment_id.as_str()) {
                    NoMatch::Duplicate
                } else {
                    NoMatch::Anomaly(AnomalyKind::ConflictingCapture)
                }
            }
            (TransitionRequest::Capture { .. }, Failed) => {
                NoMatch::Anomaly(AnomalyKind::CaptureAfterFailure)
            }
            (TransitionRequest::Fail { .. }, Failed) => NoMatch::Duplicate,
            (TransitionRequest::Fail { .. }, Captured | Refunded) => {
                NoMatch::Anomaly(AnomalyKind::LateFailure)
            }
            (TransitionRequest::Refund { refund_id, .. }, Refunded) => {
                if current.refund_id.as_deref() == Some(refund_id.as_str()) {
                    NoMatch::Duplicate
                } else {
                    NoMatch::Anomaly(AnomalyKind::ConflictingRefund)
                }
            }
            _ => NoMatch::Stale,
        }
    }
}

/// Fields written together with the status. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionFields {
    pub gateway_payment_id: Option<String>,
    pub failure_reason: Option<String>,
    pub refund_id: Option<String>,
    pub refund_amount: Option<i64>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl TransitionFields {
    /// Writes the set fields onto `record`.
    pub fn apply_to(&self, record: &mut TransactionRecord) {
        if let Some(id) = &self.gateway_payment_id {
            record.gateway_payment_id = Some(id.clone());
        }
        if let Some(reason) = &self.failure_reason {
            record.failure_reason = Some(reason.clone());
        }
        if let Some(id) = &self.refund_id {
            record.refund_id = Some(id.clone());
        }
        if let Some(amount) = self.refund_amount {
            record.refund_amount = Some(amount);
        }
        if let Some(at) = self.refunded_at {
            record.refunded_at = Some(at);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub expected: &'static [PaymentStatus],
    pub next: PaymentStatus,
    pub fields: TransitionFields,
}

/// Why a conditional update matched nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoMatch {
    /// The same transition was already applied.
    Duplicate,
    /// The record moved past the point where this request matters.
    Stale,
    /// The gateway reported something inconsistent with the stored record.
    Anomaly(AnomalyKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    ConflictingCapture,
    CaptureAfterFailure,
    LateFailure,
    ConflictingRefund,
    UnknownRefund,
    RefundFailedAfterProcessed,
    RefundProcessedAfterFailure,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::ConflictingCapture => "conflicting_capture",
            AnomalyKind::CaptureAfterFailure => "capture_after_failure",
            AnomalyKind::LateFailure => "late_failure",
            AnomalyKind::ConflictingRefund => "conflicting_refund",
            AnomalyKind::UnknownRefund => "unknown_refund",
            AnomalyKind::RefundFailedAfterProcessed => "refund_failed_after_processed",
            AnomalyKind::RefundProcessedAfterFailure => "refund_processed_after_failure",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("capture requires a gateway payment id")]
    MissingPaymentId,

    #[error("refund requires a refund id")]
    MissingRefundId,

    #[error("refund amount must be positive, got {0}")]
    InvalidRefundAmount(i64),

    #[error("refund amount {requested} exceeds payment amount {captured}")]
    RefundExceedsAmount { requested: i64, captured: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::{Party, PartyKind, PaymentDraft, PaymentPurpose};
    use std::collections::BTreeMap;

    fn record_with(status: PaymentStatus) -> TransactionRecord {
        let mut record = TransactionRecord::from_draft(PaymentDraft {
            order_id: "ord_1".to_string(),
            gateway_order_id: "gw_order_1".to_string(),
            amount: 150_000,
            currency: "INR".to_string(),
            payer: Party::new("u1", PartyKind::User),
            recipient: Some(Party::new("a1", PartyKind::Artisan)),
            purpose: PaymentPurpose::Service,
            metadata: BTreeMap::new(),
        });
        record.status = status;
        record
    }

    #[test]
    fn test_reachability_follows_graph() {
        assert!(is_reachable(Created, Pending));
        assert!(is_reachable(Created, Captured));
        assert!(is_reachable(Authorized, Refunded));
        assert!(is_reachable(Pending, Failed));

        assert!(!is_reachable(Captured, Failed));
        assert!(!is_reachable(Failed, Captured));
        assert!(!is_reachable(Refunded, Captured));
        assert!(!is_reachable(Captured, Captured));
    }

    #[test]
    fn test_every_plan_only_uses_legal_edges() {
        let now = Utc::now();
        let requests = [
            TransitionRequest::BeginCheckout,
            TransitionRequest::Authorize {
                gateway_payment_id: None,
            },
            TransitionRequest::Capture {
                gateway_payment_id: "p1".to_string(),
            },
            TransitionRequest::Fail {
                gateway_payment_id: None,
                reason: None,
            },
            TransitionRequest::Refund {
                refund_id: "r1".to_string(),
                amount: 1,
            },
        ];

        for request in requests {
            let plan = request.plan(now);
            for from in plan.expected {
                assert!(
                    is_reachable(*from, plan.next),
                    "{} -> {} is not a legal transition",
                    from,
                    plan.next
                );
            }
        }
    }

    #[test]
    fn test_fail_never_planned_from_captured() {
        let plan = TransitionRequest::Fail {
            gateway_payment_id: None,
            reason: None,
        }
        .plan(Utc::now());
        assert!(!plan.expected.contains(&Captured));
        assert!(!plan.expected.contains(&Refunded));
    }

    #[test]
    fn test_duplicate_capture_with_same_payment_id() {
        let mut current = record_with(Captured);
        current.gateway_payment_id = Some("p1".to_string());

        let request = TransitionRequest::Capture {
            gateway_payment_id: "p1".to_string(),
        };
        assert_eq!(request.classify_no_match(&current), NoMatch::Duplicate);
    }

    #[test]
    fn test_conflicting_capture_is_anomaly() {
        let mut current = record_with(Captured);
        current.gateway_payment_id = Some("p1".to_string());

        let request = TransitionRequest::Capture {
            gateway_payment_id: "p2".to_string(),
        };
        assert_eq!(
            request.classify_no_match(&current),
            NoMatch::Anomaly(AnomalyKind::ConflictingCapture)
        );
    }

    #[test]
    fn test_late_failure_after_capture_is_anomaly() {
        let request = TransitionRequest::Fail {
            gateway_payment_id: Some("p1".to_string()),
            reason: Some("bank declined".to_string()),
        };
        assert_eq!(
            request.classify_no_match(&record_with(Captured)),
            NoMatch::Anomaly(AnomalyKind::LateFailure)
        );
        assert_eq!(
            request.classify_no_match(&record_with(Failed)),
            NoMatch::Duplicate
        );
    }

    #[test]
    fn test_refund_idempotent_on_refund_id() {
        let mut current = record_with(Refunded);
        current.refund_id = Some("r1".to_string());

        let same = TransitionRequest::Refund {
            refund_id: "r1".to_string(),
            amount: 150_000,
        };
        let other = TransitionRequest::Refund {
            refund_id: "r2".to_string(),
            amount: 150_000,
        };
        assert_eq!(same.classify_no_match(&current), NoMatch::Duplicate);
        assert_eq!(
            other.classify_no_match(&current),
            NoMatch::Anomaly(AnomalyKind::ConflictingRefund)
        );
    }

    #[test]
    fn test_refund_amount_bound() {
        let record = record_with(Captured);
        let too_much = TransitionRequest::Refund {
            refund_id: "r1".to_string(),
            amount: 150_001,
        };
        let exact = TransitionRequest::Refund {
            refund_id: "r1".to_string(),
            amount: 150_000,
        };

        assert_eq!(
            too_much.validate(&record),
            Err(TransitionError::RefundExceedsAmount {
                requested: 150_001,
                captured: 150_000
            })
        );
        assert!(exact.validate(&record).is_ok());
    }

    #[test]
    fn test_fields_apply_only_set_values() {
        let mut record = record_with(Authorized);
        record.gateway_payment_id = Some("p1".to_string());

        TransitionFields {
            failure_reason: Some("timeout".to_string()),
            ..Default::default()
        }
        .apply_to(&mut record);

        assert_eq!(record.gateway_payment_id.as_deref(), Some("p1"));
        assert_eq!(record.failure_reason.as_deref(), Some("timeout"));
    }
}
