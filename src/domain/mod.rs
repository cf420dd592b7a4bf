//! Domain layer: entities and transition rules, free of storage and HTTP.

pub mod audit;
pub mod dead_letter;
pub mod notification;
pub mod payment;
pub mod refund;
pub mod transition;

pub use audit::{Actor, ActorKind, AuditEvent};
pub use dead_letter::WebhookDeadLetter;
pub use notification::Notification;
pub use payment::{
    Party, PartyKind, PaymentDraft, PaymentLookup, PaymentPurpose, PaymentStatus, PaymentView,
    TransactionRecord,
};
pub use refund::{
    AdminResponse, Evidence, GatewayRefundOutcome, RefundDraft, RefundFilter, RefundRequest,
    RefundStatus, RefundUpdate, ReviewAction,
};
pub use transition::{
    AnomalyKind, NoMatch, TransitionError, TransitionFields, TransitionPlan, TransitionRequest,
};
