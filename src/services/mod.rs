pub mod notifier;
pub mod payments;
pub mod reconciliation;
pub mod refund_workflow;
pub mod transitions;
pub mod webhook_processor;

pub use notifier::{HttpNotifier, LogNotifier, NotificationDispatcher};
pub use payments::{NewPayment, PaymentService};
pub use reconciliation::{ReconciliationService, RefundPage, RepairReport};
pub use refund_workflow::{RefundError, RefundWorkflow};
pub use transitions::{OutcomeKind, PaymentError, TransitionOutcome, TransitionService};
pub use webhook_processor::{WebhookAck, WebhookError, WebhookProcessor};

use crate::domain::AuditEvent;
use crate::ports::AuditSink;

/// Records an audit event for a change that already committed. A failing
/// sink is logged; the change itself stands.
pub(crate) async fn emit_audit(sink: &dyn AuditSink, event: AuditEvent) {
    let action = event.action.clone();
    let target_id = event.target_id;
    if let Err(e) = sink.record(event).await {
        tracing::error!(action = %action, target_id = %target_id, error = %e, "Failed to record audit event");
    }
}
