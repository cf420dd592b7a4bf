pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod ports;
pub mod services;
pub mod startup;
pub mod utils;
pub mod validation;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;

use crate::config::settings::SettingsStore;
use crate::health::DependencyChecker;
use crate::ports::{
    AuditSink, DeadLetterRepository, GatewayClient, Notifier, PaymentRepository,
    RefundRepository, SignatureVerifier,
};
use crate::services::{
    NotificationDispatcher, PaymentService, ReconciliationService, RefundWorkflow,
    TransitionService, WebhookProcessor,
};

/// Collaborators the services are built from. `serve` fills it with the
/// Postgres and HTTP adapters, tests with the in-memory ones.
pub struct Dependencies {
    pub payments: Arc<dyn PaymentRepository>,
    pub refunds: Arc<dyn RefundRepository>,
    pub audit: Arc<dyn AuditSink>,
    pub dead_letters: Arc<dyn DeadLetterRepository>,
    pub gateway: Arc<dyn GatewayClient>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: Arc<SettingsStore>,
    pub default_currency: String,
    pub admin_api_key: String,
    pub health_checkers: Vec<Arc<dyn DependencyChecker>>,
}

#[derive(Clone)]
pub struct AppState {
    pub payments: Arc<PaymentService>,
    pub refunds: Arc<RefundWorkflow>,
    pub webhooks: Arc<WebhookProcessor>,
    pub reconciliation: Arc<ReconciliationService>,
    pub settings: Arc<SettingsStore>,
    pub admin_api_key: Arc<str>,
    pub health_checkers: Arc<[Arc<dyn DependencyChecker>]>,
    pub started_at: Instant,
}

impl AppState {
    pub fn from_dependencies(deps: Dependencies) -> Self {
        let notifications = NotificationDispatcher::new(deps.notifier);

        let transitions = Arc::new(TransitionService::new(
            deps.payments.clone(),
            deps.audit.clone(),
            notifications.clone(),
        ));

        let payments = Arc::new(PaymentService::new(
            deps.payments.clone(),
            deps.gateway.clone(),
            deps.audit.clone(),
            transitions.clone(),
            deps.default_currency,
        ));

        let refunds = Arc::new(RefundWorkflow::new(
            deps.payments.clone(),
            deps.refunds.clone(),
            deps.gateway,
            transitions.clone(),
            deps.audit.clone(),
            notifications,
            deps.settings.clone(),
        ));

        let webhooks = Arc::new(WebhookProcessor::new(
            deps.verifier,
            deps.payments.clone(),
            deps.refunds.clone(),
            deps.dead_letters.clone(),
            transitions,
            refunds.clone(),
            deps.settings.clone(),
        ));

        let reconciliation = Arc::new(ReconciliationService::new(
            deps.payments,
            deps.refunds,
            deps.audit,
            deps.dead_letters,
            refunds.clone(),
            deps.settings.clone(),
        ));

        Self {
            payments,
            refunds,
            webhooks,
            reconciliation,
            settings: deps.settings,
            admin_api_key: Arc::from(deps.admin_api_key),
            health_checkers: deps.health_checkers.into(),
            started_at: Instant::now(),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let admin = Router::new()
        .route(
            "/admin/refunds/:id/approve",
            post(handlers::refunds::approve_refund),
        )
        .route(
            "/admin/refunds/:id/reject",
            post(handlers::refunds::reject_refund),
        )
        .route("/admin/settings/reload", post(handlers::admin::reload_settings))
        .route("/admin/reconcile", post(handlers::admin::run_reconciliation))
        .route(
            "/admin/webhooks/dead-letters",
            get(handlers::admin::list_dead_letters),
        )
        .route("/admin/audit/:target_id", get(handlers::admin::audit_trail))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::admin_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/payments", post(handlers::payments::create_payment))
        .route("/payments/:id", get(handlers::payments::get_payment))
        .route(
            "/payments/:id/checkout",
            post(handlers::payments::begin_checkout),
        )
        .route(
            "/payments/by-order/:order_id",
            get(handlers::payments::get_payment_by_order),
        )
        .route(
            "/payments/by-gateway-order/:gateway_order_id",
            get(handlers::payments::get_payment_by_gateway_order),
        )
        .route(
            "/refunds",
            post(handlers::refunds::open_refund).get(handlers::refunds::list_refunds),
        )
        .route("/refunds/:id", get(handlers::refunds::get_refund))
        .route("/webhooks/gateway", post(handlers::webhook::gateway_callback))
        .merge(admin)
        .layer(axum_middleware::from_fn(
            middleware::request_logger::request_logger_middleware,
        ))
        .with_state(state)
}
