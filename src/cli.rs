use clap::{Parser, Subcommand};
use sqlx::PgPool;
use std::sync::Arc;

use crate::adapters::{
    PostgresAuditSink, PostgresDeadLetterRepository, PostgresPaymentRepository,
    PostgresRefundRepository,
};
use crate::config::settings::{PostgresSettingsSource, SettingsStore};
use crate::config::Config;
use crate::gateway::{HmacSignatureVerifier, HttpGatewayClient};
use crate::health::{DependencyChecker, GatewayChecker, PostgresChecker};
use crate::ports::{GatewayClient, Notifier};
use crate::services::{HttpNotifier, LogNotifier, ReconciliationService};
use crate::{AppState, Dependencies};

#[derive(Parser)]
#[command(name = "payflow-core")]
#[command(about = "Payflow Core - payment state machine and refund workflow", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Refund maintenance commands
    #[command(subcommand)]
    Refunds(RefundCommands),

    /// Print the configuration and run the startup validation report
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[derive(Subcommand)]
pub enum RefundCommands {
    /// Finish refunds left half-reconciled and report stuck ones
    Reconcile,

    /// List refund requests stuck in processing past the configured timeout
    Stale,
}

/// Wires the Postgres adapters, the HTTP gateway client and the configured
/// notifier. Used by `serve` and by the maintenance commands.
pub async fn postgres_dependencies(config: &Config, pool: PgPool) -> anyhow::Result<Dependencies> {
    let settings = Arc::new(
        SettingsStore::load(Arc::new(PostgresSettingsSource::new(pool.clone()))).await?,
    );

    let gateway: Arc<dyn GatewayClient> = Arc::new(HttpGatewayClient::with_circuit_breaker(
        config.gateway_base_url.clone(),
        config.gateway_key_id.clone(),
        config.gateway_key_secret.clone(),
        config.gateway_cb_failures,
        config.gateway_cb_reset_secs,
    ));
    tracing::info!(
        url = %config.gateway_base_url,
        failures = config.gateway_cb_failures,
        reset_secs = config.gateway_cb_reset_secs,
        "Gateway client initialized"
    );

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(HttpNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };

    let health_checkers: Vec<Arc<dyn DependencyChecker>> = vec![
        Arc::new(PostgresChecker::new(pool.clone())),
        Arc::new(GatewayChecker::new(gateway.clone())),
    ];

    Ok(Dependencies {
        payments: Arc::new(PostgresPaymentRepository::new(pool.clone())),
        refunds: Arc::new(PostgresRefundRepository::new(pool.clone())),
        audit: Arc::new(PostgresAuditSink::new(pool.clone())),
        dead_letters: Arc::new(PostgresDeadLetterRepository::new(pool)),
        gateway,
        verifier: Arc::new(HmacSignatureVerifier::new(config.gateway_webhook_secret.clone())),
        notifier,
        settings,
        default_currency: config.default_currency.clone(),
        admin_api_key: config.admin_api_key.clone(),
        health_checkers,
    })
}

async fn reconciliation_service(config: &Config) -> anyhow::Result<Arc<ReconciliationService>> {
    let pool = crate::db::create_pool(config).await?;
    let state = AppState::from_dependencies(postgres_dependencies(config, pool).await?);
    Ok(state.reconciliation)
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;
    println!("✓ Database migrations completed");

    Ok(())
}

pub async fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Gateway URL: {}", config.gateway_base_url);
    println!("  Gateway Key ID: {}", config.gateway_key_id);
    println!(
        "  Gateway Circuit Breaker: {} failures, {}s reset",
        config.gateway_cb_failures, config.gateway_cb_reset_secs
    );
    println!("  Default Currency: {}", config.default_currency);
    println!(
        "  Notification URL: {}",
        config.notify_webhook_url.as_deref().unwrap_or("(log only)")
    );

    let pool = crate::db::create_pool(config).await?;
    let report = crate::startup::validate_environment(config, &pool).await?;
    report.print();

    if !report.is_valid() {
        anyhow::bail!("configuration validation failed");
    }

    println!("✓ Configuration is valid");
    Ok(())
}

pub async fn handle_refunds_reconcile(config: &Config) -> anyhow::Result<()> {
    let service = reconciliation_service(config).await?;
    let report = service.repair().await?;

    println!("Examined {} processing refund request(s)", report.examined);
    for id in &report.repaired {
        println!("  ✓ repaired {}", id);
    }
    for id in &report.stale {
        println!("  ⚠ stuck in processing {}", id);
    }
    if report.errors > 0 {
        anyhow::bail!("{} refund request(s) could not be repaired", report.errors);
    }

    Ok(())
}

pub async fn handle_refunds_stale(config: &Config) -> anyhow::Result<()> {
    let service = reconciliation_service(config).await?;
    let stale = service.stale_refunds().await?;

    if stale.is_empty() {
        println!("No refund requests stuck in processing");
        return Ok(());
    }

    println!(
        "{:<38} {:<38} {:<24} {:<12}",
        "Request", "Payment", "Gateway Refund", "Amount"
    );
    println!("{}", "-".repeat(114));
    for request in stale {
        println!(
            "{:<38} {:<38} {:<24} {:<12}",
            request.id,
            request.payment_id,
            request.gateway_refund_id.as_deref().unwrap_or("-"),
            request.amount
        );
    }

    Ok(())
}

pub fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user_start = slash_pos + 2;
                let user = &url[user_start..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
