use axum::http::{HeaderValue, Method};
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payflow_core::cli::{self, Cli, Commands, DbCommands, RefundCommands};
use payflow_core::config::{Config, LogFormat};
use payflow_core::services::reconciliation::run_reconciler;
use payflow_core::{create_app, db, AppState};

const REPAIR_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log_format);

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config).await,
        Commands::Refunds(RefundCommands::Reconcile) => {
            cli::handle_refunds_reconcile(&config).await
        }
        Commands::Refunds(RefundCommands::Stale) => cli::handle_refunds_stale(&config).await,
    }
}

fn init_tracing(format: &LogFormat) {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let deps = cli::postgres_dependencies(&config, pool).await?;
    let state = AppState::from_dependencies(deps);

    tokio::spawn(run_reconciler(state.reconciliation.clone(), REPAIR_INTERVAL));

    let mut app = create_app(state);
    if let Some(cors) = cors_layer(config.cors_allowed_origins.as_deref()) {
        app = app.layer(cors);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// `None` when no origins are configured, which leaves CORS headers off.
fn cors_layer(origins: Option<&str>) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins?
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any),
    )
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
