//! Tulpar server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tulpar_core::config::AppConfig;
use tulpar_server::clients::{spawn_cleanup_task, spawn_report_task};
use tulpar_server::{AppState, create_router};

/// Tulpar - A package distribution server
#[derive(Parser, Debug)]
#[command(name = "tulpard")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "TULPAR_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Build the configuration from an optional file and `TULPAR_` variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(
            config_path = %path,
            "No config file found, using defaults and environment"
        );
    }

    figment
        .merge(Env::prefixed("TULPAR_").ignore(&["CONFIG"]).split("__"))
        .extract()
        .context("failed to load configuration")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Startup banner
    tracing::info!("Tulpar v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    // Register Prometheus metrics
    tulpar_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    // Initialize repository
    let repository = tulpar_storage::from_config(&config.repository)
        .context("failed to initialize repository")?;

    // Verify the repository root before accepting requests
    repository
        .health_check()
        .await
        .context("repository health check failed")?;
    tracing::info!(root = %config.repository.root.display(), "Repository verified");

    // Parse bind address
    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;

    // Create application state
    let state = AppState::new(config, repository).context("invalid configuration")?;

    let cleanup_interval = state.cleanup_interval();
    spawn_cleanup_task(state.clients.clone(), cleanup_interval);
    tracing::info!(
        interval_secs = cleanup_interval.as_secs(),
        "Client cleanup task spawned"
    );

    if let Some(report_interval) = state.report_interval() {
        spawn_report_task(state.clients.clone(), report_interval);
        tracing::info!(
            interval_secs = report_interval.as_secs(),
            "Client activity report task spawned"
        );
    }

    if state.config.admin.is_none() {
        tracing::info!("Admin API disabled, no [admin] section configured");
    }

    // Create router
    let app = create_router(state);

    tracing::info!("Listening on {}", addr);

    // Start server with ConnectInfo for client IP extraction
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
