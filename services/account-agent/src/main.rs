//! Account agent
//!
//! Command-line host for the account libraries:
//! 1. Loads configuration
//! 2. Wires the HTTP transport, auth store and settings file together
//! 3. Runs one command: login, logout, status, verify or watch

mod commands;
mod config;

use std::sync::Arc;

use account_access::{AccessController, JsonFileSettings};
use account_auth::AuthStore;
use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::{AuthMiddleware, HttpTransport};

use crate::commands::Args;
use crate::config::{Config, LogFormat};

/// Logs go to stderr so command output on stdout stays clean.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let args = Args::parse(&args)?;

    let config_path = Config::resolve_path(args.config_path.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    init_tracing(config.log_format);
    info!(
        path = %config_path.display(),
        command = ?args.command,
        "starting account-agent"
    );

    let access_config = config.access_config();
    info!(
        client_id = %access_config.client_id,
        api_endpoint = %access_config.api_endpoint,
        extra_origins = access_config.extra_origins.len(),
        headers = config.headers.len(),
        "configuration loaded"
    );

    let http = Arc::new(
        HttpTransport::new(config.transport_config()).context("failed to build HTTP client")?,
    );
    let store = Arc::new(AuthStore::new(http.clone()));
    let hook: Arc<dyn AuthMiddleware> = store.clone();
    http.install_hook(&hook);

    let settings = JsonFileSettings::in_dir(&access_config.client_dir())
        .await
        .context("failed to load account settings")?;
    let controller = Arc::new(AccessController::new(
        access_config,
        http,
        store,
        Arc::new(settings),
    ));

    commands::run(args.command, &controller, &config).await
}
