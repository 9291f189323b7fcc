use anyhow::{Context, Result};
use statusbeacon_agent::{A2sQuery, Config, DiscordWebhook, Reconciler};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("statusbeacon_agent=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("📡 Statusbeacon Agent v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = match Config::load().await {
        Ok(config) => config,
        Err(e) => {
            error!("Missing/invalid config: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    let query = A2sQuery::from_config(&config);
    let webhook = DiscordWebhook::new(config.webhook_url.clone())
        .context("Failed to build webhook client")?;

    let reconciler = Reconciler::new(config, query, webhook);
    reconciler.run(shutdown_signal()).await;

    info!("Statusbeacon Agent stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
