//! Pitstop Server entry point.

use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use pitstop_admission::AdmissionController;
use pitstop_server::AppState;
use pitstop_server::config::Config;
use pitstop_server::error::StartupError;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Pitstop Server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), StartupError> {
    let shutdown = CancellationToken::new();

    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| StartupError::InvalidHost(config.host.clone()))?;
    let addr = SocketAddr::new(host, config.port);

    let store = pitstop_server::open_store(&config, &shutdown).await?;
    let controller = AdmissionController::with_system_clock(config.admission_config(), store)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        counter_store = ?config.counter_store,
        policy = ?config.policy,
        trust_forwarded_for = config.trust_forwarded_for,
        "Pitstop Server starting",
    );

    let state = AppState::new(
        controller,
        config.cors_origins.clone(),
        config.trust_forwarded_for,
        shutdown.clone(),
    );
    let app = pitstop_server::router(state, Router::new());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;

    tracing::info!(%addr, "Pitstop Server ready");

    let signal = shutdown.clone();
    pitstop_http::serve(listener, app, async move {
        shutdown_signal().await;
        signal.cancel();
    })
    .await
    .map_err(StartupError::Serve)?;

    tracing::info!("Pitstop Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install signal handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
