//! Kalshi Stream Binary
//!
//! Connects to Kalshi's streaming API, keeps the configured subscriptions
//! alive, and logs what arrives.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin kalshi-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `KALSHI_ENV`: demo | production (default: demo)
//! - `KALSHI_WS_URL`: Stream URL override
//! - `KALSHI_API_KEY_ID`: API key id (unset = unauthenticated)
//! - `KALSHI_PRIVATE_KEY_PATH` / `KALSHI_PRIVATE_KEY`: RSA private key (file / inline PEM)
//! - `KALSHI_SUBSCRIPTIONS`: Initial subscriptions, `channel:TICKER,...`
//! - `STREAM_HEALTH_PORT`: Health check HTTP port (default: 8083, 0 disables)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use kalshi_stream::infrastructure::broadcast::{BroadcastConfig, StreamEvent, StreamEvents};
use kalshi_stream::infrastructure::health::{HealthServer, HealthServerState};
use kalshi_stream::infrastructure::telemetry;
use kalshi_stream::{
    Handlers, ReconnectSupervisor, StreamConfig, SupervisorConfig, TransportConfig, init_metrics,
};
use tokio::signal;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Bound on waiting for the supervisor to close the connection.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Kalshi stream client");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = StreamConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let credentials = config
        .auth
        .as_ref()
        .map(kalshi_stream::AuthSettings::load_credentials)
        .transpose()
        .context("failed to load API credentials")?;

    let shutdown_token = CancellationToken::new();

    let events = Arc::new(StreamEvents::new(BroadcastConfig::from(config.broadcast)));

    let supervisor = Arc::new(ReconnectSupervisor::new(
        TransportConfig::from_stream_settings(config.stream_url(), &config.stream),
        credentials,
        Handlers::shared(Arc::clone(&events)),
        SupervisorConfig::from_stream_settings(&config.stream),
    ));

    for pair in config.subscriptions.iter().cloned() {
        if let Err(e) = supervisor.subscribe_pair(pair.clone()).await {
            tracing::warn!(%pair, error = %e, "Skipping configured subscription");
        }
    }

    // Spawn event logger
    tokio::spawn(log_events(events.events_rx(), events.data_rx()));

    // Spawn health server
    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&supervisor),
            Arc::clone(&events),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    // Spawn supervisor
    let run_supervisor = Arc::clone(&supervisor);
    let run_token = shutdown_token.clone();
    let mut supervisor_task = tokio::spawn(async move { run_supervisor.run(run_token).await });

    tracing::info!("Stream client ready");

    tokio::select! {
        () = await_shutdown() => {
            shutdown_token.cancel();
            tracing::info!(
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "Graceful shutdown started"
            );
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut supervisor_task).await.is_err() {
                tracing::warn!("Supervisor did not stop in time");
            }
        }
        result = &mut supervisor_task => {
            shutdown_token.cancel();
            result
                .context("supervisor task panicked")?
                .context("supervisor stopped")?;
        }
    }

    tracing::info!("Stream client stopped");
    Ok(())
}

/// Log lifecycle events and count data envelopes.
async fn log_events(
    mut events: broadcast::Receiver<StreamEvent>,
    mut data: broadcast::Receiver<kalshi_stream::DataBroadcast>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(StreamEvent::Connected) => tracing::info!("Connected"),
                Ok(StreamEvent::Disconnected { reason: None }) => tracing::info!("Disconnected"),
                Ok(StreamEvent::Disconnected { reason: Some(reason) }) => {
                    tracing::warn!(%reason, "Disconnected");
                }
                Ok(StreamEvent::Errored { error }) => tracing::warn!(%error, "Stream error"),
                Ok(StreamEvent::Message(envelope)) => {
                    tracing::info!(kind = envelope.kind(), id = ?envelope.id, sid = ?envelope.sid, "Control message");
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            item = data.recv() => match item {
                Ok(item) => {
                    tracing::debug!(
                        kind = item.envelope.kind(),
                        sid = ?item.envelope.sid,
                        seq = ?item.envelope.seq,
                        "Data"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Data logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        authenticated = config.auth.is_some(),
        subscriptions = config.subscriptions.len(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(url = %config.stream_url(), "Stream endpoint");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
