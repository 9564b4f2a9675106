use alert_service::{LogDispatcher, NotificationDispatcher, WebhookDispatcher};
use analytics_service::{api, EngineState, ServiceConfig};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = telemetry::init_with_service("analytics-service");

    info!("Starting analytics service...");

    let config = ServiceConfig::from_env()?;
    info!(
        bind = %config.bind_addr,
        node_id = %config.node_id,
        zone_config = %config.zone_config.display(),
        ttl_secs = config.alert_ttl.num_seconds(),
        "analytics service configuration"
    );

    let zones = config
        .load_zones()
        .with_context(|| format!("Failed to load zones from {}", config.zone_config.display()))?;
    info!(zones = zones.len(), "zone catalog loaded");

    let dispatcher: Arc<dyn NotificationDispatcher> = match &config.webhook_url {
        Some(url) => {
            info!(url = %url, "notifications go to webhook");
            Arc::new(WebhookDispatcher::new(url.as_str())?)
        }
        None => {
            info!("no webhook configured, notifications are only logged");
            Arc::new(LogDispatcher)
        }
    };

    let state = EngineState::new(config.clone(), zones, Some(dispatcher));
    let app = api::router(state.clone());

    info!("Binding to {}", config.bind_addr);
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Analytics service listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: EngineState) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
    state.shutdown().await;
}
