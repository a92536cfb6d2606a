use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::watch;

use sfnpool_common::{Result, SfnPoolError};

/// One-shot shutdown flag shared by the run loop, the signal listener and
/// the liveness endpoint. Safe to read concurrently; once set it stays set.
#[derive(Clone)]
pub struct ShutdownFlag {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn set(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_set(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the flag is set; immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Detached listener that turns SIGTERM / SIGINT into a shutdown. Kept off
/// the run-loop task so signal delivery never races the in-flight poll.
pub fn spawn_signal_listener(shutdown: ShutdownFlag) {
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Closing server; waiting for run loop to end");
        shutdown.set();
    });
}

async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down gracefully");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully");
        },
    }
}

pub async fn bind_healthcheck(port: u16) -> Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| SfnPoolError::Config(format!("failed to bind healthcheck port {}: {}", port, e)))
}

/// Liveness endpoint: `GET /` answers `{"status":"ok"}`; `GET /metrics`
/// renders the Prometheus registry. Stops when the shutdown flag is set.
pub async fn serve_healthcheck(
    listener: TcpListener,
    metrics_handle: PrometheusHandle,
    shutdown: ShutdownFlag,
) -> Result<()> {
    let app = Router::new()
        .route("/", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_handle);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(port = addr.port(), "Healthcheck listening");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .map_err(|e| SfnPoolError::Internal(format!("healthcheck server error: {}", e)))?;

    tracing::info!("Healthcheck stopped");
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
