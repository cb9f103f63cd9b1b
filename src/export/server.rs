use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::status::{BlockNumber, NetworkIndexingStatus, StatusError, StatusStore};

/// HTTP server for Prometheus metrics, liveness and the status API.
pub struct HttpServer {
    addr: String,
    registry: Registry,
    status: Arc<StatusStore>,
    rejected: IntCounter,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,
}

impl HttpServer {
    pub fn new(
        addr: &str,
        registry: Registry,
        status: Arc<StatusStore>,
        rejected: IntCounter,
    ) -> Self {
        Self {
            addr: addr.to_string(),
            registry,
            status,
            rejected,
            shutdown: parking_lot::Mutex::new(None),
        }
    }

    /// Binds the listener and serves in the background. Returns the bound
    /// address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // ":port" binds all interfaces.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app = router(Arc::new(AppState {
            registry: self.registry.clone(),
            status: Arc::clone(&self.status),
            rejected: self.rejected.clone(),
        }));

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "http server started");

            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    cancel.cancelled().await;
                })
                .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "http server error");
            }
        });

        Ok(local_addr)
    }

    /// Gracefully shuts down the server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
    status: Arc<StatusStore>,
    rejected: IntCounter,
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/status", get(status_handler))
        .route("/streams/:stream_id/network", put(register_handler))
        .route("/streams/:stream_id/status", put(update_status_handler))
        .with_state(state)
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "encoding metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "encoding error".to_string(),
        );
    }

    match String::from_utf8(buffer) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "converting metrics to string");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}

/// GET /status - Slowest stream per network.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<Vec<NetworkIndexingStatus>> {
    Json(state.status.get_status())
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    network: String,
}

#[derive(Debug, Deserialize)]
struct StatusUpdateRequest {
    timestamp: DateTime<Utc>,
    block_number: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorBody { error: message })).into_response()
}

impl IntoResponse for StatusError {
    fn into_response(self) -> Response {
        let status = match &self {
            StatusError::UnregisteredStream(_) => StatusCode::NOT_FOUND,
            StatusError::NetworkConflict { .. } => StatusCode::CONFLICT,
        };
        error_response(status, self.to_string())
    }
}

/// PUT /streams/{id}/network - Associates a stream with a network.
async fn register_handler(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    if req.network.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "network is required".to_string());
    }

    match state.status.register_stream(&stream_id, &req.network) {
        Ok(()) => {
            tracing::debug!(stream = %stream_id, network = %req.network, "stream registered");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => {
            tracing::warn!(stream = %stream_id, error = %e, "stream registration rejected");
            e.into_response()
        }
    }
}

/// PUT /streams/{id}/status - Records a stream's latest position.
async fn update_status_handler(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
    Json(req): Json<StatusUpdateRequest>,
) -> Response {
    let block_number: BlockNumber = match req.block_number.parse() {
        Ok(n) => n,
        Err(e) => {
            state.rejected.inc();
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    match state
        .status
        .update_status(&stream_id, req.timestamp, block_number)
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            state.rejected.inc();
            tracing::debug!(stream = %stream_id, error = %e, "status update rejected");
            e.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    async fn start_server() -> (HttpServer, Arc<StatusStore>, IntCounter, String) {
        let registry = Registry::new();
        let rejected = IntCounter::new("status_updates_rejected_total", "test").expect("counter");
        registry
            .register(Box::new(rejected.clone()))
            .expect("register counter");
        let status = Arc::new(StatusStore::new());

        let server = HttpServer::new(
            "127.0.0.1:0",
            registry,
            Arc::clone(&status),
            rejected.clone(),
        );
        let addr = server.start().await.expect("server start");

        (server, status, rejected, format!("http://{addr}"))
    }

    #[tokio::test]
    async fn test_healthz_and_metrics() {
        let (server, _status, rejected, base) = start_server().await;
        rejected.inc();
        let client = reqwest::Client::new();

        let health = client
            .get(format!("{base}/healthz"))
            .send()
            .await
            .expect("healthz");
        assert_eq!(health.status(), reqwest::StatusCode::OK);
        assert_eq!(health.text().await.expect("body"), "ok");

        let metrics = client
            .get(format!("{base}/metrics"))
            .send()
            .await
            .expect("metrics")
            .text()
            .await
            .expect("body");
        assert!(metrics.contains("status_updates_rejected_total 1"));

        server.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_register_update_and_query() {
        let (server, _status, _rejected, base) = start_server().await;
        let client = reqwest::Client::new();

        for stream in ["s1", "s2"] {
            let resp = client
                .put(format!("{base}/streams/{stream}/network"))
                .json(&json!({"network": "netA"}))
                .send()
                .await
                .expect("register");
            assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);
        }

        for (stream, ts, block) in [
            ("s1", "2024-01-01T00:00:01Z", "100"),
            ("s2", "2024-01-01T00:00:02Z", "50"),
        ] {
            let resp = client
                .put(format!("{base}/streams/{stream}/status"))
                .json(&json!({"timestamp": ts, "block_number": block}))
                .send()
                .await
                .expect("update");
            assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);
        }

        let body: Value = client
            .get(format!("{base}/status"))
            .send()
            .await
            .expect("status")
            .json()
            .await
            .expect("json");

        let entries = body.as_array().expect("array");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["network"], "netA");
        assert_eq!(entries[0]["block_number"], "50");
        assert_eq!(entries[0]["timestamp"], "2024-01-01T00:00:02Z");

        server.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn test_error_status_codes() {
        let (server, status, rejected, base) = start_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .put(format!("{base}/streams/ghost/status"))
            .json(&json!({"timestamp": "2024-01-01T00:00:00Z", "block_number": "1"}))
            .send()
            .await
            .expect("update");
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

        status.register_stream("s1", "netA").expect("register");

        let resp = client
            .put(format!("{base}/streams/s1/status"))
            .json(&json!({"timestamp": "2024-01-01T00:00:00Z", "block_number": "12x"}))
            .send()
            .await
            .expect("update");
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        let resp = client
            .put(format!("{base}/streams/s1/network"))
            .json(&json!({"network": "netB"}))
            .send()
            .await
            .expect("register");
        assert_eq!(resp.status(), reqwest::StatusCode::CONFLICT);

        assert_eq!(rejected.get(), 2);
        assert!(status.get_status().is_empty());

        server.stop().await.expect("stop");
    }
}
