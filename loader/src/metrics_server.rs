//! Scrape endpoint for a running loader
//!
//! Binding happens up front so a taken port fails the run before any
//! ingestion or benchmark work starts. `/health` reports which mode the
//! process is running, so a scraper can tell an ingest run from a bench run.

use crate::error::{LoaderError, Result};
use axum::extract::State;
use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Body of `/health`
#[derive(Debug, Clone, Serialize)]
struct Health {
    status: &'static str,
    mode: &'static str,
}

/// Bound, not yet serving, metrics endpoint
pub struct MetricsServer {
    listener: TcpListener,
    mode: &'static str,
}

impl MetricsServer {
    /// Bind `0.0.0.0:port`. Port 0 picks a free port.
    pub async fn bind(port: u16, mode: &'static str) -> Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| LoaderError::Config(format!("metrics port {port}: {e}")))?;
        Ok(Self { listener, mode })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` is cancelled
    pub fn serve(self, shutdown: CancellationToken) -> JoinHandle<()> {
        let app = router(self.mode);
        tokio::spawn(async move {
            if let Ok(addr) = self.listener.local_addr() {
                info!(%addr, mode = self.mode, "Metrics endpoint listening");
            }
            if let Err(e) = axum::serve(self.listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!(error = %e, "Metrics endpoint failed");
            }
        })
    }
}

fn router(mode: &'static str) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .route("/health", get(health))
        .with_state(mode)
}

async fn scrape() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        crate::metrics::gather(),
    )
}

async fn health(State(mode): State<&'static str>) -> Json<Health> {
    Json(Health { status: "ok", mode })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_serves_scrape_and_health_until_shutdown() {
        let _ = crate::metrics::Metrics::init();
        let server = MetricsServer::bind(0, "bench").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let shutdown = CancellationToken::new();
        let handle = server.serve(shutdown.clone());

        let client = reqwest::Client::new();
        let scrape = client
            .get(format!("http://127.0.0.1:{port}/metrics"))
            .send()
            .await
            .unwrap();
        assert_eq!(scrape.status(), 200);
        let content_type = scrape.headers()["content-type"].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/plain"));

        let health: serde_json::Value = client
            .get(format!("http://127.0.0.1:{port}/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["mode"], "bench");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_taken_port_is_config_error() {
        let first = MetricsServer::bind(0, "ingest").await.unwrap();
        let port = first.local_addr().unwrap().port();
        let err = MetricsServer::bind(port, "ingest").await.err().unwrap();
        assert!(matches!(err, LoaderError::Config(msg) if msg.contains(&port.to_string())));
    }
}
