//! Observability endpoints for the image GC daemon.
//!
//! Routes:
//! - `GET /healthz` - Runtime and disk-probe health check
//! - `GET /metrics` - Prometheus metrics

use std::sync::Arc;

use anyhow::Context as _;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio::sync::watch;
use tracing::error;

use crate::gc::ImageGcManager;
use crate::metrics::MetricsRegistry;

/// State shared by the HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub manager: Arc<ImageGcManager>,
    pub metrics: MetricsRegistry,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(state)
}

/// Serve the router on `listen` until `shutdown` flips.
pub async fn run_http_server(
    listen: &str,
    state: HttpState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listen_addr: std::net::SocketAddr =
        listen.parse().context("invalid metrics.listen address")?;

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "metrics server listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("metrics server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /healthz`
async fn handle_health(State(state): State<HttpState>) -> impl IntoResponse {
    let (status, body) = crate::health::check(&state.manager).await;
    (status, Json(body))
}

/// `GET /metrics`
async fn handle_metrics(State(state): State<HttpState>) -> Result<Response, AppError> {
    let buf = state
        .metrics
        .encode()
        .map_err(|e| AppError(anyhow::anyhow!("metrics encoding failed: {e}")))?;

    Ok((
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buf,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Unexpected internal error, rendered as a 500.
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "internal server error");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal server error: {:#}", self.0),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::gc::ImageGcPolicy;
    use crate::runtime::fake::{FakeRuntime, FAKE_ROOT_DIR};
    use crate::runtime::ImageRuntime;

    fn state() -> HttpState {
        let fake = Arc::new(FakeRuntime::new());
        fake.set_fs_stats(FAKE_ROOT_DIR, 100, 40);
        let runtime: Arc<dyn ImageRuntime> = fake;
        let metrics = MetricsRegistry::new();
        let policy =
            ImageGcPolicy::new(90, 75, Duration::ZERO, Duration::from_secs(60)).unwrap();
        let manager =
            ImageGcManager::new(runtime, policy, "pause:3.0", metrics.clone()).unwrap();
        HttpState {
            manager: Arc::new(manager),
            metrics,
        }
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_openmetrics() {
        let response = create_router(state())
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("imagegc_images_tracked"));
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let response = create_router(state())
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["checks"]["disk"]["ok"], true);
    }
}
