//! HTTP server: the Prometheus scrape endpoint, liveness, and the
//! configuration API.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::api::{self, ApiState};
use crate::service::CollectorService;

/// Build the exporter router.
pub fn create_router(service: Arc<CollectorService>, api_state: ApiState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(service)
        .merge(api::router(api_state))
        .layer(CorsLayer::permissive())
}

/// Render the private registry in the Prometheus text format. Stateless
/// with respect to the reconciler: the registry itself is safe for
/// concurrent readers and register/unregister mutators.
async fn metrics_handler(State(service): State<Arc<CollectorService>>) -> Response {
    let families = service.registry().gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}\n"),
        )
            .into_response();
    }
    let content_type = encoder.format_type().to_string();
    (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], buffer).into_response()
}

async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// The exporter's HTTP server.
pub struct HttpServer {
    router: Router,
    listener: tokio::net::TcpListener,
}

impl HttpServer {
    /// Bind the listener. A bind failure is fatal at startup, so it happens
    /// here rather than inside the serve task.
    pub async fn bind(router: Router, listen_addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = tokio::net::TcpListener::bind(listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("failed to bind {listen_addr}: {e}"))?;
        info!(addr = %listen_addr, "HTTP server listening");
        Ok(Self { router, listener })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until the shutdown signal flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use quarry_common::Config;
    use tower::ServiceExt;

    async fn make_router() -> Router {
        let config = Config::parse(
            r#"{
                http_connections: { default: { base_url: "http://127.0.0.1:9" } },
                metrics: [{ name: "probe", help: "Probe", source: "http" }],
            }"#,
        )
        .unwrap();
        let service = CollectorService::new(config).await.unwrap();
        let api_state = ApiState::new(
            service.clone(),
            std::env::temp_dir().join("quarry-http-test.json"),
        );
        create_router(service, api_state)
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text_format() {
        let router = make_router().await;

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("collector_errors_total"));
        assert!(text.contains("probe"));
    }

    #[tokio::test]
    async fn health_endpoint_responds() {
        let router = make_router().await;

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
