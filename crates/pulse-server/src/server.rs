//! `PulseServer` — Axum HTTP + WebSocket server.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use pulse_auth::TokenVerifier;
use pulse_core::MetricsProducer;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_HANDSHAKE_REJECTIONS_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::ws::dispatcher::BroadcastDispatcher;
use crate::ws::publisher::MetricsPublisher;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry + topic index.
    pub registry: Arc<ConnectionRegistry>,
    /// Topic fan-out.
    pub dispatcher: Arc<BroadcastDispatcher>,
    /// Metrics stream management.
    pub publisher: Arc<MetricsPublisher>,
    /// Credential verifier gating the handshake.
    pub verifier: Arc<dyn TokenVerifier>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus render handle, when a recorder is installed.
    pub prometheus: Option<PrometheusHandle>,
}

/// The broadcast server.
pub struct PulseServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<BroadcastDispatcher>,
    publisher: Arc<MetricsPublisher>,
    verifier: Arc<dyn TokenVerifier>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    prometheus: Option<PrometheusHandle>,
}

impl PulseServer {
    /// Create a new server over an existing registry.
    ///
    /// The registry is taken as an argument so collaborators built before
    /// the server (e.g. a metrics producer reporting live connection
    /// counts) can share it.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        registry: Arc<ConnectionRegistry>,
        verifier: Arc<dyn TokenVerifier>,
        producer: Arc<dyn MetricsProducer>,
    ) -> Self {
        let config = Arc::new(config);
        let dispatcher = Arc::new(BroadcastDispatcher::new(registry.clone()));
        let publisher = Arc::new(MetricsPublisher::new(
            registry.clone(),
            producer,
            &config,
        ));
        Self {
            config,
            registry,
            dispatcher,
            publisher,
            verifier,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            prometheus: None,
        }
    }

    /// Attach a Prometheus handle for the `/metrics` endpoint.
    #[must_use]
    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
            publisher: self.publisher.clone(),
            verifier: self.verifier.clone(),
            shutdown: self.shutdown.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            prometheus: self.prometheus.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured listener.
    ///
    /// Bind failure is the only process-fatal startup error.
    pub async fn bind(&self) -> Result<tokio::net::TcpListener, ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })
    }

    /// Serve on an already-bound listener until shutdown.
    pub async fn serve(&self, listener: tokio::net::TcpListener) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "broadcast server listening");
        let token = self.shutdown.token();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await?;
        Ok(())
    }

    /// Bind and serve.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Get the connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the broadcast dispatcher (server-side push API).
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<BroadcastDispatcher> {
        &self.dispatcher
    }

    /// Get the shutdown coordinator.
    #[must_use]
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// GET /ws — token-verified WebSocket upgrade.
///
/// Verification happens before the upgrade: a failed handshake allocates no
/// connection state and the client observes an HTTP-level rejection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(token) = query.token else {
        counter!(WS_HANDSHAKE_REJECTIONS_TOTAL).increment(1);
        info!("connection rejected: no token provided");
        return (StatusCode::UNAUTHORIZED, "missing token").into_response();
    };
    let subject = match state.verifier.verify(&token).await {
        Ok(subject) => subject,
        Err(e) => {
            counter!(WS_HANDSHAKE_REJECTIONS_TOTAL).increment(1);
            info!(error = %e, "connection rejected: invalid token");
            return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
        }
    };
    if state.registry.count() >= state.config.max_connections {
        counter!(WS_HANDSHAKE_REJECTIONS_TOTAL).increment(1);
        warn!(limit = state.config.max_connections, "connection rejected: at capacity");
        return (StatusCode::SERVICE_UNAVAILABLE, "at capacity").into_response();
    }

    let shutdown = state.shutdown.token();
    ws.on_upgrade(move |socket| {
        run_ws_session(
            socket,
            subject,
            state.registry.clone(),
            state.dispatcher.clone(),
            state.publisher.clone(),
            state.config.clone(),
            shutdown,
        )
    })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.registry.count();
    let topics = state.registry.topic_count().await;
    Json(health::health_check(state.start_time, connections, topics))
}

/// GET /metrics — Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> String {
    state
        .prometheus
        .as_ref()
        .map(crate::metrics::render)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use pulse_auth::AuthError;
    use pulse_core::{MetricsSnapshot, ProducerError, SubjectId};

    struct StubVerifier;

    #[async_trait]
    impl TokenVerifier for StubVerifier {
        async fn verify(&self, token: &str) -> Result<SubjectId, AuthError> {
            if token == "good-token" {
                Ok(SubjectId::from("alice"))
            } else {
                Err(AuthError::MissingSubject)
            }
        }
    }

    struct StubProducer;

    #[async_trait]
    impl MetricsProducer for StubProducer {
        async fn snapshot(&self) -> Result<MetricsSnapshot, ProducerError> {
            Ok(MetricsSnapshot::new())
        }
    }

    fn make_server() -> PulseServer {
        PulseServer::new(
            ServerConfig::default(),
            Arc::new(ConnectionRegistry::new()),
            Arc::new(StubVerifier),
            Arc::new(StubProducer),
        )
    }

    #[tokio::test]
    async fn server_with_default_config() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 3001);
    }

    #[test]
    fn shutdown_coordinator_accessible() {
        let server = make_server();
        assert!(!server.shutdown().is_shutting_down());
        server.shutdown().shutdown();
        assert!(server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["topics"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_without_recorder_is_empty() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let app = server.router();

        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bind_on_ephemeral_port() {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let server = PulseServer::new(
            config,
            Arc::new(ConnectionRegistry::new()),
            Arc::new(StubVerifier),
            Arc::new(StubProducer),
        );
        let listener = server.bind().await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let config = ServerConfig {
            // Not a resolvable bind address
            host: "256.256.256.256".into(),
            ..ServerConfig::default()
        };
        let server = PulseServer::new(
            config,
            Arc::new(ConnectionRegistry::new()),
            Arc::new(StubVerifier),
            Arc::new(StubProducer),
        );
        let err = server.bind().await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
    }
}
