//! `HubServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::hub::{AttachError, Hub};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::session::{SessionOptions, run_module_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The hub.
    pub hub: Arc<Hub>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Limits applied to each module session.
    pub session: SessionOptions,
    /// Largest accepted WebSocket message.
    pub max_message_size: usize,
}

/// The module hub server.
pub struct HubServer {
    config: ServerConfig,
    hub: Arc<Hub>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl HubServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, hub: Hub, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            config,
            hub: Arc::new(hub),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            session: SessionOptions::from(&self.config),
            max_message_size: self.config.max_message_size,
        };

        Router::new()
            .route("/websocket", get(websocket_handler))
            .route("/health", get(health_handler))
            .route("/execution/running", get(running_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind, register the platform module and serve until shutdown.
    ///
    /// Returns the bound address and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        if let Err(e) = self.hub.register_platform(local_addr.port()) {
            warn!(error = %e, "platform already registered");
        }

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                warn!(error = %e, "server stopped with error");
            }
        });

        info!(%local_addr, "module hub listening");
        Ok((local_addr, handle))
    }

    /// Get the hub.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[derive(Debug, Deserialize)]
struct ModuleQuery {
    module: Option<String>,
}

/// GET /websocket?module=<identity>
async fn websocket_handler(
    Query(query): Query<ModuleQuery>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(identity) = query
        .module
        .map(|m| m.trim().to_owned())
        .filter(|m| !m.is_empty())
    else {
        return (StatusCode::BAD_REQUEST, "missing module identity").into_response();
    };

    match state.hub.admit(&identity) {
        Ok(()) => {}
        Err(e @ AttachError::UnknownIdentity(_)) => {
            warn!(module = %identity, "module identity without a verify key refused");
            return (StatusCode::FORBIDDEN, e.to_string()).into_response();
        }
        Err(e @ AttachError::DuplicateIdentity(_)) => {
            warn!(module = %identity, "duplicate module identity refused");
            return (StatusCode::CONFLICT, e.to_string()).into_response();
        }
        Err(e @ AttachError::Full(_)) => {
            warn!(module = %identity, "connection limit reached");
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
    }

    let hub = state.hub.clone();
    let options = state.session;
    let token = state.shutdown.token();
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| run_module_session(socket, identity, hub, options, token))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.hub.registry();
    Json(health::health_check(
        state.start_time,
        registry.connection_count(),
        registry.running_count(),
    ))
}

/// GET /execution/running
async fn running_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v).trim())
        .filter(|v| !v.is_empty());

    if token.and_then(|t| state.hub.tokens().get(t)).is_none() {
        let body = json!({
            "status": 401,
            "reason": "no_token",
            "redirect_suggestions": ["/login"],
        });
        return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    }

    let running = state.hub.registry().running_modules();
    Json(json!({ "running_modules": running })).into_response()
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use modhub_auth::{Authenticator, KeyStore, SessionUser, TokenCache, VerificationMode};
    use modhub_core::templates::MemoryTemplateStore;
    use modhub_core::users::StaticUserDirectory;
    use tower::ServiceExt;

    use crate::hub::ConnectionRegistry;

    fn make_hub() -> Hub {
        Hub::new(
            Authenticator::new(Arc::new(KeyStore::default()), VerificationMode::Enforced),
            Arc::new(ConnectionRegistry::new(8)),
            Arc::new(TokenCache::new(Duration::from_secs(60))),
            Arc::new(StaticUserDirectory::default()),
            Arc::new(MemoryTemplateStore::new()),
        )
    }

    fn make_server() -> HubServer {
        HubServer::new(ServerConfig::default(), make_hub(), None)
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn server_with_default_config() {
        let server = make_server();
        assert_eq!(server.config().host, "127.0.0.1");
        assert_eq!(server.config().port, 0);
        assert!(!server.shutdown().token().is_cancelled());
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let server = make_server();
        server.hub().register_platform(8888).unwrap();
        let resp = server.router().oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["running_modules"], 1);
        assert!(parsed["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let resp = make_server().router().oneshot(get("/nonexistent")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn websocket_requires_upgrade() {
        let resp = make_server()
            .router()
            .oneshot(get("/websocket?module=crud"))
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn running_without_token_is_401() {
        let resp = make_server()
            .router()
            .oneshot(get("/execution/running"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], 401);
        assert_eq!(parsed["reason"], "no_token");
        assert_eq!(parsed["redirect_suggestions"][0], "/login");
    }

    #[tokio::test]
    async fn running_with_unknown_token_is_401() {
        let req = Request::builder()
            .uri("/execution/running")
            .header(header::AUTHORIZATION, "Bearer nope")
            .body(Body::empty())
            .unwrap();
        let resp = make_server().router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn running_with_cached_token_lists_modules() {
        let server = make_server();
        server.hub().register_platform(8888).unwrap();
        let _ = server.hub().tokens().insert(
            "tok",
            SessionUser {
                user_id: 1,
                username: "ada".into(),
                email: "ada@example.com".into(),
                role: "admin".into(),
            },
        );

        let req = Request::builder()
            .uri("/execution/running")
            .header(header::AUTHORIZATION, "tok")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed = body_json(resp).await;
        assert_eq!(parsed["running_modules"]["platform"]["port"], 8888);
    }

    #[tokio::test]
    async fn metrics_without_recorder_is_404() {
        let resp = make_server().router().oneshot(get("/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_with_handle_is_200() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let server = HubServer::new(ServerConfig::default(), make_hub(), Some(handle));
        let resp = server.router().oneshot(get("/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn listen_registers_platform_port() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        let running = server.hub().registry().running_modules();
        assert_eq!(running["platform"].port, addr.port());

        server.shutdown().shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
