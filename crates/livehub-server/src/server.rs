//! `LiveHubServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{Extensions, HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use livehub_core::ConnectionId;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{Authenticator, Credentials};
use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::feed::run_health_feed;
use crate::health::{self, HealthResponse};
use crate::metrics::{WS_AUTH_FAILURES_TOTAL, render};
use crate::registry::HubRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::broadcast::BroadcastEngine;
use crate::websocket::connection::ClientConnection;
use crate::websocket::session::{SessionContext, run_ws_session};

/// How long shutdown waits for sessions and the health feed to drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Runtime configuration.
    pub config: Arc<ServerConfig>,
    /// Hub registries.
    pub registry: Arc<HubRegistry>,
    /// Upgrade-time credential check.
    pub authenticator: Arc<dyn Authenticator>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
    /// One permit per admissible connection, held for the session's life.
    pub slots: Arc<Semaphore>,
}

/// The livehub server.
pub struct LiveHubServer {
    state: AppState,
    engine: BroadcastEngine,
}

impl LiveHubServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, authenticator: Arc<dyn Authenticator>) -> Self {
        let registry = Arc::new(HubRegistry::new());
        let engine = BroadcastEngine::new(registry.clone(), config.write_timeout);
        let slots = Arc::new(Semaphore::new(
            config.max_connections.min(Semaphore::MAX_PERMITS),
        ));
        Self {
            state: AppState {
                config: Arc::new(config),
                registry,
                authenticator,
                shutdown: Arc::new(ShutdownCoordinator::new()),
                metrics: None,
                start_time: Instant::now(),
                slots,
            },
            engine,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.state.config.ws_path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.state.config.bind_addr();
        TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Serve on `listener` until the shutdown token fires, then drain
    /// sessions.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        info!(%addr, path = %self.state.config.ws_path, "livehub listening");

        if let Some(interval) = self.state.config.health_interval {
            let _ = self.state.shutdown.spawn(run_health_feed(
                self.engine.clone(),
                interval,
                tokio::time::Instant::from_std(self.state.start_time),
                self.state.shutdown.token(),
            ));
        }

        let token = self.state.shutdown.token();
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

        info!("listener closed, draining sessions");
        self.state
            .shutdown
            .graceful_shutdown(Some(SHUTDOWN_GRACE))
            .await;
        Ok(())
    }

    /// Bind and serve.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind, then serve on a background task. Returns the bound address.
    pub async fn listen(
        self: &Arc<Self>,
    ) -> Result<(SocketAddr, JoinHandle<Result<(), ServerError>>), ServerError> {
        let listener = self.bind().await?;
        let addr = listener.local_addr()?;
        let server = self.clone();
        let handle = tokio::spawn(async move { server.serve(listener).await });
        Ok((addr, handle))
    }

    /// Handle for producers pushing events.
    pub fn broadcaster(&self) -> &BroadcastEngine {
        &self.engine
    }

    /// Hub registries.
    pub fn registry(&self) -> &Arc<HubRegistry> {
        &self.state.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

#[derive(Debug, Default, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
}

/// GET {ws_path}: authenticate, then upgrade.
async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    extensions: Extensions,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let remote_addr = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    // Released when the session ends or the upgrade is abandoned.
    let Ok(slot) = state.slots.clone().try_acquire_owned() else {
        warn!(
            ?remote_addr,
            max = state.config.max_connections,
            "connection limit reached"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    };

    let credentials = Credentials {
        token: query.token.or_else(|| bearer_token(&headers)),
        remote_addr,
    };
    let principal = match state.authenticator.authenticate(&credentials).await {
        Ok(p) => p,
        Err(e) => {
            counter!(WS_AUTH_FAILURES_TOTAL, "error" => e.to_string()).increment(1);
            warn!(?remote_addr, error = %e, "upgrade rejected");
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    let upgrade = match upgrade {
        Ok(u) => u,
        Err(rejection) => return rejection.into_response(),
    };

    let config = &state.config;
    let (tx, rx) = mpsc::channel(config.outbound_queue);
    let conn = Arc::new(ClientConnection::new(
        ConnectionId::new(),
        remote_addr,
        principal,
        config.pong_wait,
        tx,
    ));
    let ctx = SessionContext {
        registry: state.registry.clone(),
        ping_interval: config.ping_interval,
        write_timeout: config.write_timeout,
        shutdown: state.shutdown.token(),
    };
    let shutdown = state.shutdown.clone();

    upgrade
        .max_message_size(config.max_message_size)
        .on_upgrade(move |socket| {
            shutdown.track(async move {
                run_ws_session(socket, conn, rx, ctx).await;
                drop(slot);
            })
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.connection_count(),
        state.registry.topic_count(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(handle),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
