//! HTTP proxy server for harmony-format models
//!
//! Exposes an OpenAI-compatible surface in front of the upstream server:
//! - `GET /v1/models` relays the upstream model list, degrading to an empty list
//! - `POST /v1/chat/completions` rewrites harmony markers into `<think>` tags
//! - `GET /health` reports liveness

use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::error::{HarmonyError, Result};

use super::error::ProxyError;
use super::session::{ChatSession, rewrite_completion};
use super::streaming::spawn_rewrite_stream;
use super::upstream::{UpstreamClient, UpstreamEndpoint};

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Proxy configuration
    pub config: ProxyConfig,
    /// Pooled client for the upstream server
    pub upstream: UpstreamClient,
}

impl AppState {
    /// Build state from config, validating the upstream URL
    pub fn from_config(config: ProxyConfig) -> Result<Self> {
        let endpoint = UpstreamEndpoint::parse(&config.upstream_url)?;
        let upstream =
            UpstreamClient::new(endpoint, Duration::from_secs(config.models_timeout_secs))?;
        Ok(Self { config, upstream })
    }
}

/// The main proxy server
pub struct ProxyServer {
    config: ProxyConfig,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    /// Start the proxy server and listen for requests until shutdown
    pub async fn serve(&self) -> Result<()> {
        let app_state = Arc::new(AppState::from_config(self.config.clone())?);
        let upstream_base = app_state.upstream.endpoint().base.clone();

        let app = create_router(app_state);

        let addr: SocketAddr = self
            .config
            .listen_addr
            .parse()
            .map_err(|e| HarmonyError::Config(format!("Invalid listen address: {e}")))?;

        tracing::info!("Starting harmony proxy on {addr}");
        tracing::info!("Forwarding to upstream: {upstream_base}");

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HarmonyError::Proxy(format!("Failed to bind to {addr}: {e}")))?;

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| HarmonyError::Proxy(format!("Server error: {e}")))?;

        tracing::info!("Proxy server shut down gracefully");
        Ok(())
    }
}

/// Create the router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/models", get(models_handler))
        .route("/v1/chat/completions", post(chat_completions_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint - returns JSON status
async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Relay the upstream model list
///
/// Any failure is logged and answered with an empty list so clients can
/// still start up while the upstream is down.
async fn models_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    match state.upstream.list_models().await {
        Ok(models) => Json(models),
        Err(e) => {
            tracing::warn!(
                category = e.category(),
                "Failed to fetch upstream models, returning empty list: {e}"
            );
            Json(json!({"object": "list", "data": []}))
        }
    }
}

/// Handle a chat completion, streaming or not
async fn chat_completions_handler(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
) -> Response<Body> {
    // Read from extensions so the handler also works without connect info
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let bytes = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let err = ProxyError::Request(format!("Failed to read request body: {e}"));
            tracing::warn!(client = ?client, "{err}");
            return err.into_response();
        }
    };

    let session = match ChatSession::from_bytes(&bytes, client) {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(client = ?client, "Rejected chat request: {e}");
            return e.into_response();
        }
    };

    let span = session.span();
    tracing::info!(
        parent: &span,
        "REQ client={} model={} stream={}",
        session.client(),
        session.model(),
        session.is_stream()
    );

    if session.is_stream() {
        stream_completion(&state.upstream, session, span.clone())
            .instrument(span)
            .await
    } else {
        complete(&state.upstream, session).instrument(span).await
    }
}

/// Non-streaming path: forward, rewrite the message content, relay the status
async fn complete(upstream: &UpstreamClient, session: ChatSession) -> Response<Body> {
    let mut reply = match upstream.chat_completion(session.body()).await {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(category = e.category(), "Chat completion failed: {e}");
            return e.into_response();
        }
    };

    if !reply.status.is_success() {
        tracing::warn!(status = %reply.status, "Upstream returned an error, relaying");
    } else if rewrite_completion(&mut reply.body) {
        tracing::debug!("Rewrote harmony markers in completion");
    }

    (reply.status, Json(reply.body)).into_response()
}

/// Streaming path: open the upstream stream, then hand it to the pump task
async fn stream_completion(
    upstream: &UpstreamClient,
    session: ChatSession,
    span: tracing::Span,
) -> Response<Body> {
    let response = match upstream.open_stream(session.body()).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(category = e.category(), "Failed to open upstream stream: {e}");
            return e.into_response();
        }
    };

    let mut response = Response::new(spawn_rewrite_stream(response, span));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    *response.status_mut() = StatusCode::OK;
    response
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
