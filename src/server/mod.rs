// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP API server
//!
//! Exposes the session registry and the query orchestrator to the chat client.
//! Every session operation takes the session token as a `token` query
//! parameter; a missing or unknown token is answered with 403.
//!
//! # Endpoints
//!
//! - `POST /session?streaming=` - Create a session, returns `{token}`
//! - `POST /model?token=&model=` - Switch backend (`openai` or `bamboo`)
//! - `POST /data/input?token=` - Install datasets, returns row counts
//! - `POST /data/select?token=&index=&head=` - Select a dataset and row limit
//! - `POST /chat?token=` - Ask a question, returns the rendered answer
//! - `GET /health` - Health check
//! - `GET /public/<file>` - Generated artifacts (no listing)
//!
//! # Example
//!
//! ```no_run
//! use datachat::server::Server;
//! # use std::sync::Arc;
//! # async fn example(orchestrator: Arc<datachat::orchestrator::QueryOrchestrator>) -> anyhow::Result<()> {
//! let server = Server::new(8000, orchestrator);
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer};
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;

use crate::dataset::Dataset;
use crate::errors::UserError;
use crate::orchestrator::QueryOrchestrator;
use crate::render::{RenderConfig, RenderedAnswer};
use crate::types::BackendChoice;

/// Maximum request body size (10MB), enough for a few thousand-row uploads.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;
const MAX_QUERY_LENGTH: usize = 100_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 180;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;

/// Server state shared across handlers.
pub struct AppState {
    pub orchestrator: Arc<QueryOrchestrator>,
}

#[derive(Debug)]
pub struct Server {
    port: u16,
    bind_address: String,
    public_dir: PathBuf,
    public_route: String,
    request_timeout: Option<Duration>,
    cleanup_interval: Duration,
    orchestrator: Arc<QueryOrchestrator>,
}

impl Server {
    /// By default, binds to 127.0.0.1 (localhost only).
    pub fn new(port: u16, orchestrator: Arc<QueryOrchestrator>) -> Self {
        let render = RenderConfig::default();
        Self {
            port,
            bind_address: "127.0.0.1".to_string(),
            public_dir: render.public_dir,
            public_route: render.public_route,
            request_timeout: Some(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
            orchestrator,
        }
    }

    /// Use "0.0.0.0" to allow network access.
    pub fn with_bind_address(mut self, addr: impl Into<String>) -> Self {
        self.bind_address = addr.into();
        self
    }

    /// Serve `config.public_dir` at `config.public_route`.
    pub fn with_render_config(mut self, config: &RenderConfig) -> Self {
        self.public_dir = config.public_dir.clone();
        self.public_route = config.public_route.clone();
        self
    }

    /// `None` removes the HTTP-level bound entirely.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    fn artifact_route(&self) -> String {
        let trimmed = self.public_route.trim().trim_matches('/');
        if trimmed.is_empty() {
            "/public".to_string()
        } else {
            format!("/{}", trimmed)
        }
    }

    /// Routes and middleware, without the per-IP rate limiter.
    pub fn build_router(&self) -> Router {
        let state = Arc::new(AppState {
            orchestrator: Arc::clone(&self.orchestrator),
        });

        let router = Router::new()
            .route("/health", get(health_handler))
            .route("/session", post(create_session_handler))
            .route("/model", post(set_model_handler))
            .route("/data/input", post(data_input_handler))
            .route("/data/select", post(data_select_handler))
            .route("/chat", post(chat_handler))
            .nest_service(&self.artifact_route(), ServeDir::new(&self.public_dir))
            .layer(DefaultBodyLimit::max(MAX_BODY_SIZE));
        let router = match self.request_timeout {
            Some(timeout) => router.layer(TimeoutLayer::new(timeout)),
            None => router,
        };
        router.with_state(state)
    }

    /// Start the server with rate limiting, the session sweep and graceful shutdown.
    pub async fn start(&self) -> Result<()> {
        // 1 request per second per IP with a burst of 60
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .per_second(1)
                .burst_size(60)
                .key_extractor(SmartIpKeyExtractor)
                .finish()
                .context("Failed to build rate limiter config")?,
        );
        let router = self.build_router().layer(GovernorLayer {
            config: governor_conf,
        });
        let addr = format!("{}:{}", self.bind_address, self.port);

        tracing::info!(addr = %addr, "Starting server");
        if self.bind_address == "0.0.0.0" {
            tracing::warn!(
                "Server is binding to 0.0.0.0 which exposes the API to the network. \
                 Use 127.0.0.1 (default) for local-only access."
            );
        }

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                anyhow::anyhow!(
                    "Port {} is already in use. Stop the other instance or pass --port <PORT>",
                    self.port
                )
            } else {
                anyhow::anyhow!("Failed to bind to {}: {}", addr, e)
            }
        })?;

        let sweeper = spawn_session_sweeper(Arc::clone(&self.orchestrator), self.cleanup_interval);

        let served = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        sweeper.abort();
        served?;
        tracing::info!("Server stopped");
        Ok(())
    }
}

/// Periodically drop idle-expired sessions.
fn spawn_session_sweeper(
    orchestrator: Arc<QueryOrchestrator>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = orchestrator.registry().cleanup_expired();
            tracing::debug!(removed, live = orchestrator.registry().len(), "Session sweep");
        }
    })
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct CreateSessionParams {
    streaming: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateSessionResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct TokenParams {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelParams {
    token: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Serialize)]
struct ModelResponse {
    model: BackendChoice,
}

#[derive(Debug, Deserialize)]
struct DataInputRequest {
    datasets: Vec<Dataset>,
}

#[derive(Debug, Serialize)]
struct DataInputResponse {
    rows: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct SelectParams {
    token: Option<String>,
    index: Option<String>,
    head: Option<String>,
}

#[derive(Debug, Serialize)]
struct SelectResponse {
    index: usize,
    rows: usize,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    query: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    sessions: usize,
}

fn require_token(token: Option<String>) -> Result<String, UserError> {
    token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| UserError::authorization_denied(Some("Request without session token")))
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Parse an optional numeric query parameter. Empty counts as absent.
fn parse_optional_usize(value: Option<String>, field: &str) -> Result<Option<usize>, UserError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| {
            UserError::invalid_request(
                &format!("'{}' must be a non-negative integer", field),
                Some(field),
                Some(raw),
            )
        }),
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.orchestrator.registry().len(),
    })
}

async fn create_session_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CreateSessionParams>,
) -> Result<Json<CreateSessionResponse>, UserError> {
    let streaming = params.streaming.as_deref().is_some_and(is_truthy);
    let token = state.orchestrator.create_session(streaming)?;
    Ok(Json(CreateSessionResponse { token }))
}

async fn set_model_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ModelParams>,
) -> Result<Json<ModelResponse>, UserError> {
    let token = require_token(params.token)?;
    let raw = params.model.unwrap_or_default();
    let backend: BackendChoice = raw.parse().map_err(|e: String| {
        UserError::invalid_request("Unknown model. Use 'openai' or 'bamboo'.", Some("model"), Some(&e))
    })?;
    let model = state.orchestrator.set_backend(&token, backend).await?;
    Ok(Json(ModelResponse { model }))
}

async fn data_input_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TokenParams>,
    Json(request): Json<DataInputRequest>,
) -> Result<Json<DataInputResponse>, UserError> {
    let token = require_token(params.token)?;
    let rows = state.orchestrator.set_datasets(&token, request.datasets).await?;
    Ok(Json(DataInputResponse { rows }))
}

async fn data_select_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SelectParams>,
) -> Result<Json<SelectResponse>, UserError> {
    let token = require_token(params.token)?;
    let index = parse_optional_usize(params.index, "index")?.unwrap_or(0);
    let head = parse_optional_usize(params.head, "head")?;
    let rows = state.orchestrator.select_dataset(&token, index, head).await?;
    Ok(Json(SelectResponse { index, rows }))
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TokenParams>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<RenderedAnswer>, UserError> {
    let token = require_token(params.token)?;
    if request.query.len() > MAX_QUERY_LENGTH {
        return Err(UserError::invalid_request(
            &format!("Query too long. Maximum length is {} bytes.", MAX_QUERY_LENGTH),
            Some("query"),
            None,
        ));
    }
    let answer = state.orchestrator.query(&token, &request.query).await?;
    Ok(Json(answer))
}

/// Waits for SIGINT/SIGTERM (Ctrl+C on non-Unix platforms).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown..."),
                    _ = sigint.recv() => tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown..."),
                }
            }
            _ => {
                tracing::warn!("Failed to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            tracing::error!("Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Backends;
    use crate::render::AnswerRenderer;
    use crate::security::SecurityPipeline;
    use crate::session::tests::CountingEngine;
    use crate::session::{RegistryConfig, SessionRegistry, SessionSettings};

    fn server(route: &str) -> Server {
        let registry = SessionRegistry::new(
            RegistryConfig::default(),
            SessionSettings::default(),
            Backends::uniform(Arc::new(CountingEngine::default())),
        );
        let orchestrator = QueryOrchestrator::new(
            Arc::new(registry),
            Arc::new(SecurityPipeline::disabled()),
            AnswerRenderer::new(RenderConfig::default()),
        );
        Server::new(8000, Arc::new(orchestrator)).with_render_config(&RenderConfig {
            public_route: route.to_string(),
            ..RenderConfig::default()
        })
    }

    #[test]
    fn test_artifact_route_normalized() {
        assert_eq!(server("/public").artifact_route(), "/public");
        assert_eq!(server("static/").artifact_route(), "/static");
        assert_eq!(server("/").artifact_route(), "/public");
    }

    #[test]
    fn test_request_timeout_optional() {
        assert_eq!(server("/public").request_timeout, Some(Duration::from_secs(180)));
        let unbounded = server("/public").with_request_timeout(None);
        assert_eq!(unbounded.request_timeout, None);
        let _router = unbounded.build_router();
    }

    #[test]
    fn test_parse_optional_usize() {
        assert_eq!(parse_optional_usize(None, "head").unwrap(), None);
        assert_eq!(parse_optional_usize(Some("".into()), "head").unwrap(), None);
        assert_eq!(parse_optional_usize(Some(" 3 ".into()), "head").unwrap(), Some(3));
        assert!(parse_optional_usize(Some("-1".into()), "head").is_err());
    }

    #[test]
    fn test_missing_token_denied() {
        let err = require_token(None).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::FORBIDDEN);
        assert!(require_token(Some(String::new())).is_err());
        assert_eq!(require_token(Some("abc".into())).unwrap(), "abc");
    }

    #[test]
    fn test_truthy_flags() {
        assert!(is_truthy("True"));
        assert!(is_truthy("1"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy(""));
    }
}
