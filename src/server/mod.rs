//! HTTP surface of the extraction service.
//!
//! ## Routes
//!
//! | Method | Path                    | Handler                          |
//! |--------|-------------------------|----------------------------------|
//! | GET    | `/`                     | service info                     |
//! | GET    | `/home`                 | plain-text welcome               |
//! | GET    | `/health`               | liveness + session/model flags   |
//! | GET    | `/process`              | `?pdf=<name>` or `?pdf_url=<url>`|
//! | POST   | `/chat/file`            | multipart `file` via chat session|
//! | POST   | `/chat/orden/{name}`    | share lookup via chat session    |
//! | POST   | `/auth/send-code`       | start email-code login           |
//! | POST   | `/auth/verify-code`     | finish login, save cookies       |
//! | POST   | `/auth/reload-session`  | rebuild session from cookie file |
//!
//! Every failure is answered as `{"error": <kind>, "detail": <message>}`
//! with the status of its [`crate::error::ErrorKind`].

mod auth;
mod chat;
mod error;
mod monitors;
mod process;
mod shutdown;

use crate::config::{ExtractionConfig, PipelineMode, ResponseSchema};
use crate::model::VisionModel;
use crate::session::{LoginRegistry, SessionStore};
use axum::error_handling::HandleErrorLayer;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use auth::LoginResponse;
pub use chat::ChatResponse;
pub use error::{ApiError, ErrorBody, Result};
pub use process::ProcessResponse;
pub use shutdown::shutdown_signal;

/// Tracing target for server operations.
pub const TRACING_TARGET: &str = "edgequake_pdf2json::server";

/// Largest accepted request body (multipart uploads).
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Where and how long to listen.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for a whole request, retries included.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            request_timeout_secs: 600,
        }
    }
}

impl ServerConfig {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn binds_to_all_interfaces(&self) -> bool {
        self.host == "0.0.0.0" || self.host == "::"
    }
}

/// Shared state of all handlers. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    config: Arc<ExtractionConfig>,
    chat_config: Arc<ExtractionConfig>,
    model: Option<Arc<dyn VisionModel>>,
    share_dir: Option<PathBuf>,
    sessions: Arc<SessionStore>,
    logins: Arc<LoginRegistry>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("model", &self.model.as_ref().map(|m| m.name().to_string()))
            .field("share_dir", &self.share_dir)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// State without a vision model or share directory.
    ///
    /// The chat routes always send the PDF itself and ask for the header only.
    pub fn new(
        config: ExtractionConfig,
        sessions: Arc<SessionStore>,
        logins: Arc<LoginRegistry>,
    ) -> Self {
        let mut chat_config = config.clone();
        chat_config.mode = PipelineMode::Document;
        chat_config.schema = ResponseSchema::HeaderOnly;
        Self {
            config: Arc::new(config),
            chat_config: Arc::new(chat_config),
            model: None,
            share_dir: None,
            sessions,
            logins,
        }
    }

    /// Backend for `/process`.
    pub fn with_model(mut self, model: Arc<dyn VisionModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Directory searched by `?pdf=<name>` and `/chat/orden/{name}`.
    pub fn with_share_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.share_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(monitors::index))
        .route("/home", get(monitors::home))
        .route("/health", get(monitors::health))
        .route(
            "/.well-known/appspecific/com.chrome.devtools.json",
            get(monitors::devtools),
        )
        .route("/process", get(process::process_pdf))
        .route("/chat/file", post(chat::chat_file))
        .route("/chat/orden/{name}", post(chat::chat_orden))
        .route("/auth/send-code", post(auth::send_code))
        .route("/auth/verify-code", post(auth::verify_code))
        .route("/auth/reload-session", post(auth::reload_session))
        .fallback(monitors::not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bound every request by `timeout`; overruns answer 408 with the usual
/// error body.
pub fn with_request_timeout(app: Router, timeout: Duration) -> Router {
    app.layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(move |err: tower::BoxError| async move {
                error::middleware_error(err, timeout)
            }))
            .layer(TimeoutLayer::new(timeout)),
    )
}

/// Serve until SIGINT/SIGTERM.
///
/// A saved chat-provider session is loaded before the listener starts; a
/// missing or stale cookie file only disables the chat routes.
pub async fn serve(config: &ServerConfig, state: AppState) -> std::io::Result<()> {
    if state.sessions.base_url().is_some() {
        if let Err(e) = state.sessions.reload().await {
            tracing::warn!(
                target: TRACING_TARGET,
                error = %e,
                "No chat-provider session loaded; use /auth/send-code to log in"
            );
        }
    }

    let app = with_request_timeout(
        router(state),
        Duration::from_secs(config.request_timeout_secs),
    );
    let listener = TcpListener::bind(config.server_addr()).await?;

    tracing::info!(
        target: TRACING_TARGET,
        addr = %config.server_addr(),
        "Server is ready and listening for connections"
    );
    if config.binds_to_all_interfaces() {
        tracing::warn!(
            target: TRACING_TARGET,
            "Server is bound to all interfaces. Ensure firewall rules are properly configured."
        );
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .inspect_err(|e| {
            tracing::error!(target: TRACING_TARGET, error = %e, "Server encountered an error");
        })?;

    tracing::info!(target: TRACING_TARGET, "Server shut down gracefully");
    Ok(())
}
