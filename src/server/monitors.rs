//! Info, health and housekeeping routes.

use super::{AppState, ErrorBody, TRACING_TARGET};
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Serialize)]
pub(super) struct HealthResponse {
    ok: bool,
    api_version: &'static str,
    session_loaded: bool,
    model_configured: bool,
}

pub(super) async fn index(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "API PDF -> imágenes/texto -> modelo de visión -> JSON",
        "model": state.model.as_ref().map(|m| m.name()),
        "mode": state.config.mode.to_string(),
        "uso": "/process?pdf=<NOMBRE_DEL_PDF> | /process?pdf_url=<URL>",
    }))
}

pub(super) async fn home() -> &'static str {
    "¡Bienvenido a la API!"
}

#[tracing::instrument(skip_all)]
pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let response = HealthResponse {
        ok: true,
        api_version: env!("CARGO_PKG_VERSION"),
        session_loaded: state.sessions.is_loaded().await,
        model_configured: state.model.is_some(),
    };
    tracing::debug!(
        target: TRACING_TARGET,
        session_loaded = response.session_loaded,
        model_configured = response.model_configured,
        "Health check"
    );
    Json(response)
}

/// Browsers with DevTools open request this path on every page load.
pub(super) async fn devtools() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub(super) async fn not_found(uri: Uri) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "not_found".to_string(),
            detail: format!("no route for {}", uri.path()),
        }),
    )
}
