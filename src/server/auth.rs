//! `/auth/*`: email-code login and session reload.

use super::{AppState, Result, TRACING_TARGET};
use crate::error::Pdf2JsonError;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub(super) struct EmailRequest {
    email: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct VerifyCodeRequest {
    email: String,
    code: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies_guardadas: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T, Pdf2JsonError> {
    payload.map(|Json(v)| v).map_err(|e| Pdf2JsonError::InvalidInput {
        input: "request body".into(),
        reason: e.body_text(),
    })
}

#[tracing::instrument(skip_all)]
pub(super) async fn send_code(
    State(state): State<AppState>,
    payload: std::result::Result<Json<EmailRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>> {
    let req = body(payload)?;
    let message = state.logins.send_code(&req.email).await?;
    Ok(Json(LoginResponse {
        success: true,
        message: Some(message),
        ..Default::default()
    }))
}

#[tracing::instrument(skip_all)]
pub(super) async fn verify_code(
    State(state): State<AppState>,
    payload: std::result::Result<Json<VerifyCodeRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>> {
    let req = body(payload)?;
    let login = state.logins.verify_code(&req.email, &req.code).await?;

    // The cookies are on disk either way; a failed reload can be retried
    // through /auth/reload-session.
    let (organization_id, error) = match state.sessions.reload().await {
        Ok(session) => (Some(session.organization_id().to_string()), None),
        Err(e) => {
            tracing::warn!(target: TRACING_TARGET, error = %e, "Login saved but session reload failed");
            (None, Some(format!("session reload failed: {e}")))
        }
    };

    Ok(Json(LoginResponse {
        success: true,
        message: Some("Login exitoso".into()),
        error,
        cookies_guardadas: Some(login.cookies_saved),
        organization_id,
    }))
}

#[tracing::instrument(skip_all)]
pub(super) async fn reload_session(State(state): State<AppState>) -> Result<Json<LoginResponse>> {
    let session = state.sessions.reload().await?;
    Ok(Json(LoginResponse {
        success: true,
        message: Some("Sesión recargada".into()),
        organization_id: Some(session.organization_id().to_string()),
        ..Default::default()
    }))
}
