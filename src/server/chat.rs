//! `/chat/*`: header extraction through the chat-provider web session.

use super::process::seconds;
use super::{AppState, Result, TRACING_TARGET};
use crate::error::Pdf2JsonError;
use crate::extract::extract;
use crate::model::ChatSessionModel;
use crate::output::DocumentHeader;
use crate::pipeline::input::{share_path, PdfSource};
use axum::extract::{Multipart, Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub documento: DocumentHeader,
    pub tiempo_respuesta: f64,
    pub intentos: u32,
}

async fn run_chat(state: &AppState, source: PdfSource) -> Result<Json<ChatResponse>> {
    let model = ChatSessionModel::new(Arc::clone(&state.sessions));
    let out = extract(&source, &model, &state.chat_config).await?;
    Ok(Json(ChatResponse {
        documento: out.result.documento,
        tiempo_respuesta: seconds(out.stats.duration_ms),
        intentos: out.stats.attempts,
    }))
}

/// First multipart field named `file`.
async fn read_file_field(multipart: &mut Multipart) -> Result<(String, Vec<u8>), Pdf2JsonError> {
    let bad = |e: axum::extract::multipart::MultipartError| Pdf2JsonError::InvalidInput {
        input: "file".into(),
        reason: e.body_text(),
    };
    while let Some(field) = multipart.next_field().await.map_err(bad)? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(bad)?;
        return Ok((file_name, bytes.to_vec()));
    }
    Err(Pdf2JsonError::MissingInput {
        hint: "send the PDF as multipart field 'file'".into(),
    })
}

#[tracing::instrument(skip_all)]
pub(super) async fn chat_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ChatResponse>> {
    state.sessions.require().await?;
    let (file_name, bytes) = read_file_field(&mut multipart).await?;
    tracing::info!(target: TRACING_TARGET, file = %file_name, bytes = bytes.len(), "Chat upload");
    run_chat(&state, PdfSource::Upload { file_name, bytes }).await
}

#[tracing::instrument(skip_all)]
pub(super) async fn chat_orden(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ChatResponse>> {
    state.sessions.require().await?;
    let dir = state
        .share_dir
        .as_deref()
        .ok_or_else(|| Pdf2JsonError::ShareFileMissing { name: name.clone() })?;
    let path = share_path(dir, &name)?;
    if !path.is_file() {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(name);
        return Err(Pdf2JsonError::ShareFileMissing { name }.into());
    }
    tracing::info!(target: TRACING_TARGET, path = %path.display(), "Chat share lookup");
    run_chat(&state, PdfSource::Path(path)).await
}
