//! `GET /process`: extraction with the configured vision backend.

use super::{AppState, Result, TRACING_TARGET};
use crate::error::Pdf2JsonError;
use crate::extract::extract;
use crate::output::{DocumentHeader, ExtractionMethod, ExtractionOutput, LineItem};
use crate::pipeline::input::{is_url, share_path, PdfSource};
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub(super) struct ProcessParams {
    /// File name inside the share directory.
    pdf: Option<String>,
    pdf_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub documento: DocumentHeader,
    pub items: Vec<LineItem>,
    pub intentos: u32,
    /// Seconds, two decimals.
    pub tiempo_respuesta: f64,
    pub metodo: ExtractionMethod,
}

impl From<ExtractionOutput> for ProcessResponse {
    fn from(out: ExtractionOutput) -> Self {
        Self {
            documento: out.result.documento,
            items: out.result.items,
            intentos: out.stats.attempts,
            tiempo_respuesta: seconds(out.stats.duration_ms),
            metodo: out.stats.method,
        }
    }
}

pub(super) fn seconds(ms: u64) -> f64 {
    (ms as f64 / 10.0).round() / 100.0
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Pick the source: `pdf_url` wins over `pdf` when both are given.
fn source_from(params: ProcessParams, state: &AppState) -> Result<PdfSource, Pdf2JsonError> {
    match (non_blank(params.pdf_url), non_blank(params.pdf)) {
        (Some(url), _) if is_url(&url) => Ok(PdfSource::Url(url)),
        (Some(url), _) => Err(Pdf2JsonError::InvalidInput {
            input: url,
            reason: "pdf_url must start with http:// or https://".into(),
        }),
        (None, Some(name)) => {
            let dir = state
                .share_dir
                .as_deref()
                .ok_or_else(|| Pdf2JsonError::InvalidInput {
                    input: name.clone(),
                    reason: "PDF_BASE_DIR is not configured; use pdf_url".into(),
                })?;
            Ok(PdfSource::Path(share_path(dir, &name)?))
        }
        (None, None) => Err(Pdf2JsonError::MissingInput {
            hint: "use /process?pdf=<nombre> or /process?pdf_url=<url>".into(),
        }),
    }
}

#[tracing::instrument(skip_all)]
pub(super) async fn process_pdf(
    State(state): State<AppState>,
    Query(params): Query<ProcessParams>,
) -> Result<Json<ProcessResponse>> {
    tracing::debug!(target: TRACING_TARGET, pdf = ?params.pdf, pdf_url = ?params.pdf_url, "Process request");
    let source = source_from(params, &state)?;
    let model = state
        .model
        .clone()
        .ok_or_else(|| Pdf2JsonError::ModelNotConfigured {
            provider: "vision".into(),
            hint: "set GROQ_API_KEY or PDF2JSON_PROVIDER".into(),
        })?;

    let out = extract(&source, model.as_ref(), &state.config).await?;
    tracing::info!(
        target: TRACING_TARGET,
        items = out.result.items.len(),
        attempts = out.stats.attempts,
        method = %out.stats.method,
        "PDF processed"
    );
    Ok(Json(out.into()))
}
