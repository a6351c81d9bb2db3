//! Top-level extraction entry point.
//!
//! [`extract`] sequences the pipeline stages for one request:
//!
//! ```text
//! Received → Converting → Extracting (text mode) → Prompting
//!          → AwaitingModel → Validating → (Retry → AwaitingModel)* → Succeeded | Failed
//! ```
//!
//! Each transition is a structured `tracing` event. Everything created for
//! the request (downloaded or uploaded copies, OCR images) is owned by values
//! on this function's stack and removed when it returns, whichever way.

use crate::config::{ExtractionConfig, PipelineMode, ResponseSchema};
use crate::error::Pdf2JsonError;
use crate::model::{ModelInput, VisionModel};
use crate::output::{DocumentHeader, ExtractionMethod, ExtractionOutput, ExtractionResult, ExtractionStats};
use crate::pipeline::encode::{encode_page, PageImage};
use crate::pipeline::input::{resolve_input, PdfSource};
use crate::pipeline::llm::call_with_retry;
use crate::pipeline::{render, text};
use crate::prompts::text_block;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extract header and line items from a PDF.
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf2json::{extract, ExtractionConfig, PdfSource};
/// use edgequake_pdf2json::model::OpenAiCompatModel;
/// use std::time::Duration;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let model = OpenAiCompatModel::groq(std::env::var("GROQ_API_KEY")?, Duration::from_secs(120))?;
/// let config = ExtractionConfig::default();
/// let out = extract(&PdfSource::from_arg("cotizacion.pdf"), &model, &config).await?;
/// println!("{} items", out.result.items.len());
/// # Ok(())
/// # }
/// ```
pub async fn extract(
    source: &PdfSource,
    model: &dyn VisionModel,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Pdf2JsonError> {
    let start = Instant::now();
    info!(mode = %config.mode, model = model.name(), "Received");

    if !model.supports(config.mode) {
        return Err(Pdf2JsonError::InvalidConfig(format!(
            "model '{}' does not support {} mode",
            model.name(),
            config.mode
        )));
    }

    let resolved = resolve_input(source, config).await?;
    let pdf_path = resolved.path();
    info!(path = %pdf_path.display(), "Converting");

    let result = match config.mode {
        PipelineMode::Vision => vision(pdf_path, model, config).await,
        PipelineMode::Text => text_mode(pdf_path, model, config).await,
        PipelineMode::Document => document(source, pdf_path, model, config).await,
    };

    let elapsed = start.elapsed();
    match result {
        Ok((result, mut stats)) => {
            stats.duration_ms = elapsed.as_millis() as u64;
            info!(
                attempts = stats.attempts,
                items = result.items.len(),
                pages_sent = stats.pages_sent,
                duration_ms = stats.duration_ms,
                "Succeeded"
            );
            Ok(ExtractionOutput { result, stats })
        }
        Err(e) => {
            warn!(kind = e.kind().as_str(), duration_ms = elapsed.as_millis() as u64, "Failed: {e}");
            Err(e)
        }
    }
}

type StageResult = Result<(ExtractionResult, ExtractionStats), Pdf2JsonError>;

/// Page images in batches: the first batch uses the configured schema, the
/// rest ask for items only. Items are concatenated in page order.
async fn vision(pdf_path: &Path, model: &dyn VisionModel, config: &ExtractionConfig) -> StageResult {
    let rendered = render::render_pages(pdf_path, config).await?;
    let pages: Vec<PageImage> = rendered
        .pages
        .iter()
        .map(|(idx, img)| encode_page(*idx, img))
        .collect::<Result<_, _>>()?;
    let total_pages = rendered.total_pages;
    drop(rendered);

    let pages_sent = pages.len();
    let batches: Vec<Vec<PageImage>> = pages
        .chunks(config.images_per_request)
        .map(<[PageImage]>::to_vec)
        .collect();
    info!(pages = pages_sent, batches = batches.len(), "Prompting");

    let mut header: Option<DocumentHeader> = None;
    let mut items = Vec::new();
    let mut attempts = 0;

    for (bi, batch) in batches.into_iter().enumerate() {
        let schema = if bi == 0 {
            config.schema
        } else if config.schema == ResponseSchema::HeaderOnly {
            debug!("Header-only schema: skipping remaining batches");
            break;
        } else {
            ResponseSchema::ItemsOnly
        };
        let outcome = call_with_retry(model, ModelInput::Images(batch), schema, config).await?;
        attempts += outcome.attempts;
        if header.is_none() {
            header = outcome.parsed.documento;
        }
        items.extend(outcome.parsed.items);
    }

    Ok((
        ExtractionResult {
            documento: header.unwrap_or_default(),
            items,
        },
        ExtractionStats {
            attempts,
            pages_sent,
            total_pages,
            method: ExtractionMethod::Vision,
            duration_ms: 0,
        },
    ))
}

/// Text layer (or OCR) quoted into the prompt.
async fn text_mode(pdf_path: &Path, model: &dyn VisionModel, config: &ExtractionConfig) -> StageResult {
    info!("Extracting");
    let extracted = text::extract_text(pdf_path, config).await?;
    if extracted.text.trim().is_empty() {
        return Err(Pdf2JsonError::OcrFailed(
            "no text could be extracted from the document".into(),
        ));
    }
    info!(
        method = %extracted.method,
        chars = extracted.text.chars().count(),
        "Prompting"
    );

    let outcome = call_with_retry(
        model,
        ModelInput::Text(text_block(&extracted.text)),
        config.schema,
        config,
    )
    .await?;

    Ok((
        outcome.parsed.into_result(),
        ExtractionStats {
            attempts: outcome.attempts,
            pages_sent: extracted.pages_used,
            total_pages: extracted.total_pages,
            method: extracted.method,
            duration_ms: 0,
        },
    ))
}

/// The PDF file itself, for backends that read documents.
async fn document(
    source: &PdfSource,
    pdf_path: &Path,
    model: &dyn VisionModel,
    config: &ExtractionConfig,
) -> StageResult {
    let file_name = match source {
        PdfSource::Upload { file_name, .. } => file_name.clone(),
        _ => pdf_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document.pdf")
            .to_string(),
    };
    let total_pages = match render::page_count(pdf_path, config).await {
        Ok(n) => n,
        Err(e) => {
            debug!("Page count unavailable: {e}");
            0
        }
    };
    info!(file = %file_name, "Prompting");

    let outcome = call_with_retry(
        model,
        ModelInput::Document {
            path: pdf_path.to_path_buf(),
            file_name,
        },
        config.schema,
        config,
    )
    .await?;

    Ok((
        outcome.parsed.into_result(),
        ExtractionStats {
            attempts: outcome.attempts,
            pages_sent: total_pages,
            total_pages,
            method: ExtractionMethod::Document,
            duration_ms: 0,
        },
    ))
}
