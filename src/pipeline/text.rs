//! Text pipeline: PDF text layer with an OCR fallback, then normalisation.
//!
//! ## Two tiers
//!
//! 1. The pdfium text layer of the first `max_pages` pages. Cheap and exact
//!    for PDFs produced by accounting software.
//! 2. When [`TextSufficiency`](crate::config::TextSufficiency) rejects that
//!    text (scans, image-only quotations) the same pages are rendered, written
//!    as PNGs into a request-scoped `TempDir`, and read with the OCR command
//!    (`tesseract` unless configured), one bounded subprocess per page.
//!
//! When OCR fails, a short but non-empty text layer is still used (reported
//! as `PDF_TEXT`); only an empty text layer turns the OCR failure into an
//! [`OcrFailed`](Pdf2JsonError::OcrFailed) error.
//!
//! Either way the text is normalised before it is quoted in a prompt: PDF
//! text layers break lines mid-sentence and hyphenate words, which wastes
//! tokens and splits item names across rows.

use crate::config::ExtractionConfig;
use crate::error::Pdf2JsonError;
use crate::output::ExtractionMethod;
use crate::pipeline::{encode, render};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

static RE_HYPHEN_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\w)-\n(\w)").expect("valid regex"));
static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{2,}").expect("valid regex"));
static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").expect("valid regex"));
static RE_PARA_PADDING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" *\n\n *").expect("valid regex"));

/// Normalised document text and where it came from.
#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub text: String,
    pub method: ExtractionMethod,
    pub total_pages: usize,
    pub pages_used: usize,
}

/// Extract prompt-ready text from a PDF.
pub async fn extract_text(
    pdf_path: &Path,
    config: &ExtractionConfig,
) -> Result<ExtractedText, Pdf2JsonError> {
    let layer = render::extract_text_layer(pdf_path, config).await?;
    let raw = layer.joined();

    if config.text_sufficiency.is_sufficient(&raw) {
        info!(chars = raw.chars().count(), "Text layer is sufficient");
        return Ok(ExtractedText {
            text: normalize_text(&raw),
            method: ExtractionMethod::PdfText,
            total_pages: layer.total_pages,
            pages_used: layer.pages.len(),
        });
    }

    info!(
        chars = raw.chars().count(),
        "Text layer insufficient, falling back to OCR"
    );
    match ocr_pages(pdf_path, config).await {
        Ok((text, pages_used)) => Ok(ExtractedText {
            text: normalize_text(&text),
            method: ExtractionMethod::Ocr,
            total_pages: layer.total_pages,
            pages_used,
        }),
        Err(e) if !raw.trim().is_empty() => {
            warn!("OCR unavailable ({e}); using the short text layer");
            Ok(ExtractedText {
                text: normalize_text(&raw),
                method: ExtractionMethod::PdfText,
                total_pages: layer.total_pages,
                pages_used: layer.pages.len(),
            })
        }
        Err(e) => Err(e),
    }
}

/// Render the first pages and run OCR on each; returns text and page count.
async fn ocr_pages(
    pdf_path: &Path,
    config: &ExtractionConfig,
) -> Result<(String, usize), Pdf2JsonError> {
    let rendered = render::render_pages(pdf_path, config).await?;

    let root = config.temp_root();
    tokio::fs::create_dir_all(&root)
        .await
        .map_err(|e| Pdf2JsonError::Internal(format!("Cannot create temp dir {}: {e}", root.display())))?;
    let work_dir = tempfile::Builder::new()
        .prefix("pdf2json-ocr-")
        .tempdir_in(&root)
        .map_err(|e| Pdf2JsonError::Internal(format!("Cannot create OCR temp dir: {e}")))?;

    let mut parts = Vec::with_capacity(rendered.pages.len());
    for (idx, image) in &rendered.pages {
        let png = work_dir.path().join(format!("page-{:03}.png", idx + 1));
        encode::write_png(image, &png, idx + 1)?;
        let text = run_ocr(&config.ocr_command, &png, &config.ocr_lang, config.ocr_timeout_secs).await?;
        debug!("OCR page {} → {} chars", idx + 1, text.chars().count());
        parts.push(text);
    }

    Ok((parts.join("\n").trim().to_string(), rendered.pages.len()))
}

/// `<cmd> <png> stdout -l <lang>` with a timeout.
async fn run_ocr(cmd: &str, png: &Path, lang: &str, timeout_secs: u64) -> Result<String, Pdf2JsonError> {
    let child = tokio::process::Command::new(cmd)
        .arg(png)
        .arg("stdout")
        .arg("-l")
        .arg(lang)
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), child)
        .await
        .map_err(|_| Pdf2JsonError::OcrFailed(format!("{cmd} timed out after {timeout_secs}s")))?
        .map_err(|e| Pdf2JsonError::OcrFailed(format!("cannot run {cmd}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Pdf2JsonError::OcrFailed(format!(
            "{cmd} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Clean up raw PDF or OCR text for prompting.
///
/// Unifies line endings, joins hyphenated words split across lines, turns
/// single line breaks into spaces while keeping paragraph breaks, collapses
/// runs of spaces and replaces ligatures and typographic dashes.
pub fn normalize_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = text
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    let text = RE_HYPHEN_BREAK.replace_all(&text, "$1$2");
    let text = RE_BLANK_LINES.replace_all(&text, "\n\n");

    let text = text
        .split("\n\n")
        .map(|para| para.replace('\n', " "))
        .collect::<Vec<_>>()
        .join("\n\n");

    let text = RE_SPACES.replace_all(&text, " ");
    let text = RE_PARA_PADDING.replace_all(&text, "\n\n");

    text.replace('\u{FB01}', "fi")
        .replace('\u{FB02}', "fl")
        .replace(['\u{2014}', '\u{2013}', '\u{2022}'], "-")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_hyphenated_words() {
        assert_eq!(normalize_text("rodamien-\ntos"), "rodamientos");
    }

    #[test]
    fn single_breaks_become_spaces_paragraphs_survive() {
        let raw = "Tubo PVC\n2 pulgadas\n\n\n\nTOTAL   166.38  \r\n";
        assert_eq!(normalize_text(raw), "Tubo PVC 2 pulgadas\n\nTOTAL 166.38");
    }

    #[test]
    fn ligatures_and_dashes() {
        assert_eq!(
            normalize_text("\u{FB01}ltro \u{2014} of\u{FB02}ine \u{2022} a\u{2013}b"),
            "filtro - offline - a-b"
        );
    }

    #[test]
    fn paragraph_padding_is_removed() {
        assert_eq!(normalize_text("a  \n\n   b"), "a\n\nb");
    }

    #[test]
    fn empty_input() {
        assert_eq!(normalize_text(""), "");
        assert_eq!(normalize_text(" \n \n"), "");
    }
}
