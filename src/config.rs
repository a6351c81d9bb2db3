//! Configuration types for PDF-to-JSON extraction.
//!
//! All per-request pipeline behaviour is controlled through
//! [`ExtractionConfig`], built via its [`ExtractionConfigBuilder`]. The
//! server clones one config per request and only ever overrides the
//! [`PipelineMode`] and [`ResponseSchema`] for the chat routes.

use crate::error::Pdf2JsonError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Configuration for a PDF-to-JSON extraction.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdf2json::{ExtractionConfig, PipelineMode};
///
/// let config = ExtractionConfig::builder()
///     .dpi(200)
///     .max_pages(5)
///     .mode(PipelineMode::Vision)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_pages, 5);
/// ```
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 200.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// Applied on top of the DPI scale so oversized pages (A0 posters) never
    /// allocate unbounded bitmaps.
    pub max_rendered_pixels: u32,

    /// Maximum number of pages sent to the model. Default: 5.
    ///
    /// Pages beyond the cap are silently dropped.
    pub max_pages: usize,

    /// Maximum number of page images per model call. Default: 5.
    pub images_per_request: usize,

    /// How the document content reaches the model. Default: [`PipelineMode::Vision`].
    pub mode: PipelineMode,

    /// Which JSON shape the model is asked for. Default: [`ResponseSchema::Full`].
    pub schema: ResponseSchema,

    /// Model identifier. If None, the backend default is used.
    pub model: Option<String>,

    /// Sampling temperature. Default: 0.0 (deterministic extraction).
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// Retries after the first attempt when the output is invalid or the
    /// call fails transiently. Default: 2 (three attempts in total).
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-model-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Largest PDF accepted from a URL, in bytes. Default: 50 MiB, the
    /// server's upload limit.
    pub max_download_bytes: u64,

    /// Maximum characters of a line item name. Default: 60.
    ///
    /// Overflow is moved into `adicional1`, then `adicional2`.
    pub name_limit: usize,

    /// Tax id of the receiving company. When the model reports it as the
    /// supplier's id it is replaced by `null`.
    pub own_tax_id: Option<String>,

    /// When the PDF text layer is good enough to skip OCR.
    pub text_sufficiency: TextSufficiency,

    /// Tesseract language code used by the OCR fallback. Default: "spa".
    pub ocr_lang: String,

    /// Per-page OCR timeout in seconds. Default: 60.
    pub ocr_timeout_secs: u64,

    /// OCR executable, called as `<cmd> <png> stdout -l <lang>`.
    /// Default: "tesseract" from `PATH`.
    pub ocr_command: String,

    /// Directory for request-scoped temp files. None = system temp dir.
    pub temp_dir: Option<PathBuf>,

    /// Explicit pdfium library path. None = `PDFIUM_LIB_PATH`, then system library.
    pub pdfium_lib_path: Option<PathBuf>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_rendered_pixels: 2000,
            max_pages: 5,
            images_per_request: 5,
            mode: PipelineMode::default(),
            schema: ResponseSchema::default(),
            model: None,
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            download_timeout_secs: 60,
            max_download_bytes: 50 * 1024 * 1024,
            name_limit: 60,
            own_tax_id: None,
            text_sufficiency: TextSufficiency::default(),
            ocr_lang: "spa".to_string(),
            ocr_timeout_secs: 60,
            ocr_command: "tesseract".to_string(),
            temp_dir: None,
            pdfium_lib_path: None,
        }
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Total number of model calls a single batch may consume.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// The directory request-scoped temp files go to.
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn images_per_request(mut self, n: usize) -> Self {
        self.config.images_per_request = n;
        self
    }

    pub fn mode(mut self, mode: PipelineMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn schema(mut self, schema: ResponseSchema) -> Self {
        self.config.schema = schema;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn max_download_bytes(mut self, n: u64) -> Self {
        self.config.max_download_bytes = n;
        self
    }

    pub fn name_limit(mut self, n: usize) -> Self {
        self.config.name_limit = n;
        self
    }

    pub fn own_tax_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.config.own_tax_id = if id.trim().is_empty() {
            None
        } else {
            Some(id.trim().to_string())
        };
        self
    }

    pub fn text_sufficiency(mut self, t: TextSufficiency) -> Self {
        self.config.text_sufficiency = t;
        self
    }

    pub fn ocr_lang(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_lang = lang.into();
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn ocr_command(mut self, cmd: impl Into<String>) -> Self {
        self.config.ocr_command = cmd.into();
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, Pdf2JsonError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(Pdf2JsonError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.max_pages == 0 {
            return Err(Pdf2JsonError::InvalidConfig(
                "max_pages must be ≥ 1".into(),
            ));
        }
        if c.images_per_request == 0 {
            return Err(Pdf2JsonError::InvalidConfig(
                "images_per_request must be ≥ 1".into(),
            ));
        }
        if c.max_download_bytes == 0 {
            return Err(Pdf2JsonError::InvalidConfig(
                "max_download_bytes must be ≥ 1".into(),
            ));
        }
        if c.ocr_command.trim().is_empty() {
            return Err(Pdf2JsonError::InvalidConfig(
                "ocr_command must not be empty".into(),
            ));
        }
        if c.name_limit == 0 {
            return Err(Pdf2JsonError::InvalidConfig(
                "name_limit must be ≥ 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&c.text_sufficiency.min_digit_ratio) {
            return Err(Pdf2JsonError::InvalidConfig(format!(
                "min_digit_ratio must be within 0–1, got {}",
                c.text_sufficiency.min_digit_ratio
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How document content is delivered to the model.
///
/// | Mode | Sends | Needs |
/// |------|-------|-------|
/// | `Vision` | page PNGs | pdfium |
/// | `Text` | text layer, OCR fallback | pdfium (+ tesseract for scans) |
/// | `Document` | the PDF file itself | a backend that accepts files |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    #[default]
    Vision,
    Text,
    Document,
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineMode::Vision => "vision",
            PipelineMode::Text => "text",
            PipelineMode::Document => "document",
        })
    }
}

impl FromStr for PipelineMode {
    type Err = Pdf2JsonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vision" | "images" => Ok(PipelineMode::Vision),
            "text" | "ocr" => Ok(PipelineMode::Text),
            "document" | "file" => Ok(PipelineMode::Document),
            other => Err(Pdf2JsonError::InvalidConfig(format!(
                "unknown pipeline mode '{other}' (expected vision, text or document)"
            ))),
        }
    }
}

/// JSON shape requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSchema {
    /// `{documento, items}`.
    #[default]
    Full,
    /// `{documento}` only. Used by the chat-provider routes.
    HeaderOnly,
    /// `{items}` only. Used for the second and later image batches.
    ItemsOnly,
}

/// Heuristic deciding whether an extracted text layer is usable or OCR is needed.
///
/// Quotations carry prices, quantities and tax ids, so a usable text layer
/// is long enough, contains some digits and mentions at least one keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSufficiency {
    /// Minimum trimmed length in characters. Default: 150.
    pub min_chars: usize,
    /// Minimum share of ASCII digits among all characters. Default: 0.02.
    pub min_digit_ratio: f32,
    /// At least one must occur (case-insensitive). Empty = no keyword check.
    pub keywords: Vec<String>,
}

impl Default for TextSufficiency {
    fn default() -> Self {
        Self {
            min_chars: 150,
            min_digit_ratio: 0.02,
            keywords: ["total", "subtotal", "igv", "precio", "cantidad", "s/", "usd", "ruc"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl TextSufficiency {
    /// True when `text` can be sent to the model without OCR.
    pub fn is_sufficient(&self, text: &str) -> bool {
        let t = text.trim();
        let len = t.chars().count();
        if len == 0 || len < self.min_chars {
            return false;
        }
        let digits = t.chars().filter(|c| c.is_ascii_digit()).count();
        if (digits as f32) / (len as f32) < self.min_digit_ratio {
            return false;
        }
        if self.keywords.is_empty() {
            return true;
        }
        let lower = t.to_lowercase();
        self.keywords
            .iter()
            .any(|k| lower.contains(&k.to_lowercase()))
    }
}
