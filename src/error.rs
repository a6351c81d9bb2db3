//! Error types for the edgequake-pdf2json library.
//!
//! Every failure of an extraction request is a [`Pdf2JsonError`]. Each
//! variant belongs to exactly one [`ErrorKind`], and the kind alone decides
//! the HTTP status the server answers with. Handlers never inspect messages.
//!
//! Model backends report their own, narrower [`ModelError`]; the retry loop in
//! [`crate::pipeline::llm`] decides which of those are worth another attempt
//! and converts the final one into a [`Pdf2JsonError`].

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the edgequake-pdf2json library.
#[derive(Debug, Error)]
pub enum Pdf2JsonError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// No PDF reference was supplied with the request.
    #[error("Missing PDF reference: {hint}")]
    MissingInput { hint: String },

    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file name, path or URL.
    #[error("Invalid input '{input}': {reason}")]
    InvalidInput { input: String, reason: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The download is larger than `max_download_bytes`.
    #[error("Download of '{url}' exceeds the {limit}-byte limit")]
    DownloadTooLarge { url: String, limit: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: Vec<u8> },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// A share lookup by name found nothing (chat routes answer 404).
    #[error("File not found in share: {name}")]
    ShareFileMissing { name: String },

    // ── Conversion errors ────────────────────────────────────────────────
    /// The PDF could be opened but yielded no pages.
    #[error("PDF '{path}' has no pages")]
    EmptyDocument { path: PathBuf },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// OCR fallback failed (tesseract missing or crashed).
    #[error("OCR failed: {0}")]
    OcrFailed(String),

    // ── Model errors ─────────────────────────────────────────────────────
    /// No model backend is configured (missing API key etc.).
    #[error("Model provider '{provider}' is not configured: {hint}")]
    ModelNotConfigured { provider: String, hint: String },

    /// Timeouts, rate limits and 5xx kept failing after every retry.
    #[error("Model call failed after {attempts} attempt(s): {detail}")]
    ModelTransient { attempts: u32, detail: String },

    /// The provider refused our credentials or the session expired.
    #[error("Authentication error from provider '{provider}': {detail}")]
    ModelAuth { provider: String, detail: String },

    /// The provider rejected the request in a way retries cannot fix.
    #[error("Model API error: {0}")]
    ModelRejected(String),

    /// The model never produced JSON matching the schema.
    #[error("Extraction failed: model output did not match the schema after {attempts} attempt(s): {detail}")]
    SchemaValidation { attempts: u32, detail: String },

    // ── Session errors ───────────────────────────────────────────────────
    /// No chat-provider session is loaded.
    #[error("No chat-provider session: {0}")]
    SessionUnavailable(String),

    /// Email-code login step failed (wrong code, unknown email, etc.).
    #[error("Login failed: {0}")]
    LoginRejected(String),

    /// The provider rate-limited the login flow.
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    /// Could not read or write the cookie file.
    #[error("Cookie store error at '{path}': {detail}")]
    CookieStore { path: PathBuf, detail: String },

    // ── Config errors ────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The whole request ran past the server's request timeout.
    #[error("Request did not finish within {secs}s")]
    RequestTimeout { secs: u64 },

    // ── Catch-all ────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error classification used for HTTP status mapping and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    NotFound,
    Conversion,
    ModelTransient,
    ModelAuth,
    SchemaValidation,
    Unavailable,
    RateLimited,
    Timeout,
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable name, used as the `error` field of responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Input => "input_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conversion => "conversion_error",
            ErrorKind::ModelTransient => "model_transient_error",
            ErrorKind::ModelAuth => "model_auth_error",
            ErrorKind::SchemaValidation => "schema_validation_error",
            ErrorKind::Unavailable => "service_unavailable",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Timeout => "request_timeout",
            ErrorKind::Internal => "internal_error",
        }
    }

    /// HTTP status code for this kind.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::Input => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::ModelAuth => 401,
            ErrorKind::RateLimited => 429,
            ErrorKind::Timeout => 408,
            ErrorKind::Unavailable => 503,
            ErrorKind::Conversion
            | ErrorKind::ModelTransient
            | ErrorKind::SchemaValidation
            | ErrorKind::Internal => 500,
        }
    }
}

impl Pdf2JsonError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        use Pdf2JsonError::*;
        match self {
            MissingInput { .. }
            | FileNotFound { .. }
            | PermissionDenied { .. }
            | InvalidInput { .. }
            | DownloadFailed { .. }
            | DownloadTimeout { .. }
            | DownloadTooLarge { .. }
            | NotAPdf { .. }
            | CorruptPdf { .. }
            | EmptyDocument { .. }
            | LoginRejected(_) => ErrorKind::Input,
            ShareFileMissing { .. } => ErrorKind::NotFound,
            RasterisationFailed { .. } | PdfiumBindingFailed(_) | OcrFailed(_) => {
                ErrorKind::Conversion
            }
            ModelTransient { .. } => ErrorKind::ModelTransient,
            ModelAuth { .. } => ErrorKind::ModelAuth,
            SchemaValidation { .. } => ErrorKind::SchemaValidation,
            ModelNotConfigured { .. } | SessionUnavailable(_) => ErrorKind::Unavailable,
            RateLimited(_) => ErrorKind::RateLimited,
            RequestTimeout { .. } => ErrorKind::Timeout,
            ModelRejected(_) | CookieStore { .. } | InvalidConfig(_) | Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Failure of a single call to a model backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    /// Timeout, connection error, HTTP 429 or 5xx. Worth retrying.
    #[error("transient model error: {0}")]
    Transient(String),

    /// HTTP 401/403 or an expired chat-provider session.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Any other refusal (HTTP 4xx, malformed request).
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The backend cannot accept this kind of input.
    #[error("unsupported input: {0}")]
    Unsupported(String),
}

impl ModelError {
    /// Map an HTTP status from a provider to an error kind.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = format!("HTTP {status}: {}", truncate_detail(body));
        match status {
            401 | 403 => ModelError::Auth(detail),
            408 | 429 | 500..=599 => ModelError::Transient(detail),
            _ => ModelError::Rejected(detail),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ModelError::Transient(_))
    }
}

/// Keep provider error bodies short enough for logs and responses.
pub(crate) fn truncate_detail(body: &str) -> String {
    const MAX: usize = 300;
    let body = body.trim();
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX).collect();
        format!("{cut}\u{2026}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_map_to_400() {
        let e = Pdf2JsonError::MissingInput {
            hint: "pdf or pdf_url".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Input);
        assert_eq!(e.kind().status_code(), 400);
    }

    #[test]
    fn auth_error_is_distinct_kind() {
        let e = Pdf2JsonError::ModelAuth {
            provider: "chat".into(),
            detail: "session expired".into(),
        };
        assert_eq!(e.kind(), ErrorKind::ModelAuth);
        assert_eq!(e.kind().as_str(), "model_auth_error");
        assert!(e.to_string().contains("session expired"));
    }

    #[test]
    fn schema_validation_display() {
        let e = Pdf2JsonError::SchemaValidation {
            attempts: 3,
            detail: "missing field `moneda`".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("3 attempt"), "got: {msg}");
        assert_eq!(e.kind().status_code(), 500);
    }

    #[test]
    fn status_classification() {
        assert!(matches!(ModelError::from_status(401, ""), ModelError::Auth(_)));
        assert!(matches!(ModelError::from_status(403, ""), ModelError::Auth(_)));
        assert!(ModelError::from_status(429, "slow down").is_transient());
        assert!(ModelError::from_status(503, "").is_transient());
        assert!(matches!(
            ModelError::from_status(400, "bad"),
            ModelError::Rejected(_)
        ));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(1000);
        let d = truncate_detail(&body);
        assert!(d.chars().count() <= 301);
    }
}
