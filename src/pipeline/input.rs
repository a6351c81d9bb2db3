//! Input resolution: turn a PDF reference into a request-scoped local file.
//!
//! ## Why copy uploads and downloads into a `TempDir`?
//!
//! pdfium and tesseract both want a file-system path. Writing into a
//! `TempDir` gives them one while guaranteeing removal when
//! [`ResolvedInput`] is dropped, on success, error or panic alike. The PDF
//! magic bytes (`%PDF`) are checked *before* anything is written, so a
//! rejected upload never touches the disk.

use crate::config::ExtractionConfig;
use crate::error::Pdf2JsonError;
use futures::StreamExt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

/// Where the PDF of a request comes from.
#[derive(Debug, Clone)]
pub enum PdfSource {
    /// A file on the local file system (CLI, share lookups).
    Path(PathBuf),
    /// An `http(s)` URL downloaded for the duration of the request.
    Url(String),
    /// A multipart upload.
    Upload { file_name: String, bytes: Vec<u8> },
}

impl PdfSource {
    /// Classify a CLI argument: URLs are downloaded, anything else is a path.
    pub fn from_arg(input: &str) -> Self {
        if is_url(input) {
            PdfSource::Url(input.to_string())
        } else {
            PdfSource::Path(PathBuf::from(input))
        }
    }
}

/// The resolved input: either a caller-owned path or a temp copy.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Downloaded or uploaded bytes. The `TempDir` keeps the copy alive
    /// until processing completes and deletes it on drop.
    Temporary { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Get the path to the PDF file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Temporary { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Map a user-supplied share name to a path inside `base_dir`.
///
/// Only the final path component is kept, so `../../etc/passwd` resolves
/// to `base_dir/passwd.pdf`. `.pdf` is appended when missing. Existence is
/// not checked here; callers decide how a missing file is reported.
pub fn share_path(base_dir: &Path, name: &str) -> Result<PathBuf, Pdf2JsonError> {
    let file_name = Path::new(name.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Pdf2JsonError::InvalidInput {
            input: name.to_string(),
            reason: "not a valid file name".into(),
        })?;

    let file_name = if has_pdf_extension(file_name) {
        file_name.to_string()
    } else {
        format!("{file_name}.pdf")
    };
    Ok(base_dir.join(file_name))
}

fn has_pdf_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Resolve a [`PdfSource`] to a local PDF file.
pub async fn resolve_input(
    source: &PdfSource,
    config: &ExtractionConfig,
) -> Result<ResolvedInput, Pdf2JsonError> {
    match source {
        PdfSource::Path(path) => resolve_local(path),
        PdfSource::Url(url) => download_url(url, config).await,
        PdfSource::Upload { file_name, bytes } => store_upload(file_name, bytes, config).await,
    }
}

/// Resolve a local file path, validating existence and PDF magic bytes.
fn resolve_local(path: &Path) -> Result<ResolvedInput, Pdf2JsonError> {
    let path = path.to_path_buf();
    if !path.is_file() {
        return Err(Pdf2JsonError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = Vec::with_capacity(4);
            f.by_ref()
                .take(4)
                .read_to_end(&mut magic)
                .map_err(|e| Pdf2JsonError::Internal(format!("Failed to read {}: {e}", path.display())))?;
            check_magic(&magic, &path)?;
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Pdf2JsonError::PermissionDenied { path });
        }
        Err(_) => return Err(Pdf2JsonError::FileNotFound { path }),
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

fn check_magic(bytes: &[u8], path: &Path) -> Result<(), Pdf2JsonError> {
    if bytes.len() >= 4 && &bytes[..4] == b"%PDF" {
        Ok(())
    } else {
        Err(Pdf2JsonError::NotAPdf {
            path: path.to_path_buf(),
            magic: bytes.iter().take(4).copied().collect(),
        })
    }
}

/// Create a request-scoped temp dir under the configured root.
async fn request_dir(config: &ExtractionConfig) -> Result<TempDir, Pdf2JsonError> {
    let root = config.temp_root();
    tokio::fs::create_dir_all(&root)
        .await
        .map_err(|e| Pdf2JsonError::Internal(format!("Cannot create temp dir {}: {e}", root.display())))?;
    tempfile::Builder::new()
        .prefix("pdf2json-")
        .tempdir_in(&root)
        .map_err(|e| Pdf2JsonError::Internal(format!("Cannot create temp dir: {e}")))
}

/// Validate uploaded bytes and write them into a request-scoped temp dir.
async fn store_upload(
    file_name: &str,
    bytes: &[u8],
    config: &ExtractionConfig,
) -> Result<ResolvedInput, Pdf2JsonError> {
    let display = PathBuf::from(file_name);
    if !has_pdf_extension(file_name) {
        return Err(Pdf2JsonError::InvalidInput {
            input: file_name.to_string(),
            reason: "only .pdf files are accepted".into(),
        });
    }
    check_magic(bytes, &display)?;

    let temp_dir = request_dir(config).await?;
    let path = temp_dir.path().join("upload.pdf");
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| Pdf2JsonError::Internal(format!("Failed to write temp file: {e}")))?;

    debug!("Stored upload '{}' ({} bytes)", file_name, bytes.len());
    Ok(ResolvedInput::Temporary {
        path,
        _temp_dir: temp_dir,
    })
}

/// Download a URL into a request-scoped temp dir and return the path.
async fn download_url(url: &str, config: &ExtractionConfig) -> Result<ResolvedInput, Pdf2JsonError> {
    let timeout_secs = config.download_timeout_secs;
    info!("Downloading PDF from: {}", url);

    let parsed = url::Url::parse(url).map_err(|e| Pdf2JsonError::InvalidInput {
        input: url.to_string(),
        reason: e.to_string(),
    })?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Pdf2JsonError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_send_err = |e: reqwest::Error| {
        if e.is_timeout() {
            Pdf2JsonError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Pdf2JsonError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(parsed.clone()).send().await.map_err(map_send_err)?;

    if !response.status().is_success() {
        return Err(Pdf2JsonError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let limit = config.max_download_bytes;
    let too_large = || Pdf2JsonError::DownloadTooLarge {
        url: url.to_string(),
        limit,
    };
    if response.content_length().is_some_and(|len| len > limit) {
        return Err(too_large());
    }

    // Content-Length may be absent or wrong; the running total is what counts.
    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(map_send_err)?;
        if bytes.len() as u64 + chunk.len() as u64 > limit {
            return Err(too_large());
        }
        bytes.extend_from_slice(&chunk);
    }
    let filename = extract_filename(&parsed);
    check_magic(&bytes, Path::new(&filename))?;

    let temp_dir = request_dir(config).await?;
    let file_path = temp_dir.path().join(&filename);
    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| Pdf2JsonError::Internal(format!("Failed to write temp file: {e}")))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());

    Ok(ResolvedInput::Temporary {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last URL path segment when it looks like a file name.
fn extract_filename(url: &url::Url) -> String {
    url.path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|last| !last.is_empty() && last.contains('.'))
        .filter(|last| Path::new(last).file_name().is_some())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn share_path_keeps_only_file_name() {
        let base = Path::new("/srv/share");
        assert_eq!(
            share_path(base, "../../etc/passwd").unwrap(),
            PathBuf::from("/srv/share/passwd.pdf")
        );
        assert_eq!(
            share_path(base, "OC-123").unwrap(),
            PathBuf::from("/srv/share/OC-123.pdf")
        );
        assert_eq!(
            share_path(base, "OC-123.PDF").unwrap(),
            PathBuf::from("/srv/share/OC-123.PDF")
        );
        assert!(share_path(base, "..").is_err());
        assert!(share_path(base, "  ").is_err());
    }

    #[test]
    fn filename_from_url() {
        let u = url::Url::parse("https://x/files/doc.pdf?sig=1").unwrap();
        assert_eq!(extract_filename(&u), "doc.pdf");
        let u = url::Url::parse("https://x/download").unwrap();
        assert_eq!(extract_filename(&u), "downloaded.pdf");
    }

    #[test]
    fn local_non_pdf_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("notes.pdf");
        std::fs::write(&p, b"hello").unwrap();
        match resolve_local(&p) {
            Err(Pdf2JsonError::NotAPdf { magic, .. }) => assert_eq!(magic, b"hell"),
            other => panic!("expected NotAPdf, got {other:?}"),
        }
    }

    #[test]
    fn local_missing_file() {
        let err = resolve_local(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(matches!(err, Pdf2JsonError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn rejected_upload_writes_nothing() {
        let root = tempfile::tempdir().unwrap();
        let config = ExtractionConfig::builder()
            .temp_dir(root.path())
            .build()
            .unwrap();

        let err = store_upload("invoice.pdf", b"PK\x03\x04zip", &config)
            .await
            .unwrap_err();
        assert!(matches!(err, Pdf2JsonError::NotAPdf { .. }));

        let err = store_upload("invoice.docx", b"%PDF-1.4", &config)
            .await
            .unwrap_err();
        assert!(matches!(err, Pdf2JsonError::InvalidInput { .. }));

        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn upload_temp_copy_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let config = ExtractionConfig::builder()
            .temp_dir(root.path())
            .build()
            .unwrap();

        let resolved = store_upload("a.pdf", b"%PDF-1.7\n%%EOF", &config)
            .await
            .unwrap();
        assert!(resolved.path().exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 1);
        drop(resolved);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
