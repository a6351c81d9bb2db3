//! PDF access via pdfium: page rasterisation and text-layer extraction.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so
//! Tokio worker threads never stall during CPU-heavy rendering.
//!
//! ## Why cap pixels on top of DPI?
//!
//! Page sizes vary wildly: an A0 poster at 200 DPI would produce a
//! 6,600 × 9,300 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded.

use crate::config::ExtractionConfig;
use crate::error::Pdf2JsonError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Rasterised pages plus the document's real page count.
#[derive(Debug)]
pub struct RenderedPages {
    pub total_pages: usize,
    /// `(page_index_0based, image)` in page order.
    pub pages: Vec<(usize, DynamicImage)>,
}

/// Text layer of the first pages plus the document's real page count.
#[derive(Debug, Clone)]
pub struct TextLayer {
    pub total_pages: usize,
    /// `(page_index_0based, text)` in page order.
    pub pages: Vec<(usize, String)>,
}

impl TextLayer {
    /// All page texts joined with blank lines.
    pub fn joined(&self) -> String {
        self.pages
            .iter()
            .map(|(_, t)| t.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Indices of the pages that are processed: the first `max_pages`, in order.
pub fn page_indices(total_pages: usize, max_pages: usize) -> Vec<usize> {
    (0..total_pages.min(max_pages)).collect()
}

/// Bind pdfium: explicit path, then `PDFIUM_LIB_PATH`, then the system library.
///
/// A directory is accepted in place of a file; the platform library name
/// (`libpdfium.so`, `libpdfium.dylib`, `pdfium.dll`) is appended.
pub fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, Pdf2JsonError> {
    let configured = lib_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

    let bindings = match configured {
        Some(p) => {
            let p = if p.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&p)
            } else {
                p
            };
            debug!("Binding pdfium from {}", p.display());
            Pdfium::bind_to_library(&p)
        }
        None => Pdfium::bind_to_system_library(),
    };

    bindings
        .map(Pdfium::new)
        .map_err(|e| Pdf2JsonError::PdfiumBindingFailed(format!("{e:?}")))
}

/// Rasterise the first `max_pages` pages of a PDF.
pub async fn render_pages(
    pdf_path: &Path,
    config: &ExtractionConfig,
) -> Result<RenderedPages, Pdf2JsonError> {
    let path = pdf_path.to_path_buf();
    let lib = config.pdfium_lib_path.clone();
    let dpi = config.dpi;
    let max_pixels = config.max_rendered_pixels;
    let max_pages = config.max_pages;

    tokio::task::spawn_blocking(move || {
        render_pages_blocking(&path, lib.as_deref(), dpi, max_pixels, max_pages)
    })
    .await
    .map_err(|e| Pdf2JsonError::Internal(format!("Render task panicked: {e}")))?
}

/// Extract the text layer of the first `max_pages` pages.
pub async fn extract_text_layer(
    pdf_path: &Path,
    config: &ExtractionConfig,
) -> Result<TextLayer, Pdf2JsonError> {
    let path = pdf_path.to_path_buf();
    let lib = config.pdfium_lib_path.clone();
    let max_pages = config.max_pages;

    tokio::task::spawn_blocking(move || text_layer_blocking(&path, lib.as_deref(), max_pages))
        .await
        .map_err(|e| Pdf2JsonError::Internal(format!("Text task panicked: {e}")))?
}

/// Number of pages in the PDF.
pub async fn page_count(pdf_path: &Path, config: &ExtractionConfig) -> Result<usize, Pdf2JsonError> {
    let path = pdf_path.to_path_buf();
    let lib = config.pdfium_lib_path.clone();

    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium(lib.as_deref())?;
        let document = open(&pdfium, &path)?;
        let total = document.pages().len() as usize;
        Ok(total)
    })
    .await
    .map_err(|e| Pdf2JsonError::Internal(format!("Page-count task panicked: {e}")))?
}

fn open<'a>(pdfium: &'a Pdfium, pdf_path: &Path) -> Result<PdfDocument<'a>, Pdf2JsonError> {
    pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| Pdf2JsonError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{e:?}"),
        })
}

/// Blocking implementation of page rendering.
fn render_pages_blocking(
    pdf_path: &Path,
    lib: Option<&Path>,
    dpi: u32,
    max_pixels: u32,
    max_pages: usize,
) -> Result<RenderedPages, Pdf2JsonError> {
    let pdfium = bind_pdfium(lib)?;
    let document = open(&pdfium, pdf_path)?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    if total_pages == 0 {
        return Err(Pdf2JsonError::EmptyDocument {
            path: pdf_path.to_path_buf(),
        });
    }
    let indices = page_indices(total_pages, max_pages);
    info!("PDF loaded: {} pages, rendering {}", total_pages, indices.len());
    if indices.len() < total_pages {
        debug!(
            "Dropping pages {}..={} (max_pages={})",
            indices.len() + 1,
            total_pages,
            max_pages
        );
    }

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(indices.len());
    for idx in indices {
        let page = pages
            .get(idx as u16)
            .map_err(|e| Pdf2JsonError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{e:?}"),
            })?;

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            Pdf2JsonError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{e:?}"),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        results.push((idx, image));
    }

    Ok(RenderedPages {
        total_pages,
        pages: results,
    })
}

/// Blocking implementation of text-layer extraction.
fn text_layer_blocking(
    pdf_path: &Path,
    lib: Option<&Path>,
    max_pages: usize,
) -> Result<TextLayer, Pdf2JsonError> {
    let pdfium = bind_pdfium(lib)?;
    let document = open(&pdfium, pdf_path)?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    if total_pages == 0 {
        return Err(Pdf2JsonError::EmptyDocument {
            path: pdf_path.to_path_buf(),
        });
    }

    let mut texts = Vec::new();
    for idx in page_indices(total_pages, max_pages) {
        let page = pages
            .get(idx as u16)
            .map_err(|e| Pdf2JsonError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: format!("page {}: {e:?}", idx + 1),
            })?;
        // Pages without a text layer yield an empty string, not an error.
        let text = page.text().map(|t| t.all()).unwrap_or_default();
        debug!("Page {}: {} chars of text", idx + 1, text.chars().count());
        texts.push((idx, text));
    }

    Ok(TextLayer {
        total_pages,
        pages: texts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_capped_and_ordered() {
        assert_eq!(page_indices(3, 5), vec![0, 1, 2]);
        assert_eq!(page_indices(8, 5), vec![0, 1, 2, 3, 4]);
        assert_eq!(page_indices(0, 5), Vec::<usize>::new());
        assert_eq!(page_indices(5, 1), vec![0]);
    }

    #[test]
    fn text_layer_join() {
        let t = TextLayer {
            total_pages: 2,
            pages: vec![(0, "uno".into()), (1, "dos".into())],
        };
        assert_eq!(t.joined(), "uno\n\ndos");
    }
}
