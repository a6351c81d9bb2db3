//! Image encoding: rendered page → base64 PNG wrapped in [`PageImage`].
//!
//! Vision APIs accept images as base64 data-URIs embedded in the JSON
//! request body. PNG is lossless, and crisp digits matter more than payload
//! size when the model has to read unit prices off a scanned quotation.

use crate::error::Pdf2JsonError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// One encoded page, in original page order.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 0-based page index.
    pub index: usize,
    pub image: ImageData,
}

impl PageImage {
    /// `data:image/png;base64,…` form used by OpenAI-compatible APIs.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.image.mime_type, self.image.data)
    }
}

/// Encode a rasterised page as a base64 PNG.
pub fn encode_page(index: usize, img: &DynamicImage) -> Result<PageImage, Pdf2JsonError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| Pdf2JsonError::RasterisationFailed {
            page: index + 1,
            detail: format!("PNG encode: {e}"),
        })?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page {} → {} bytes base64", index + 1, b64.len());

    Ok(PageImage {
        index,
        image: ImageData::new(b64, "image/png").with_detail("high"),
    })
}

/// Write a rendered page as PNG to disk (OCR input).
pub fn write_png(img: &DynamicImage, path: &std::path::Path, page: usize) -> Result<(), Pdf2JsonError> {
    img.save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| Pdf2JsonError::OcrFailed(format!("cannot write page {page} PNG: {e}")))
}
