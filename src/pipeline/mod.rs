//! Pipeline stages for PDF-to-JSON extraction.
//!
//! Each submodule implements exactly one transformation step, so every
//! stage is testable on its own and a backend or renderer can change
//! without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ─────────┐
//! (path/URL/  (pdfium)   (base64 PNG)    ├──▶ llm ──▶ parse
//!  upload)      └──▶ text (layer / OCR) ─┘   (retry)  (validate)
//! ```
//!
//! 1. [`input`]  : resolve a share name, path, URL or upload to a request-scoped file
//! 2. [`render`] : rasterise the first pages or read their text layer; runs
//!    in `spawn_blocking` because pdfium is not async-safe
//! 3. [`encode`] : PNG-encode and base64-wrap each page for the model request
//! 4. [`text`]   : text layer with tesseract fallback, then normalisation
//! 5. [`llm`]    : bounded retry loop with corrective prompts; the only stage
//!    that talks to a model
//! 6. [`parse`]  : isolate, deserialise and normalise the JSON answer

pub mod encode;
pub mod input;
pub mod llm;
pub mod parse;
pub mod render;
pub mod text;
