//! # edgequake-pdf2json
//!
//! Extract the header and line items of quotations and invoices from PDF
//! files as typed JSON, using vision language models.
//!
//! ## Why this crate?
//!
//! Supplier quotations arrive as PDFs of every kind: exports from accounting
//! software, phone scans, spreadsheets printed to PDF. Template-based parsers
//! break on each new supplier. Instead this crate hands the page images (or
//! the text layer, or the file itself) to a multimodal model with a strict
//! JSON schema, then validates the answer into typed records and asks the
//! model to correct itself when it does not match.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF (share name / URL / upload)
//!  │
//!  ├─ 1. Input     resolve to a request-scoped local file, check %PDF
//!  ├─ 2. Render    rasterise the first max_pages pages via pdfium
//!  │   or Text     text layer, tesseract OCR when insufficient
//!  ├─ 3. Encode    PNG → base64
//!  ├─ 4. Model     Groq / edgequake-llm provider / chat-provider session
//!  ├─ 5. Validate  isolate JSON, typed parse, corrective retry (bounded)
//!  └─ 6. Output    {documento, items} + stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2json::{extract, ExtractionConfig, PdfSource};
//! use edgequake_pdf2json::model::{build_model, ModelSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let model = build_model(&ModelSettings {
//!         api_key: std::env::var("GROQ_API_KEY").ok(),
//!         ..ModelSettings::default()
//!     })?;
//!     let config = ExtractionConfig::default();
//!     let out = extract(&PdfSource::from_arg("cotizacion.pdf"), model.as_ref(), &config).await?;
//!     println!("{}", serde_json::to_string_pretty(&out.result)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2json` binary (clap + anyhow + dotenvy + tracing-subscriber) |
//!
//! Disable `cli` when using only the library or embedding the router:
//! ```toml
//! edgequake-pdf2json = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod server;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ExtractionConfig, ExtractionConfigBuilder, PipelineMode, ResponseSchema, TextSufficiency,
};
pub use error::{ErrorKind, ModelError, Pdf2JsonError};
pub use extract::extract;
pub use model::{ModelInput, ModelRequest, VisionModel};
pub use output::{
    Currency, DocumentHeader, ExtractionMethod, ExtractionOutput, ExtractionResult,
    ExtractionStats, LineItem, PaymentTerms,
};
pub use pipeline::input::PdfSource;
pub use server::{router, AppState, ServerConfig};
