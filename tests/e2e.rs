//! End-to-end pipeline tests on generated PDFs.
//!
//! These need a pdfium shared library (system-wide or `PDFIUM_LIB_PATH`).
//! When none can be bound each test prints SKIP and passes. The model is a
//! [`ScriptedModel`], so no API key or network access is required.
//!
//! Run with:
//!   PDFIUM_LIB_PATH=/path/to/libpdfium.so cargo test --test e2e -- --nocapture

use edgequake_pdf2json::model::ScriptedModel;
use edgequake_pdf2json::pipeline::render::bind_pdfium;
use edgequake_pdf2json::{
    extract, ErrorKind, ExtractionConfig, ExtractionConfigBuilder, ExtractionMethod, ModelInput,
    Pdf2JsonError, PdfSource, PipelineMode,
};
use serde_json::json;
use std::path::{Path, PathBuf};

// ── Test helpers ─────────────────────────────────────────────────────────────

macro_rules! skip_without_pdfium {
    () => {{
        if let Err(e) = bind_pdfium(None) {
            println!("SKIP: pdfium not available: {e}");
            return;
        }
    }};
}

/// Four lines of quotation-like text for page `page` (1-based).
fn page_lines(page: usize) -> Vec<String> {
    vec![
        format!("COTIZACION 0042 pagina {page}"),
        "RUC 20512345678 Ferreteria Lima SAC".to_string(),
        format!("Cantidad {} Precio unitario S/ 1.50", page * 10),
        "Subtotal 1000.00 IGV 180.00 Total 1180.00".to_string(),
    ]
}

/// Write a valid `pages`-page PDF with a Helvetica text layer.
fn write_pdf(dir: &Path, name: &str, pages: usize) -> PathBuf {
    let text: Vec<Vec<String>> = (1..=pages).map(page_lines).collect();
    write_pdf_with(dir, name, &text)
}

/// Write a PDF with one page per entry of `text`, each showing its lines.
fn write_pdf_with(dir: &Path, name: &str, text: &[Vec<String>]) -> PathBuf {
    let pages = text.len();
    let mut objects: Vec<String> = Vec::new();
    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", 4 + 2 * i)).collect();
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {pages} >>",
        kids.join(" ")
    ));
    objects.push("<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string());
    for i in 0..pages {
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 595 842] \
             /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
            5 + 2 * i
        ));
        let mut content = String::from("BT /F1 12 Tf 50 780 Td 16 TL\n");
        for line in &text[i] {
            content.push_str(&format!("({line}) Tj T*\n"));
        }
        content.push_str("ET");
        objects.push(format!(
            "<< /Length {} >>\nstream\n{content}\nendstream",
            content.len()
        ));
    }

    let mut out = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.push_str(&format!("{} 0 obj\n{body}\nendobj\n", i + 1));
    }
    let xref = out.len();
    out.push_str(&format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1));
    for off in offsets {
        out.push_str(&format!("{off:010} 00000 n \n"));
    }
    out.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref}\n%%EOF\n",
        objects.len() + 1
    ));

    let path = dir.join(name);
    std::fs::write(&path, out).unwrap();
    path
}

fn full_answer(item: &str) -> String {
    json!({
        "documento": {
            "moneda": "PEN", "ruc": "20512345678", "proveedor": "Ferreteria Lima SAC",
            "codigo_factura": "0042", "fecha_emision": null, "forma_pago": null,
            "igv": true, "sub_total": 1000, "total": 1180
        },
        "items": [{"nombre": item, "cantidad": 10, "precio": 1.5}]
    })
    .to_string()
}

fn items_answer(item: &str) -> String {
    json!({"items": [{"nombre": item, "cantidad": 1, "precio": 2}]}).to_string()
}

fn builder(dir: &Path, mode: PipelineMode, images_per_request: usize) -> ExtractionConfigBuilder {
    ExtractionConfig::builder()
        .mode(mode)
        .dpi(72)
        .max_pages(5)
        .images_per_request(images_per_request)
        .temp_dir(dir)
}

fn config(dir: &Path, mode: PipelineMode, images_per_request: usize) -> ExtractionConfig {
    builder(dir, mode, images_per_request).build().unwrap()
}

fn text_config(dir: &Path, ocr_command: &str) -> ExtractionConfig {
    builder(dir, PipelineMode::Text, 5)
        .ocr_command(ocr_command)
        .build()
        .unwrap()
}

fn sent_text(model: &ScriptedModel) -> String {
    match &model.requests()[0].input {
        ModelInput::Text(text) => text.clone(),
        other => panic!("expected text, got {:?}", other.mode()),
    }
}

const MISSING_OCR: &str = "/nonexistent/pdf2json-ocr";

fn image_indices(input: &ModelInput) -> Vec<usize> {
    match input {
        ModelInput::Images(pages) => pages.iter().map(|p| p.index).collect(),
        other => panic!("expected images, got {:?}", other.mode()),
    }
}

// ── Vision ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn vision_sends_at_most_max_pages_in_order() {
    skip_without_pdfium!();
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(dir.path(), "siete.pdf", 7);
    let model = ScriptedModel::answering(full_answer("Perno"));

    let out = extract(&PdfSource::Path(pdf), &model, &config(dir.path(), PipelineMode::Vision, 5))
        .await
        .unwrap();

    assert_eq!(model.calls(), 1);
    assert_eq!(image_indices(&model.requests()[0].input), vec![0, 1, 2, 3, 4]);
    assert_eq!(out.stats.pages_sent, 5);
    assert_eq!(out.stats.total_pages, 7);
    assert_eq!(out.stats.method, ExtractionMethod::Vision);
}

#[tokio::test]
async fn short_documents_send_every_page() {
    skip_without_pdfium!();
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(dir.path(), "dos.pdf", 2);
    let model = ScriptedModel::answering(full_answer("Perno"));

    let out = extract(&PdfSource::Path(pdf), &model, &config(dir.path(), PipelineMode::Vision, 5))
        .await
        .unwrap();

    assert_eq!(image_indices(&model.requests()[0].input), vec![0, 1]);
    assert_eq!(out.stats.pages_sent, 2);
}

#[tokio::test]
async fn vision_batches_concatenate_items_in_page_order() {
    skip_without_pdfium!();
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(dir.path(), "cinco.pdf", 5);
    let model = ScriptedModel::new()
        .then_answer(full_answer("Item paginas 1-2"))
        .then_answer(items_answer("Item paginas 3-4"))
        .then_answer(items_answer("Item pagina 5"));

    let out = extract(&PdfSource::Path(pdf), &model, &config(dir.path(), PipelineMode::Vision, 2))
        .await
        .unwrap();

    let requests = model.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(image_indices(&requests[0].input), vec![0, 1]);
    assert_eq!(image_indices(&requests[1].input), vec![2, 3]);
    assert_eq!(image_indices(&requests[2].input), vec![4]);
    assert_ne!(requests[0].prompt, requests[1].prompt, "later batches ask for items only");

    let names: Vec<&str> = out.result.items.iter().map(|i| i.nombre.as_str()).collect();
    assert_eq!(names, ["Item paginas 1-2", "Item paginas 3-4", "Item pagina 5"]);
    assert_eq!(out.result.documento.ruc.as_deref(), Some("20512345678"));
    assert_eq!(out.stats.attempts, 3);
}

// ── Text ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn text_mode_quotes_the_text_layer() {
    skip_without_pdfium!();
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf(dir.path(), "texto.pdf", 3);
    let model = ScriptedModel::answering(full_answer("Perno"));

    let out = extract(&PdfSource::Path(pdf), &model, &config(dir.path(), PipelineMode::Text, 5))
        .await
        .unwrap();

    assert_eq!(out.stats.method, ExtractionMethod::PdfText);
    match &model.requests()[0].input {
        ModelInput::Text(text) => {
            assert!(text.contains("20512345678"), "{text}");
            assert!(text.contains("pagina 3"), "{text}");
        }
        other => panic!("expected text, got {:?}", other.mode()),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn sparse_text_layer_goes_through_ocr() {
    skip_without_pdfium!();
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf_with(dir.path(), "escaneo.pdf", &[vec!["Hola".to_string()]]);
    let model = ScriptedModel::answering(full_answer("Perno"));

    // `echo` stands in for tesseract: it prints the arguments it was given.
    let out = extract(&PdfSource::Path(pdf), &model, &text_config(dir.path(), "echo"))
        .await
        .unwrap();

    assert_eq!(out.stats.method, ExtractionMethod::Ocr);
    let text = sent_text(&model);
    assert!(text.contains("page-001.png stdout -l spa"), "{text}");
    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("pdf2json-ocr-"))
        .count();
    assert_eq!(leftovers, 0, "OCR work dir is removed");
}

#[tokio::test]
async fn failed_ocr_falls_back_to_a_short_text_layer() {
    skip_without_pdfium!();
    let dir = tempfile::tempdir().unwrap();
    let short = vec!["Hola RUC 20512345678".to_string()];
    let pdf = write_pdf_with(dir.path(), "corto.pdf", &[short]);
    let model = ScriptedModel::answering(full_answer("Perno"));

    let out = extract(&PdfSource::Path(pdf), &model, &text_config(dir.path(), MISSING_OCR))
        .await
        .unwrap();

    assert_eq!(out.stats.method, ExtractionMethod::PdfText);
    assert!(sent_text(&model).contains("Hola RUC 20512345678"));
}

#[tokio::test]
async fn failed_ocr_on_an_empty_text_layer_is_a_conversion_error() {
    skip_without_pdfium!();
    let dir = tempfile::tempdir().unwrap();
    let pdf = write_pdf_with(dir.path(), "vacio.pdf", &[Vec::new()]);
    let model = ScriptedModel::answering(full_answer("Perno"));

    let err = extract(&PdfSource::Path(pdf), &model, &text_config(dir.path(), MISSING_OCR))
        .await
        .unwrap_err();

    assert!(matches!(err, Pdf2JsonError::OcrFailed(_)), "{err}");
    assert_eq!(err.kind(), ErrorKind::Conversion);
    assert_eq!(err.kind().status_code(), 500);
    assert_eq!(model.calls(), 0);
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn corrupt_pdf_is_reported_before_any_model_call() {
    skip_without_pdfium!();
    let dir = tempfile::tempdir().unwrap();
    let pdf = dir.path().join("roto.pdf");
    std::fs::write(&pdf, b"%PDF-1.4\nthis is not a pdf body").unwrap();
    let model = ScriptedModel::answering(full_answer("Perno"));

    let err = extract(&PdfSource::Path(pdf), &model, &config(dir.path(), PipelineMode::Vision, 5))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Input);
    assert_eq!(model.calls(), 0);
}
