//! Response parsing: raw model text → validated, normalised records.
//!
//! Three steps, each a pure function:
//!
//! 1. [`isolate_json`] strips markdown fences and locates the outermost
//!    balanced `{…}` object, ignoring braces inside string literals, so
//!    answers wrapped in prose still parse.
//! 2. [`parse_response`] deserialises that object into the typed records of
//!    [`crate::output`] for the requested [`ResponseSchema`]. Failures are
//!    returned as plain messages that the retry loop quotes back to the model.
//! 3. [`normalize_header`] / [`normalize_items`] enforce the business rules
//!    the model cannot be trusted with: name length, own tax id, totals.

use crate::config::{ExtractionConfig, ResponseSchema};
use crate::output::{DocumentHeader, ExtractionResult, HeaderEnvelope, ItemsEnvelope, LineItem};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("valid regex"));

/// A response that matched its schema. `documento` is `None` for items-only answers.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub documento: Option<DocumentHeader>,
    pub items: Vec<LineItem>,
}

impl ParsedResponse {
    /// Assemble the final record; a missing header becomes an all-null one.
    pub fn into_result(self) -> ExtractionResult {
        ExtractionResult {
            documento: self.documento.unwrap_or_default(),
            items: self.items,
        }
    }
}

/// Locate the JSON object inside a model answer.
pub fn isolate_json(raw: &str) -> Result<&str, String> {
    let body = RE_FENCE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|inner| inner.contains('{'))
        .unwrap_or(raw);

    let start = body
        .find('{')
        .ok_or_else(|| "no JSON object found in the response".to_string())?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in body[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&body[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    Err("the JSON object in the response is not closed".to_string())
}

/// Parse and validate a raw model answer against `schema`, then normalise it.
pub fn parse_response(
    raw: &str,
    schema: ResponseSchema,
    config: &ExtractionConfig,
) -> Result<ParsedResponse, String> {
    let json = isolate_json(raw)?;
    let invalid = |e: serde_json::Error| {
        if e.is_syntax() || e.is_eof() {
            format!("invalid JSON: {e}")
        } else {
            format!("JSON does not match the schema: {e}")
        }
    };

    let parsed = match schema {
        ResponseSchema::Full => {
            let r: ExtractionResult = serde_json::from_str(json).map_err(invalid)?;
            ParsedResponse {
                documento: Some(r.documento),
                items: r.items,
            }
        }
        ResponseSchema::HeaderOnly => {
            let r: HeaderEnvelope = serde_json::from_str(json).map_err(invalid)?;
            ParsedResponse {
                documento: Some(r.documento),
                items: Vec::new(),
            }
        }
        ResponseSchema::ItemsOnly => {
            let r: ItemsEnvelope = serde_json::from_str(json).map_err(invalid)?;
            ParsedResponse {
                documento: None,
                items: r.items,
            }
        }
    };

    Ok(ParsedResponse {
        documento: parsed.documento.map(|h| normalize_header(h, config)),
        items: normalize_items(parsed.items, config.name_limit),
    })
}

/// Apply tax-id and total rules to a header.
pub fn normalize_header(mut h: DocumentHeader, config: &ExtractionConfig) -> DocumentHeader {
    h.ruc = h.ruc.and_then(|r| {
        let cleaned: String = r.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
        if cleaned.is_empty() {
            return None;
        }
        if config.own_tax_id.as_deref() == Some(cleaned.as_str()) {
            debug!("Dropping own tax id from header");
            return None;
        }
        Some(cleaned)
    });

    if !h.igv && h.total.is_none() && h.sub_total.is_some() {
        h.total = h.sub_total;
    }
    h
}

/// Enforce the name limit on every item, moving overflow into the extras.
pub fn normalize_items(items: Vec<LineItem>, limit: usize) -> Vec<LineItem> {
    items.into_iter().map(|item| fit_name(item, limit)).collect()
}

/// Cut `nombre` at `limit` characters; the remainder, followed by any
/// existing extras, is redistributed over `adicional1` then `adicional2`,
/// each capped at `limit`.
fn fit_name(mut item: LineItem, limit: usize) -> LineItem {
    let fits = |s: &Option<String>| s.as_ref().map_or(true, |v| v.chars().count() <= limit);
    if item.nombre.chars().count() <= limit && fits(&item.adicional1) && fits(&item.adicional2) {
        return item;
    }

    let (head, overflow) = split_chars(&item.nombre, limit);
    item.nombre = head;

    let spill = [Some(overflow), item.adicional1.take(), item.adicional2.take()]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let (first, rest) = split_chars(&spill, limit);
    let (second, dropped) = split_chars(&rest, limit);
    if !dropped.is_empty() {
        debug!("Item '{}': {} chars of extra text dropped", item.nombre, dropped.chars().count());
    }
    item.adicional1 = Some(first).filter(|s| !s.is_empty());
    item.adicional2 = Some(second).filter(|s| !s.is_empty());
    item
}

/// `(first n chars trimmed, remainder trimmed)`.
fn split_chars(s: &str, n: usize) -> (String, String) {
    let s = s.trim();
    match s.char_indices().nth(n) {
        Some((byte, _)) => (s[..byte].trim_end().to_string(), s[byte..].trim().to_string()),
        None => (s.to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "documento": {"moneda": "USD", "ruc": "20-512345678", "proveedor": "ACME SAC",
            "codigo_factura": "F001-9", "fecha_emision": "01/02/2026", "forma_pago": "Contado",
            "igv": false, "sub_total": 500.0, "total": null},
        "items": [{"nombre": "Servicio {mantenimiento}", "cantidad": 1, "precio": 500}]
    }"#;

    fn config() -> ExtractionConfig {
        ExtractionConfig::builder()
            .own_tax_id("20100064571")
            .build()
            .unwrap()
    }

    #[test]
    fn isolates_pure_json() {
        assert_eq!(isolate_json(r#"{"a":1}"#).unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn isolates_json_in_prose_and_fences() {
        let raw = "Claro, aquí está:\n```json\n{\"a\": {\"b\": \"}\"}}\n```\nSaludos";
        assert_eq!(isolate_json(raw).unwrap(), "{\"a\": {\"b\": \"}\"}}");

        let raw = "Resultado: {\"a\": \"x \\\" }\"} fin {no}";
        assert_eq!(isolate_json(raw).unwrap(), "{\"a\": \"x \\\" }\"}");
    }

    #[test]
    fn no_object_is_an_error() {
        assert!(isolate_json("lo siento, no puedo").is_err());
        assert!(isolate_json("{\"a\": 1").is_err());
    }

    #[test]
    fn full_response_parses_and_normalises() {
        let p = parse_response(FULL, ResponseSchema::Full, &config()).unwrap();
        let h = p.documento.unwrap();
        assert_eq!(h.ruc.as_deref(), Some("20512345678"));
        assert_eq!(h.total, Some(500.0), "total falls back to sub_total without igv");
        assert_eq!(p.items.len(), 1);
        assert_eq!(p.items[0].nombre, "Servicio {mantenimiento}");
    }

    #[test]
    fn response_with_prose_parses() {
        let raw = format!("Aquí tienes el JSON solicitado:\n{FULL}\nEspero que ayude.");
        assert!(parse_response(&raw, ResponseSchema::Full, &config()).is_ok());
    }

    #[test]
    fn missing_header_field_is_rejected() {
        let raw = FULL.replace("\"moneda\": \"USD\", ", "");
        let err = parse_response(&raw, ResponseSchema::Full, &config()).unwrap_err();
        assert!(err.contains("moneda"), "got: {err}");
        assert!(err.starts_with("JSON does not match the schema"), "got: {err}");
    }

    #[test]
    fn broken_json_is_reported_as_syntax() {
        let err = parse_response("{\"documento\": {,}}", ResponseSchema::Full, &config()).unwrap_err();
        assert!(err.starts_with("invalid JSON"), "got: {err}");
    }

    #[test]
    fn own_tax_id_becomes_null() {
        let raw = FULL.replace("20-512345678", "20100064571");
        let p = parse_response(&raw, ResponseSchema::Full, &config()).unwrap();
        assert!(p.documento.unwrap().ruc.is_none());
    }

    #[test]
    fn header_only_ignores_items() {
        let raw = r#"{"documento": {"moneda": null, "ruc": null, "proveedor": "X",
            "codigo_factura": null, "fecha_emision": null, "forma_pago": null,
            "igv": true, "sub_total": 10, "total": 11.8}}"#;
        let p = parse_response(raw, ResponseSchema::HeaderOnly, &config()).unwrap();
        assert!(p.items.is_empty());
        assert_eq!(p.documento.unwrap().total, Some(11.8));
    }

    #[test]
    fn items_only_has_no_header() {
        let raw = r#"{"items": {"columnas": ["nombre", "cantidad"], "datos": [["Perno", 100]]}}"#;
        let p = parse_response(raw, ResponseSchema::ItemsOnly, &config()).unwrap();
        assert!(p.documento.is_none());
        assert_eq!(p.items[0].cantidad, Some(100.0));
        assert_eq!(p.clone().into_result().documento, DocumentHeader::default());
    }

    #[test]
    fn long_names_overflow_into_extras() {
        let name = "A".repeat(60) + &"B".repeat(60) + &"C".repeat(10);
        let mut item = LineItem::new(name);
        item.adicional1 = Some("COD-77".into());
        let out = fit_name(item, 60);
        assert_eq!(out.nombre, "A".repeat(60));
        assert_eq!(out.adicional1.as_deref(), Some("B".repeat(60).as_str()));
        assert_eq!(
            out.adicional2.as_deref(),
            Some(format!("{} COD-77", "C".repeat(10)).as_str())
        );
    }

    #[test]
    fn short_names_are_untouched() {
        let mut item = LineItem::new("Perno hexagonal 1/2");
        item.adicional2 = Some("zinc".into());
        let out = fit_name(item.clone(), 60);
        assert_eq!(out, item);
    }

    #[test]
    fn name_limit_counts_characters_not_bytes() {
        let name = "ñ".repeat(61);
        let out = fit_name(LineItem::new(name), 60);
        assert_eq!(out.nombre.chars().count(), 60);
        assert_eq!(out.adicional1.as_deref(), Some("ñ"));
    }
}
