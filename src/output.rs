//! Output types: the typed extraction record and per-request statistics.
//!
//! ## Why custom deserializers?
//!
//! Models are asked for a fixed JSON shape but answer with small variations:
//! numbers as strings (`"1,250.00"`), currencies as words (`"SOLES"`), tax ids
//! as numbers. Each field accepts those variations and nothing else, so a
//! record either deserializes into a fully typed [`ExtractionResult`] or fails
//! with a message precise enough to go back to the model in a corrective
//! prompt. Header keys use `deserialize_with` without `default`, which makes
//! the key mandatory while still allowing a `null` value.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ── Extraction record ────────────────────────────────────────────────────

/// Header and line items of one quotation or invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub documento: DocumentHeader,
    #[serde(deserialize_with = "items_any_form")]
    pub items: Vec<LineItem>,
}

/// Document-level fields. Wire names follow the Spanish API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentHeader {
    #[serde(deserialize_with = "nullable_currency")]
    pub moneda: Option<Currency>,

    /// Supplier tax id (RUC).
    #[serde(deserialize_with = "nullable_text")]
    pub ruc: Option<String>,

    #[serde(alias = "empresa", deserialize_with = "nullable_text")]
    pub proveedor: Option<String>,

    #[serde(deserialize_with = "nullable_text")]
    pub codigo_factura: Option<String>,

    #[serde(deserialize_with = "nullable_text")]
    pub fecha_emision: Option<String>,

    #[serde(alias = "formato_pago", deserialize_with = "nullable_terms")]
    pub forma_pago: Option<PaymentTerms>,

    /// Whether the amounts include IGV (sales tax).
    #[serde(deserialize_with = "tax_flag")]
    pub igv: bool,

    #[serde(deserialize_with = "nullable_number")]
    pub sub_total: Option<f64>,

    #[serde(deserialize_with = "nullable_number")]
    pub total: Option<f64>,

    #[serde(default, deserialize_with = "nullable_text", skip_serializing_if = "Option::is_none")]
    pub vigencia: Option<String>,

    #[serde(default, deserialize_with = "nullable_number", skip_serializing_if = "Option::is_none")]
    pub monto_igv: Option<f64>,
}

/// One product or service row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(deserialize_with = "required_text")]
    pub nombre: String,

    #[serde(default, deserialize_with = "nullable_number")]
    pub cantidad: Option<f64>,

    /// Unit price.
    #[serde(default, deserialize_with = "nullable_number")]
    pub precio: Option<f64>,

    #[serde(default = "default_unit", deserialize_with = "unit")]
    pub unidad: String,

    #[serde(default, deserialize_with = "nullable_text")]
    pub adicional1: Option<String>,

    #[serde(default, deserialize_with = "nullable_text")]
    pub adicional2: Option<String>,
}

impl LineItem {
    pub fn new(nombre: impl Into<String>) -> Self {
        Self {
            nombre: nombre.into(),
            cantidad: None,
            precio: None,
            unidad: default_unit(),
            adicional1: None,
            adicional2: None,
        }
    }
}

/// Wrapper for the header-only answer shape.
#[derive(Debug, Deserialize)]
pub struct HeaderEnvelope {
    pub documento: DocumentHeader,
}

/// Wrapper for the items-only answer shape.
#[derive(Debug, Deserialize)]
pub struct ItemsEnvelope {
    #[serde(deserialize_with = "items_any_form")]
    pub items: Vec<LineItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
    PEN,
    USD,
    EUR,
}

impl Currency {
    /// Recognise the spellings documents and models use.
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim().to_uppercase();
        match s.as_str() {
            "PEN" | "SOLES" | "SOL" | "S/" | "S/." | "NUEVOS SOLES" => Some(Currency::PEN),
            "USD" | "DOLARES" | "DÓLARES" | "DOLAR" | "US$" | "$" => Some(Currency::USD),
            "EUR" | "EUROS" | "EURO" | "€" => Some(Currency::EUR),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentTerms {
    Contado,
    Credito,
}

impl PaymentTerms {
    /// `"contado"`, `"crédito"`, `"credito 30 dias"`, `"60 días"` …
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim().to_lowercase();
        if s.is_empty() {
            return None;
        }
        if s.contains("contado") || s.contains("contra entrega") || s == "cash" {
            return Some(PaymentTerms::Contado);
        }
        if s.contains("credito")
            || s.contains("crédito")
            || s.contains("dias")
            || s.contains("días")
            || s == "credit"
        {
            return Some(PaymentTerms::Credito);
        }
        None
    }
}

// ── Statistics ───────────────────────────────────────────────────────────

/// How the document content reached the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtractionMethod {
    Vision,
    PdfText,
    Ocr,
    Document,
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExtractionMethod::Vision => "VISION",
            ExtractionMethod::PdfText => "PDF_TEXT",
            ExtractionMethod::Ocr => "OCR",
            ExtractionMethod::Document => "DOCUMENT",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionStats {
    /// Model calls made across all batches.
    pub attempts: u32,
    pub pages_sent: usize,
    pub total_pages: usize,
    pub method: ExtractionMethod,
    pub duration_ms: u64,
}

/// Result of a successful extraction.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionOutput {
    pub result: ExtractionResult,
    pub stats: ExtractionStats,
}

// ── Field deserializers ──────────────────────────────────────────────────

fn default_unit() -> String {
    "UND".to_string()
}

/// Strings, numbers (tax ids) or null. Blank and literal "null" become None.
fn nullable_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(None),
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() || t.eq_ignore_ascii_case("null") {
                Ok(None)
            } else {
                Ok(Some(t.to_string()))
            }
        }
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(de::Error::custom(format!(
            "expected a string or null, found {}",
            json_type(&other)
        ))),
    }
}

fn required_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    nullable_text(d)?.ok_or_else(|| de::Error::custom("`nombre` must be a non-empty string"))
}

fn unit<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(nullable_text(d)?.unwrap_or_else(default_unit))
}

/// JSON numbers, numeric strings or null. Anything else rejects the record.
fn nullable_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("number out of range: {n}"))),
        Value::String(s) => parse_numeric(&s).map_err(de::Error::custom),
        other => Err(de::Error::custom(format!(
            "expected a number or null, found {}",
            json_type(&other)
        ))),
    }
}

/// Parse `"1,250.50"`, `"S/ 120.00"`, `" 3 "`. Empty or "null" → None.
pub(crate) fn parse_numeric(raw: &str) -> Result<Option<f64>, String> {
    let t = raw.trim();
    if t.is_empty() || t.eq_ignore_ascii_case("null") {
        return Ok(None);
    }
    let cleaned: String = t
        .trim_start_matches("S/.")
        .trim_start_matches("S/")
        .trim_start_matches("US$")
        .trim_start_matches('$')
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(Some)
        .ok_or_else(|| format!("expected a number, found \"{t}\""))
}

fn nullable_currency<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Currency>, D::Error> {
    match nullable_text(d)? {
        None => Ok(None),
        Some(s) => Currency::parse(&s)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("`moneda` must be PEN, USD, EUR or null, found \"{s}\""))),
    }
}

fn nullable_terms<'de, D: Deserializer<'de>>(d: D) -> Result<Option<PaymentTerms>, D::Error> {
    match nullable_text(d)? {
        None => Ok(None),
        Some(s) => PaymentTerms::parse(&s).map(Some).ok_or_else(|| {
            de::Error::custom(format!("`forma_pago` must be Contado, Credito or null, found \"{s}\""))
        }),
    }
}

/// `true`/`false`, their string forms, or null (= false).
fn tax_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "si" | "sí" | "yes" | "incluye" => Ok(true),
            "false" | "no" | "" | "null" => Ok(false),
            other => Err(de::Error::custom(format!(
                "`igv` must be true or false, found \"{other}\""
            ))),
        },
        other => Err(de::Error::custom(format!(
            "`igv` must be true or false, found {}",
            json_type(&other)
        ))),
    }
}

/// Items as `[{..}, ..]` or as `{columnas: [..], datos: [[..], ..]}`.
fn items_any_form<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<LineItem>, D::Error> {
    match Value::deserialize(d)? {
        Value::Null => Ok(Vec::new()),
        Value::Array(rows) => rows
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                serde_json::from_value::<LineItem>(row)
                    .map_err(|e| de::Error::custom(format!("items[{i}]: {e}")))
            })
            .collect(),
        Value::Object(mut obj) => {
            let columns = match obj.remove("columnas") {
                Some(Value::Array(cols)) => cols
                    .into_iter()
                    .map(|c| match c {
                        Value::String(s) => Ok(s.trim().to_lowercase()),
                        other => Err(de::Error::custom(format!(
                            "items.columnas must hold strings, found {}",
                            json_type(&other)
                        ))),
                    })
                    .collect::<Result<Vec<_>, D::Error>>()?,
                _ => return Err(de::Error::custom("items.columnas must be an array")),
            };
            let rows = match obj.remove("datos") {
                Some(Value::Array(rows)) => rows,
                Some(Value::Null) | None => Vec::new(),
                Some(other) => {
                    return Err(de::Error::custom(format!(
                        "items.datos must be an array, found {}",
                        json_type(&other)
                    )))
                }
            };
            rows.into_iter()
                .enumerate()
                .map(|(i, row)| {
                    let cells = match row {
                        Value::Array(cells) => cells,
                        other => {
                            return Err(de::Error::custom(format!(
                                "items.datos[{i}] must be an array, found {}",
                                json_type(&other)
                            )))
                        }
                    };
                    let record: serde_json::Map<String, Value> =
                        columns.iter().cloned().zip(cells).collect();
                    serde_json::from_value::<LineItem>(Value::Object(record))
                        .map_err(|e| de::Error::custom(format!("items.datos[{i}]: {e}")))
                })
                .collect()
        }
        other => Err(de::Error::custom(format!(
            "`items` must be an array or a columnar object, found {}",
            json_type(&other)
        ))),
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header_json() -> Value {
        json!({
            "moneda": "SOLES",
            "ruc": 20190143806u64,
            "proveedor": "MECANICA INDUSTRIAL LIRA S.A.C.",
            "codigo_factura": "F001-123",
            "fecha_emision": "10/01/2026",
            "forma_pago": "Credito 30 dias",
            "igv": "True",
            "sub_total": "120.00",
            "total": 141.6
        })
    }

    #[test]
    fn header_accepts_loose_spellings() {
        let h: DocumentHeader = serde_json::from_value(header_json()).unwrap();
        assert_eq!(h.moneda, Some(Currency::PEN));
        assert_eq!(h.ruc.as_deref(), Some("20190143806"));
        assert_eq!(h.forma_pago, Some(PaymentTerms::Credito));
        assert!(h.igv);
        assert_eq!(h.sub_total, Some(120.0));
        assert_eq!(h.total, Some(141.6));
        assert!(h.vigencia.is_none());
        assert!(h.monto_igv.is_none());
    }

    #[test]
    fn tax_amount_is_read_when_present() {
        let mut v = header_json();
        v["monto_igv"] = json!("21.60");
        let h: DocumentHeader = serde_json::from_value(v).unwrap();
        assert_eq!(h.monto_igv, Some(21.6));
        let out = serde_json::to_value(&h).unwrap();
        assert_eq!(out["monto_igv"], 21.6);
    }

    #[test]
    fn header_requires_every_key() {
        let mut v = header_json();
        v.as_object_mut().unwrap().remove("moneda");
        let err = serde_json::from_value::<DocumentHeader>(v).unwrap_err();
        assert!(err.to_string().contains("moneda"), "got: {err}");
    }

    #[test]
    fn header_keys_may_be_null() {
        let v = json!({
            "moneda": null, "ruc": null, "proveedor": null, "codigo_factura": null,
            "fecha_emision": null, "forma_pago": null, "igv": null,
            "sub_total": null, "total": null
        });
        let h: DocumentHeader = serde_json::from_value(v).unwrap();
        assert_eq!(h, DocumentHeader::default());
    }

    #[test]
    fn header_aliases() {
        let mut v = header_json();
        let obj = v.as_object_mut().unwrap();
        let p = obj.remove("proveedor").unwrap();
        obj.insert("empresa".into(), p);
        let h: DocumentHeader = serde_json::from_value(v).unwrap();
        assert_eq!(h.proveedor.as_deref(), Some("MECANICA INDUSTRIAL LIRA S.A.C."));
    }

    #[test]
    fn unknown_currency_rejects_record() {
        let mut v = header_json();
        v["moneda"] = json!("GBP");
        assert!(serde_json::from_value::<DocumentHeader>(v).is_err());
    }

    #[test]
    fn non_numeric_amount_rejects_record() {
        let mut v = header_json();
        v["total"] = json!("ciento cuarenta");
        let err = serde_json::from_value::<DocumentHeader>(v).unwrap_err();
        assert!(err.to_string().contains("expected a number"), "got: {err}");

        let mut v = header_json();
        v["total"] = json!([1, 2]);
        assert!(serde_json::from_value::<DocumentHeader>(v).is_err());
    }

    #[test]
    fn numeric_strings() {
        assert_eq!(parse_numeric("1,250.50").unwrap(), Some(1250.5));
        assert_eq!(parse_numeric("S/ 120.00").unwrap(), Some(120.0));
        assert_eq!(parse_numeric(" ").unwrap(), None);
        assert!(parse_numeric("abc").is_err());
        assert!(parse_numeric("NaN").is_err());
    }

    #[test]
    fn items_as_objects() {
        let v = json!({"items": [
            {"nombre": "Tubo PVC", "cantidad": 10, "precio": "12.5"},
            {"nombre": "Codo", "cantidad": null, "precio": null, "unidad": "KG"}
        ]});
        let env: ItemsEnvelope = serde_json::from_value(v).unwrap();
        assert_eq!(env.items.len(), 2);
        assert_eq!(env.items[0].unidad, "UND");
        assert_eq!(env.items[0].precio, Some(12.5));
        assert_eq!(env.items[1].unidad, "KG");
    }

    #[test]
    fn items_in_columnar_form() {
        let v = json!({"items": {
            "columnas": ["nombre", "cantidad", "precio", "unidad", "adicional1", "adicional2"],
            "datos": [
                ["Rodamiento 6205", 4, 18.9, "UND", "SKF", null],
                ["Grasa", "2", "35.00", null, null, null]
            ]
        }});
        let env: ItemsEnvelope = serde_json::from_value(v).unwrap();
        assert_eq!(env.items.len(), 2);
        assert_eq!(env.items[0].adicional1.as_deref(), Some("SKF"));
        assert_eq!(env.items[1].cantidad, Some(2.0));
        assert_eq!(env.items[1].unidad, "UND");
    }

    #[test]
    fn blank_item_name_rejects_record() {
        let v = json!({"items": [{"nombre": "  ", "cantidad": 1}]});
        let err = serde_json::from_value::<ItemsEnvelope>(v).unwrap_err();
        assert!(err.to_string().contains("items[0]"), "got: {err}");
    }

    #[test]
    fn method_labels() {
        assert_eq!(ExtractionMethod::PdfText.to_string(), "PDF_TEXT");
        assert_eq!(
            serde_json::to_value(ExtractionMethod::Ocr).unwrap(),
            json!("OCR")
        );
    }
}
