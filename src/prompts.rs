//! Prompt templates for quotation / invoice extraction.
//!
//! Every instruction sent to a model lives here, so prompt changes never
//! touch retry or parsing logic and unit tests can inspect the exact text.
//!
//! The templates contain two placeholders filled by [`schema_prompt`]:
//! `{own_tax_id_rule}` and `{name_limit}`.

use crate::config::{ExtractionConfig, ResponseSchema};

/// System message for every extraction call.
pub const SYSTEM_PROMPT: &str = "Eres un extractor de datos de cotizaciones y facturas. \
Respondes SOLO con un objeto JSON válido, sin markdown, sin comentarios y sin texto adicional.";

/// Header fields plus items.
pub const FULL_SCHEMA_PROMPT: &str = r#"Devuelve SOLO JSON con esta estructura exacta:
{
  "documento": {
    "moneda": "PEN" | "USD" | "EUR" | null,
    "ruc": string o null,
    "proveedor": string o null,
    "codigo_factura": string o null,
    "fecha_emision": string o null,
    "forma_pago": "Contado" | "Credito" | null,
    "igv": true | false,
    "sub_total": number o null,
    "total": number o null,
    "monto_igv": number o null,
    "vigencia": string o null
  },
  "items": {
    "columnas": ["nombre", "cantidad", "precio", "unidad", "adicional1", "adicional2"],
    "datos": [
      ["valor1", numero1, numero1, "unidad1", "info extra o null", "info extra 2 o null"]
    ]
  }
}

Reglas para DOCUMENTO:
{own_tax_id_rule}
- proveedor: nombre completo de la empresa emisora/proveedora.
- codigo_factura: número de factura / boleta / cotización tal como aparece (ej "F001-123456", "FAC-000123"). Si no existe, null.
- fecha_emision: fecha de emisión en formato DD/MM/YYYY. Si no se puede determinar, null.
- moneda: "S/" o soles => "PEN". "$" o dólares => "USD". Euros => "EUR". Si no, null.
- forma_pago: Contado o Credito (30 días, 60 días, etc. => Credito). Si no, null.
- igv: true si los montos incluyen IGV, false si no.
- sub_total: monto sin IGV. total: monto final. Si igv es false, total = sub_total.
- monto_igv: importe del IGV tal como aparece en el documento. Si igv es false o no aparece, null.
- vigencia: validez de la oferta ("oferta válida 15 días"). Si no, null.

Reglas para ITEMS:
- nombre: NO inventes. Copia EXACTO del documento. Si no hay nombre, no incluyas el item.
- cantidad: NO inventes. Si no aparece, null. IGNORA la columna "ITEM" o "Nro" (solo numeración).
- precio: PRECIO UNITARIO (P.Unit / Valor Unitario), NO el total de la fila.
- unidad: UND, KG, M, M2, GLB, HH, DIA, etc. Si no se ve, "UND".
- adicional1/adicional2: si el nombre supera {name_limit} caracteres o hay información extra (códigos, nro de máquina), ponla aquí. Usa adicional1 primero (máx {name_limit}), luego adicional2 (máx {name_limit}). Si no, null.

Reglas generales:
- Números con punto decimal, sin separador de miles.
- MÁXIMO {name_limit} caracteres en nombre.
- NO agrupes items similares: cada fila del documento => una fila en datos."#;

/// Header fields only (chat-provider routes).
pub const HEADER_SCHEMA_PROMPT: &str = r#"Extrae los datos de cabecera del PDF y devuelve SOLO JSON con esta estructura exacta:
{
  "documento": {
    "moneda": "PEN" | "USD" | "EUR" | null,
    "ruc": string o null,
    "proveedor": string o null,
    "codigo_factura": string o null,
    "fecha_emision": string o null,
    "forma_pago": "Contado" | "Credito" | null,
    "igv": true | false,
    "sub_total": number o null,
    "total": number o null
  }
}

REGLAS:
{own_tax_id_rule}
- proveedor: nombre completo de la empresa proveedora.
- codigo_factura: formato exacto.
- fecha_emision: formato DD/MM/YYYY.
- moneda: soles => "PEN", dólares => "USD".
- forma_pago: Contado o Credito.
- igv: true si incluye IGV, false si no.
- sub_total: número con punto decimal (monto sin IGV).
- total: número con punto decimal (si igv es false entonces total = sub_total).
- Si un dato no existe: null."#;

/// Items only (second and later image batches).
pub const ITEMS_SCHEMA_PROMPT: &str = r#"Devuelve SOLO JSON con esta estructura exacta (SOLO items, sin documento):
{
  "items": {
    "columnas": ["nombre", "cantidad", "precio", "unidad", "adicional1", "adicional2"],
    "datos": [
      ["valor1", numero1, numero1, "unidad1", "info extra o null", "info extra 2 o null"]
    ]
  }
}

Reglas para ITEMS:
- nombre: NO inventes. Copia EXACTO del documento. Si no hay nombre, no incluyas el item.
- cantidad: NO inventes. Si no aparece, null. IGNORA la columna "ITEM" o "Nro".
- precio: PRECIO UNITARIO, NO el total de la fila.
- unidad: UND, KG, M, M2, GLB, HH, DIA, etc. Si no se especifica, "UND".
- adicional1/adicional2: información extra, máx {name_limit} caracteres cada uno. Usa adicional1 primero.
- NO agrupes items similares.
- Números con punto decimal. Sin markdown. Solo JSON válido."#;

/// Instruction template for the selected schema with placeholders filled.
pub fn schema_prompt(schema: ResponseSchema, config: &ExtractionConfig) -> String {
    let template = match schema {
        ResponseSchema::Full => FULL_SCHEMA_PROMPT,
        ResponseSchema::HeaderOnly => HEADER_SCHEMA_PROMPT,
        ResponseSchema::ItemsOnly => ITEMS_SCHEMA_PROMPT,
    };
    template
        .replace("{own_tax_id_rule}", &own_tax_id_rule(config.own_tax_id.as_deref()))
        .replace("{name_limit}", &config.name_limit.to_string())
}

fn own_tax_id_rule(own: Option<&str>) -> String {
    match own {
        Some(id) => format!(
            "- ruc: solo dígitos del RUC del EMISOR/PROVEEDOR. El RUC {id} es del cliente que recibe el documento (nosotros): NUNCA lo pongas como respuesta; si solo encuentras ese RUC, usa null."
        ),
        None => "- ruc: solo dígitos del RUC del EMISOR/PROVEEDOR, no el del cliente. Si no existe, null."
            .to_string(),
    }
}

/// Wrap extracted document text for the text pipeline.
pub fn text_block(text: &str) -> String {
    format!("Texto:\n<<<\n{text}\n>>>")
}

/// Follow-up instruction after an answer failed to parse or validate.
///
/// The previous output is quoted verbatim so the model can repair it instead
/// of starting over.
pub fn corrective_prompt(error: &str, previous_output: &str) -> String {
    format!(
        "Tu respuesta anterior no es válida: {error}\n\n\
Respuesta anterior:\n<<<\n{previous_output}\n>>>\n\n\
Corrige el error y devuelve SOLO el objeto JSON completo con la estructura pedida, sin markdown ni texto adicional."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_filled() {
        let config = ExtractionConfig::builder()
            .own_tax_id("20100064571")
            .name_limit(60)
            .build()
            .unwrap();
        for schema in [
            ResponseSchema::Full,
            ResponseSchema::HeaderOnly,
            ResponseSchema::ItemsOnly,
        ] {
            let p = schema_prompt(schema, &config);
            assert!(!p.contains("{own_tax_id_rule}"), "{schema:?}");
            assert!(!p.contains("{name_limit}"), "{schema:?}");
        }
        let full = schema_prompt(ResponseSchema::Full, &config);
        assert!(full.contains("20100064571"));
        assert!(full.contains("MÁXIMO 60 caracteres"));
    }

    #[test]
    fn full_prompt_asks_for_every_header_field() {
        let p = schema_prompt(ResponseSchema::Full, &ExtractionConfig::default());
        for field in [
            "moneda", "ruc", "proveedor", "codigo_factura", "fecha_emision",
            "forma_pago", "igv", "sub_total", "total", "monto_igv", "vigencia",
        ] {
            assert!(p.contains(&format!("\"{field}\"")), "{field}");
        }
    }

    #[test]
    fn items_prompt_has_no_header() {
        let p = schema_prompt(ResponseSchema::ItemsOnly, &ExtractionConfig::default());
        assert!(!p.contains("\"documento\""));
        assert!(p.contains("\"items\""));
    }

    #[test]
    fn corrective_prompt_quotes_previous_output() {
        let p = corrective_prompt("missing field `moneda`", "{\"documento\": {}}");
        assert!(p.contains("missing field `moneda`"));
        assert!(p.contains("{\"documento\": {}}"));
    }

    #[test]
    fn text_block_delimits() {
        assert_eq!(text_block("abc"), "Texto:\n<<<\nabc\n>>>");
    }
}
