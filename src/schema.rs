//! The invoice schema: the JSON shape every extraction must conform to.
//!
//! The template below is sent verbatim with every inference request, so the
//! model sees the exact field names, nesting and defaults. The same template
//! drives post-decode validation ([`crate::validate`]) and default filling, so
//! the prompt and the validator can never disagree about which fields exist.
//!
//! Changing a field name or default is a contract change: bump
//! [`SCHEMA_VERSION`].

use once_cell::sync::Lazy;
use serde_json::Value;

/// Version of the schema contract below.
pub const SCHEMA_VERSION: &str = "1.0";

/// Formatting rules prepended to the template.
pub const SCHEMA_RULES: &str = "Return ONLY valid JSON using this schema.
If a field is missing, use null.
Dates must be YYYY-MM-DD.
Numbers must be numbers (not strings).";

/// Default currency applied when the invoice does not state one.
pub const DEFAULT_CURRENCY: &str = "INR";

/// JSON template of the invoice record.
pub const INVOICE_TEMPLATE: &str = r#"{
  "seller_details": {
    "seller_name": null,
    "seller_address": null,
    "seller_city": null,
    "seller_state": null,
    "seller_pan": null,
    "seller_gst": null
  },
  "buyer_details": {
    "buyer_name": null,
    "buyer_address": null,
    "buyer_city": null,
    "buyer_state": null,
    "buyer_pan": null,
    "buyer_gst": null
  },
  "invoice_details": {
    "invoice_number": null,
    "invoice_value": null,
    "invoice_date": null,
    "invoice_currency": "INR"
  },
  "item_details": [
    {
      "item_name": null,
      "item_description": null,
      "item_hsn_sac_code": null,
      "item_quantity": null,
      "item_rate": null,
      "item_value": null,
      "cgst_rate": null,
      "cgst_amount": null,
      "sgst_rate": null,
      "sgst_amount": null,
      "igst_rate": null,
      "igst_amount": null
    }
  ]
}"#;

/// Top-level object sections, in template order.
pub const SECTIONS: [&str; 3] = ["seller_details", "buyer_details", "invoice_details"];

/// Key of the repeatable line-item group.
pub const ITEMS_KEY: &str = "item_details";

static TEMPLATE: Lazy<Value> =
    Lazy::new(|| serde_json::from_str(INVOICE_TEMPLATE).expect("invoice template is valid JSON"));

static SCHEMA_PROMPT: Lazy<String> = Lazy::new(|| format!("{SCHEMA_RULES}\n\n{INVOICE_TEMPLATE}\n"));

/// Value type expected for a leaf field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Free text: names, addresses, identifiers, codes.
    Text,
    /// ISO calendar date, `YYYY-MM-DD`.
    Date,
    /// Quantity, rate or monetary amount.
    Number,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "string",
            FieldKind::Date => "date (YYYY-MM-DD)",
            FieldKind::Number => "number",
        }
    }
}

/// Classify a leaf field by name.
///
/// HSN/SAC codes and PAN/GST numbers are identifiers and stay text even when
/// they look numeric.
pub fn field_kind(name: &str) -> FieldKind {
    match name {
        "invoice_date" => FieldKind::Date,
        "invoice_value" | "item_quantity" | "item_rate" | "item_value" => FieldKind::Number,
        n if n.ends_with("_rate") || n.ends_with("_amount") => FieldKind::Number,
        _ => FieldKind::Text,
    }
}

/// The parsed template.
pub fn template() -> &'static Value {
    &TEMPLATE
}

/// Schema text embedded in every inference request: rules followed by the
/// template.
pub fn schema_prompt() -> &'static str {
    &SCHEMA_PROMPT
}

/// Template object for one section, e.g. `seller_details`.
pub fn section_template(section: &str) -> Option<&'static serde_json::Map<String, Value>> {
    TEMPLATE.get(section).and_then(Value::as_object)
}

/// Template object for a single line item.
pub fn item_template() -> &'static serde_json::Map<String, Value> {
    static ITEM: Lazy<serde_json::Map<String, Value>> = Lazy::new(|| {
        TEMPLATE
            .get(ITEMS_KEY)
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    });
    &ITEM
}
