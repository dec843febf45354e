//! Extraction output types.

use crate::error::PageError;
use crate::record::InvoiceRecord;
use crate::validate::ValidationWarning;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// File name of the downloadable artifact.
pub const DOWNLOAD_FILE_NAME: &str = "invoice.json";

/// Result of one extraction request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// The decoded invoice record, default-filled unless disabled.
    pub record: Value,
    /// Schema deviations found before default filling.
    pub warnings: Vec<ValidationWarning>,
    /// One entry per page sent to the model.
    pub pages: Vec<PageExtraction>,
    pub stats: ExtractionStats,
}

impl ExtractionOutput {
    /// The record as indented JSON, i.e. the content of `invoice.json`.
    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.record)
    }

    /// Typed view of the record.
    pub fn record(&self) -> Result<InvoiceRecord, serde_json::Error> {
        InvoiceRecord::from_value(&self.record)
    }

    /// `true` when the record conforms to the schema without corrections.
    pub fn is_conformant(&self) -> bool {
        self.warnings.is_empty()
    }

    /// Pages whose extraction failed (per-page mode only).
    pub fn page_errors(&self) -> impl Iterator<Item = &PageError> {
        self.pages.iter().filter_map(|p| p.error.as_ref())
    }
}

/// What happened to one page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageExtraction {
    /// 1-indexed page number.
    pub page_num: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Wall time spent in inference for this page, including retries.
    pub duration_ms: u64,
    /// Retries spent on transient failures.
    pub retries: u32,
    /// Whether the first answer failed to decode and the model was asked again.
    pub reprompted: bool,
    /// Number of validation warnings for this page's record.
    pub warnings: usize,
    /// Set when the page failed; its record is not part of the output.
    pub error: Option<PageError>,
}

/// Aggregate statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Backend that served the request, e.g. `gemini`.
    pub backend: String,
    pub schema_version: String,
    /// Pages rendered and sent to the model.
    pub pages_sent: usize,
    pub pages_succeeded: usize,
    pub pages_failed: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_retries: u32,
    pub reprompted: bool,
    pub total_duration_ms: u64,
    pub render_duration_ms: u64,
    pub inference_duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn output(record: Value) -> ExtractionOutput {
        ExtractionOutput {
            record,
            warnings: vec![],
            pages: vec![PageExtraction {
                page_num: 1,
                ..Default::default()
            }],
            stats: ExtractionStats::default(),
        }
    }

    #[test]
    fn pretty_json_is_the_record_only() {
        let out = output(json!({"invoice_details": {"invoice_number": "INV-001"}}));
        let text = out.to_pretty_json().unwrap();
        assert!(text.starts_with("{\n  \"invoice_details\""));
        assert!(!text.contains("stats"));
        assert!(out.is_conformant());
        assert_eq!(out.page_errors().count(), 0);
    }

    #[test]
    fn typed_view() {
        let out = output(json!({
            "invoice_details": {"invoice_number": "INV-001", "invoice_value": 1180.0},
            "item_details": [{"item_quantity": 2}]
        }));
        let rec = out.record().unwrap();
        assert_eq!(rec.invoice_details.invoice_number.as_deref(), Some("INV-001"));
        assert_eq!(rec.item_details[0].item_quantity, Some(2.0));
    }
}
