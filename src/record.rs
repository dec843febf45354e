//! Strongly typed view of an invoice record.
//!
//! The pipeline hands out the decoded `serde_json::Value` unchanged so that
//! nothing the model returned is lost. Library callers who prefer typed
//! access can convert it with [`InvoiceRecord::from_value`]; the conversion
//! fails if a field has the wrong JSON type (run [`crate::validate::validate`]
//! first to learn which one).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    #[serde(default)]
    pub seller_details: SellerDetails,
    #[serde(default)]
    pub buyer_details: BuyerDetails,
    #[serde(default)]
    pub invoice_details: InvoiceDetails,
    #[serde(default)]
    pub item_details: Vec<ItemDetails>,
}

impl InvoiceRecord {
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SellerDetails {
    #[serde(default)]
    pub seller_name: Option<String>,
    #[serde(default)]
    pub seller_address: Option<String>,
    #[serde(default)]
    pub seller_city: Option<String>,
    #[serde(default)]
    pub seller_state: Option<String>,
    #[serde(default)]
    pub seller_pan: Option<String>,
    #[serde(default)]
    pub seller_gst: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuyerDetails {
    #[serde(default)]
    pub buyer_name: Option<String>,
    #[serde(default)]
    pub buyer_address: Option<String>,
    #[serde(default)]
    pub buyer_city: Option<String>,
    #[serde(default)]
    pub buyer_state: Option<String>,
    #[serde(default)]
    pub buyer_pan: Option<String>,
    #[serde(default)]
    pub buyer_gst: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvoiceDetails {
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub invoice_value: Option<f64>,
    /// ISO `YYYY-MM-DD`; kept as text so malformed dates still deserialise.
    #[serde(default)]
    pub invoice_date: Option<String>,
    #[serde(default)]
    pub invoice_currency: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemDetails {
    #[serde(default)]
    pub item_name: Option<String>,
    #[serde(default)]
    pub item_description: Option<String>,
    #[serde(default)]
    pub item_hsn_sac_code: Option<String>,
    #[serde(default)]
    pub item_quantity: Option<f64>,
    #[serde(default)]
    pub item_rate: Option<f64>,
    #[serde(default)]
    pub item_value: Option<f64>,
    #[serde(default)]
    pub cgst_rate: Option<f64>,
    #[serde(default)]
    pub cgst_amount: Option<f64>,
    #[serde(default)]
    pub sgst_rate: Option<f64>,
    #[serde(default)]
    pub sgst_amount: Option<f64>,
    #[serde(default)]
    pub igst_rate: Option<f64>,
    #[serde(default)]
    pub igst_amount: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typed_view_of_scenario_a() {
        let v = json!({
            "seller_details": { "seller_name": "Acme Pvt Ltd", "seller_gst": null },
            "buyer_details": { "buyer_name": "Beta Corp" },
            "invoice_details": {
                "invoice_number": "INV-001",
                "invoice_date": "2024-03-15",
                "invoice_currency": "INR"
            },
            "item_details": [
                { "item_quantity": 2, "item_rate": 500, "item_value": 1000 }
            ]
        });
        let record = InvoiceRecord::from_value(&v).unwrap();
        assert_eq!(record.seller_details.seller_name.as_deref(), Some("Acme Pvt Ltd"));
        assert_eq!(record.seller_details.seller_gst, None);
        assert_eq!(record.buyer_details.buyer_name.as_deref(), Some("Beta Corp"));
        assert_eq!(record.invoice_details.invoice_number.as_deref(), Some("INV-001"));
        assert_eq!(record.item_details[0].item_quantity, Some(2.0));
        assert_eq!(record.item_details[0].item_value, Some(1000.0));
    }

    #[test]
    fn record_serialises_with_schema_field_names() {
        let mut record = InvoiceRecord::default();
        record.buyer_details.buyer_gst = Some("27ABCDE1234F1Z5".into());
        let v = serde_json::to_value(&record).unwrap();
        assert_eq!(v["buyer_details"]["buyer_gst"], json!("27ABCDE1234F1Z5"));
        assert!(v["seller_details"]["seller_gst"].is_null());
    }

    #[test]
    fn string_quantity_is_rejected() {
        let v = json!({ "item_details": [ { "item_quantity": "2" } ] });
        assert!(InvoiceRecord::from_value(&v).is_err());
    }

    #[test]
    fn numeric_gst_is_rejected() {
        let v = json!({ "seller_details": { "seller_gst": 12345 } });
        assert!(InvoiceRecord::from_value(&v).is_err());
    }
}
