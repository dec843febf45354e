//! Per-page aggregation: merge the records extracted from each page.
//!
//! Multi-page invoices repeat or omit the header on later pages and spread
//! line items across all of them. The merge therefore takes each section
//! field from the first page that has a non-null value for it and
//! concatenates `item_details` in page order.

use crate::schema::{ITEMS_KEY, SECTIONS};
use serde_json::{Map, Value};

/// Merge page records, in page order, into one record.
///
/// An empty input yields an empty object.
pub fn merge_records(records: &[Value]) -> Value {
    let mut merged = Map::new();

    for record in records {
        let Some(obj) = record.as_object() else {
            continue;
        };
        for (key, value) in obj {
            if key == ITEMS_KEY {
                append_items(&mut merged, value);
            } else if SECTIONS.contains(&key.as_str()) {
                merge_section(&mut merged, key, value);
            } else {
                fill_if_null(&mut merged, key, value);
            }
        }
    }

    Value::Object(merged)
}

fn append_items(merged: &mut Map<String, Value>, value: &Value) {
    let target = merged
        .entry(ITEMS_KEY)
        .or_insert_with(|| Value::Array(Vec::new()));
    if let (Value::Array(dst), Value::Array(src)) = (target, value) {
        dst.extend(src.iter().cloned());
    }
}

fn merge_section(merged: &mut Map<String, Value>, key: &str, value: &Value) {
    let Some(src) = value.as_object() else {
        fill_if_null(merged, key, value);
        return;
    };
    let target = merged
        .entry(key)
        .or_insert_with(|| Value::Object(Map::new()));
    match target {
        Value::Object(dst) => {
            for (field, v) in src {
                fill_if_null(dst, field, v);
            }
        }
        // An earlier page had a null section: the first real one replaces it.
        other if other.is_null() => *other = value.clone(),
        _ => {}
    }
}

fn fill_if_null(map: &mut Map<String, Value>, key: &str, value: &Value) {
    match map.get_mut(key) {
        Some(existing) if existing.is_null() => *existing = value.clone(),
        Some(_) => {}
        None => {
            map.insert(key.to_string(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_non_null_wins_and_items_concatenate() {
        let page1 = json!({
            "seller_details": {"seller_name": "Acme", "seller_gst": null},
            "invoice_details": {"invoice_number": "INV-001"},
            "item_details": [{"item_name": "Widget"}]
        });
        let page2 = json!({
            "seller_details": {"seller_name": "Acme Ltd", "seller_gst": "29ABCDE1234F1Z5"},
            "invoice_details": {"invoice_number": null, "invoice_value": 1180.0},
            "item_details": [{"item_name": "Gadget"}, {"item_name": "Bolt"}]
        });
        let merged = merge_records(&[page1, page2]);

        assert_eq!(merged["seller_details"]["seller_name"], "Acme");
        assert_eq!(merged["seller_details"]["seller_gst"], "29ABCDE1234F1Z5");
        assert_eq!(merged["invoice_details"]["invoice_number"], "INV-001");
        assert_eq!(merged["invoice_details"]["invoice_value"], 1180.0);
        let names: Vec<_> = merged["item_details"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["item_name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["Widget", "Gadget", "Bolt"]);
    }

    #[test]
    fn null_section_is_replaced_by_later_object() {
        let merged = merge_records(&[
            json!({"buyer_details": null}),
            json!({"buyer_details": {"buyer_name": "Globex"}}),
        ]);
        assert_eq!(merged["buyer_details"]["buyer_name"], "Globex");
    }

    #[test]
    fn single_record_is_unchanged() {
        let only = json!({"invoice_details": {"invoice_number": "A-1"}, "item_details": []});
        assert_eq!(merge_records(std::slice::from_ref(&only)), only);
    }

    #[test]
    fn empty_input_is_empty_object() {
        assert_eq!(merge_records(&[]), json!({}));
    }
}
