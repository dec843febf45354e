//! Post-decode schema validation and default filling.
//!
//! The model is instructed to emit every field, use null for unknowns, format
//! dates as `YYYY-MM-DD` and keep numbers numeric. Models do not always
//! comply, so after decoding we walk [`crate::schema::template`] and report
//! each deviation as a [`ValidationWarning`]. Warnings are non-fatal unless
//! the caller enables strict mode.
//!
//! [`fill_defaults`] then inserts any missing template key with its template
//! default so consumers can rely on every field being present.

use crate::schema::{self, FieldKind};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A non-fatal schema conformance finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationWarning {
    /// A template key is absent from the decoded record.
    MissingField { path: String },
    /// A value has the wrong JSON type (e.g. `"2"` where a number belongs).
    TypeMismatch {
        path: String,
        expected: String,
        found: String,
    },
    /// A date field is a string but not an ISO calendar date.
    InvalidDate { path: String, value: String },
    /// A key the template does not define.
    UnexpectedField { path: String },
}

impl ValidationWarning {
    /// JSON path the warning refers to, e.g. `item_details[0].item_rate`.
    pub fn path(&self) -> &str {
        match self {
            ValidationWarning::MissingField { path }
            | ValidationWarning::TypeMismatch { path, .. }
            | ValidationWarning::InvalidDate { path, .. }
            | ValidationWarning::UnexpectedField { path } => path,
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::MissingField { path } => write!(f, "{path}: missing field"),
            ValidationWarning::TypeMismatch {
                path,
                expected,
                found,
            } => write!(f, "{path}: expected {expected}, found {found}"),
            ValidationWarning::InvalidDate { path, value } => {
                write!(f, "{path}: {value:?} is not a YYYY-MM-DD date")
            }
            ValidationWarning::UnexpectedField { path } => write!(f, "{path}: not in schema"),
        }
    }
}

/// Check a decoded record against the invoice schema.
pub fn validate(record: &Value) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    let Some(root) = record.as_object() else {
        warnings.push(mismatch("$", "object", record));
        return warnings;
    };

    for section in schema::SECTIONS {
        let template = schema::section_template(section).cloned().unwrap_or_default();
        match root.get(section) {
            None => warnings.push(ValidationWarning::MissingField {
                path: section.to_string(),
            }),
            Some(Value::Object(fields)) => check_object(section, &template, fields, &mut warnings),
            Some(other) => warnings.push(mismatch(section, "object", other)),
        }
    }

    match root.get(schema::ITEMS_KEY) {
        None => warnings.push(ValidationWarning::MissingField {
            path: schema::ITEMS_KEY.to_string(),
        }),
        Some(Value::Array(items)) => {
            let template = schema::item_template();
            for (i, item) in items.iter().enumerate() {
                let path = format!("{}[{i}]", schema::ITEMS_KEY);
                match item {
                    Value::Object(fields) => check_object(&path, template, fields, &mut warnings),
                    other => warnings.push(mismatch(&path, "object", other)),
                }
            }
        }
        Some(other) => warnings.push(mismatch(schema::ITEMS_KEY, "array", other)),
    }

    for key in root.keys() {
        if !schema::SECTIONS.contains(&key.as_str()) && key != schema::ITEMS_KEY {
            warnings.push(ValidationWarning::UnexpectedField { path: key.clone() });
        }
    }

    warnings
}

/// Insert every missing template key with its template default.
///
/// A `null` section becomes the section template and a `null` item list
/// becomes `[]`. Other wrong-typed values are left untouched; they are
/// already reported by [`validate`].
pub fn fill_defaults(record: &mut Value) {
    let Some(root) = record.as_object_mut() else {
        return;
    };

    for section in schema::SECTIONS {
        let Some(template) = schema::section_template(section) else {
            continue;
        };
        let entry = root
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if entry.is_null() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(fields) = entry {
            fill_object(fields, template);
        }
    }

    let items = root
        .entry(schema::ITEMS_KEY.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if items.is_null() {
        *items = Value::Array(Vec::new());
    }
    if let Value::Array(items) = items {
        for item in items.iter_mut() {
            if let Value::Object(fields) = item {
                fill_object(fields, schema::item_template());
            }
        }
    }
}

fn fill_object(fields: &mut Map<String, Value>, template: &Map<String, Value>) {
    for (key, default) in template {
        if !fields.contains_key(key) {
            fields.insert(key.clone(), default.clone());
        }
    }
}

fn check_object(
    prefix: &str,
    template: &Map<String, Value>,
    fields: &Map<String, Value>,
    warnings: &mut Vec<ValidationWarning>,
) {
    for key in template.keys() {
        let path = format!("{prefix}.{key}");
        match fields.get(key) {
            None => warnings.push(ValidationWarning::MissingField { path }),
            Some(value) => {
                if let Some(w) = check_leaf(&path, schema::field_kind(key), value) {
                    warnings.push(w);
                }
            }
        }
    }
    for key in fields.keys() {
        if !template.contains_key(key) {
            warnings.push(ValidationWarning::UnexpectedField {
                path: format!("{prefix}.{key}"),
            });
        }
    }
}

fn check_leaf(path: &str, kind: FieldKind, value: &Value) -> Option<ValidationWarning> {
    match (kind, value) {
        (_, Value::Null) => None,
        (FieldKind::Number, Value::Number(_)) => None,
        (FieldKind::Text, Value::String(_)) => None,
        (FieldKind::Date, Value::String(s)) => {
            if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() && s.len() == 10 {
                None
            } else {
                Some(ValidationWarning::InvalidDate {
                    path: path.to_string(),
                    value: s.clone(),
                })
            }
        }
        (kind, other) => Some(mismatch(path, kind.as_str(), other)),
    }
}

fn mismatch(path: &str, expected: &str, found: &Value) -> ValidationWarning {
    ValidationWarning::TypeMismatch {
        path: path.to_string(),
        expected: expected.to_string(),
        found: json_type(found).to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
