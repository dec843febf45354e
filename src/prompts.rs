//! Prompts sent to the inference endpoint.
//!
//! Every request carries three parts in this order: the role instruction
//! below, the schema text from [`crate::schema::schema_prompt`], and the page
//! image. The correction prompt is only used for the single re-prompt after an
//! undecodable answer.
//!
//! Callers can override the instruction via
//! [`crate::config::ExtractionConfig::instruction`]; the schema text is never
//! overridable.

/// Default role-establishing instruction.
pub const DEFAULT_INSTRUCTION: &str = "You are an expert invoice OCR and accounting assistant.";

/// Build the correction message for a re-prompt.
///
/// `error` is the decode error of the previous answer; quoting it gives the
/// model something concrete to fix (usually a truncated object or a prose
/// preamble).
pub fn correction_prompt(error: &str) -> String {
    format!(
        "Your previous answer could not be parsed as JSON ({error}). \
Reply again with ONLY the JSON object for this invoice, following the schema exactly. \
No explanations, no Markdown fences."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correction_quotes_error() {
        let p = correction_prompt("EOF while parsing an object at line 3 column 1");
        assert!(p.contains("line 3 column 1"));
        assert!(p.contains("ONLY the JSON"));
    }
}
