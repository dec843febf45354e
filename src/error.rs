//! Error types for the edgequake-invoice library.
//!
//! Three failure families map one-to-one onto the pipeline stages that can
//! fail:
//!
//! * [`DecodeError`]: the Renderer could not turn the bytes into pages
//!   (not a PDF, corrupt, encrypted, zero pages).
//! * [`InferenceError`]: the Extractor could not get text out of the
//!   inference endpoint (unreachable, auth, rate limit, empty answer).
//! * [`MalformedResponseError`]: the Parser could not decode the answer
//!   as JSON.
//!
//! [`ExtractError`] wraps all three, plus input/output and configuration
//! failures, and is what the top-level `extract*` functions return. Use
//! [`ExtractError::kind`] to branch on the family without matching nested
//! enums.
//!
//! [`PageError`] is the non-fatal counterpart used in per-page mode, where
//! one bad page must not sink the whole document.

use crate::validate::ValidationWarning;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of an [`ExtractError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// PDF bytes unreadable or empty.
    Decode,
    /// Inference endpoint failed or returned nothing.
    Inference,
    /// Inference answer was not JSON.
    MalformedResponse,
    /// Strict mode rejected a record with schema warnings.
    Validation,
    /// Input could not be read or downloaded.
    Input,
    /// Output artifact could not be written.
    Output,
    /// Bad configuration or missing runtime dependency.
    Config,
    /// Unexpected internal failure.
    Internal,
}

impl ErrorKind {
    /// Stable snake_case name, as printed by the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Decode => "decode",
            ErrorKind::Inference => "inference",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::Validation => "validation",
            ErrorKind::Input => "input",
            ErrorKind::Output => "output",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }
}

/// All fatal errors returned by the edgequake-invoice library.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    MalformedResponse(#[from] MalformedResponseError),

    /// Strict mode: the record decoded but does not conform to the schema.
    #[error("Record does not conform to the invoice schema ({} warnings)", .warnings.len())]
    Validation { warnings: Vec<ValidationWarning> },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write the JSON artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
The invoice2json CLI downloads PDFium on first run; library callers must\n\
provide it. You can:\n\
  • Call pdfium_auto::ensure_pdfium_library(None) before extracting.\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy.\n"
    )]
    PdfiumUnavailable(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// Which failure family this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::Decode(_) => ErrorKind::Decode,
            ExtractError::Inference(_) => ErrorKind::Inference,
            ExtractError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            ExtractError::Validation { .. } => ErrorKind::Validation,
            ExtractError::FileNotFound { .. }
            | ExtractError::PermissionDenied { .. }
            | ExtractError::DownloadFailed { .. }
            | ExtractError::DownloadTimeout { .. } => ErrorKind::Input,
            ExtractError::OutputWriteFailed { .. } => ErrorKind::Output,
            ExtractError::InvalidConfig(_) | ExtractError::PdfiumUnavailable(_) => {
                ErrorKind::Config
            }
            ExtractError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// The PDF could not be turned into page images.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The bytes do not start with the `%PDF` magic.
    #[error("Input is not a PDF document (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF is corrupt: {detail}\nTry repairing with: qpdf input.pdf output.pdf")]
    Corrupt { detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired,

    /// A password was provided but it is wrong.
    #[error("Wrong password for encrypted PDF")]
    WrongPassword,

    /// The document parsed but has no pages.
    #[error("PDF contains zero pages")]
    EmptyDocument,

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// The rendered bitmap could not be encoded as PNG.
    #[error("Image encoding failed for page {page}: {detail}")]
    ImageEncoding { page: usize, detail: String },
}

/// The inference endpoint did not produce usable text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InferenceError {
    /// No backend could be constructed (missing API key, unknown provider).
    #[error("Inference backend '{backend}' is not configured.\n{hint}")]
    NotConfigured { backend: String, hint: String },

    /// Connection-level failure (DNS, TLS, reset).
    #[error("Inference endpoint '{backend}' unreachable: {detail}")]
    Unreachable { backend: String, detail: String },

    /// The call did not finish within the configured timeout.
    #[error("Inference call to '{backend}' timed out after {secs}s")]
    Timeout { backend: String, secs: u64 },

    /// HTTP 429: back off before retrying.
    #[error("Rate limit exceeded for '{backend}'")]
    RateLimited {
        backend: String,
        retry_after_secs: Option<u64>,
    },

    /// HTTP 401/403: retrying cannot help.
    #[error("Authentication error from '{backend}': {detail}")]
    Auth { backend: String, detail: String },

    /// The endpoint refused the request (4xx other than auth/rate limit, or a
    /// safety block).
    #[error("Request rejected by '{backend}' (status {status}): {detail}")]
    Rejected {
        backend: String,
        status: u16,
        detail: String,
    },

    /// 5xx from the endpoint.
    #[error("Server error from '{backend}' (status {status}): {detail}")]
    Server {
        backend: String,
        status: u16,
        detail: String,
    },

    /// The endpoint answered but with no text.
    #[error("Inference endpoint '{backend}' returned an empty response")]
    EmptyResponse { backend: String },

    /// Every attempt failed with a transient error.
    #[error("Inference failed after {attempts} attempts; last error: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<InferenceError>,
    },
}

impl InferenceError {
    /// Whether another attempt might succeed.
    ///
    /// Network blips, timeouts, rate limits and 5xx are transient. Auth
    /// failures, rejected requests and empty answers are permanent for the
    /// same input.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InferenceError::Unreachable { .. }
                | InferenceError::Timeout { .. }
                | InferenceError::RateLimited { .. }
                | InferenceError::Server { .. }
        )
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            InferenceError::RateLimited {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

/// The inference answer is not valid JSON.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Model response is not valid JSON at line {line}, column {column}: {detail}\nResponse starts with: {excerpt:?}")]
pub struct MalformedResponseError {
    pub detail: String,
    pub line: usize,
    pub column: usize,
    /// First characters of the offending text.
    pub excerpt: String,
}

/// A non-fatal error for a single page (per-page mode only).
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum PageError {
    /// Page rasterisation or encoding failed.
    #[error("Page {page}: rendering failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// Inference failed after retries.
    #[error("Page {page}: inference failed: {detail}")]
    InferenceFailed { page: usize, detail: String },

    /// The answer for this page was not JSON.
    #[error("Page {page}: malformed response: {detail}")]
    Malformed { page: usize, detail: String },
}

impl PageError {
    /// Classify a fatal pipeline error as a page-scoped failure.
    pub fn from_extract_error(page: usize, err: &ExtractError) -> Self {
        let detail = err.to_string();
        match err.kind() {
            ErrorKind::Decode => PageError::RenderFailed { page, detail },
            ErrorKind::MalformedResponse => PageError::Malformed { page, detail },
            _ => PageError::InferenceFailed { page, detail },
        }
    }

    /// 1-indexed page number this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::InferenceFailed { page, .. }
            | PageError::Malformed { page, .. } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdfium_hint_names_the_library_setup() {
        let msg = ExtractError::PdfiumUnavailable("not found".into()).to_string();
        assert!(msg.contains("ensure_pdfium_library"));
        assert!(msg.contains("PDFIUM_LIB_PATH"));
        assert!(!msg.contains("normally downloaded automatically"));
    }

    #[test]
    fn kinds_distinguish_core_families() {
        let decode: ExtractError = DecodeError::EmptyDocument.into();
        let infer: ExtractError = InferenceError::EmptyResponse {
            backend: "gemini".into(),
        }
        .into();
        let malformed: ExtractError = MalformedResponseError {
            detail: "expected value".into(),
            line: 1,
            column: 1,
            excerpt: "not json".into(),
        }
        .into();

        assert_eq!(decode.kind(), ErrorKind::Decode);
        assert_eq!(infer.kind(), ErrorKind::Inference);
        assert_eq!(malformed.kind(), ErrorKind::MalformedResponse);
    }

    #[test]
    fn transient_classification() {
        assert!(InferenceError::Timeout {
            backend: "gemini".into(),
            secs: 60
        }
        .is_transient());
        assert!(InferenceError::RateLimited {
            backend: "gemini".into(),
            retry_after_secs: Some(3)
        }
        .is_transient());
        assert!(!InferenceError::Auth {
            backend: "gemini".into(),
            detail: "API key not valid".into()
        }
        .is_transient());
        assert!(!InferenceError::EmptyResponse {
            backend: "gemini".into()
        }
        .is_transient());
    }

    #[test]
    fn retry_after_only_for_rate_limit() {
        let e = InferenceError::RateLimited {
            backend: "openai".into(),
            retry_after_secs: Some(7),
        };
        assert_eq!(e.retry_after_secs(), Some(7));
        let e = InferenceError::Server {
            backend: "openai".into(),
            status: 503,
            detail: "overloaded".into(),
        };
        assert_eq!(e.retry_after_secs(), None);
    }

    #[test]
    fn malformed_display_includes_excerpt() {
        let e = MalformedResponseError {
            detail: "expected ident".into(),
            line: 1,
            column: 2,
            excerpt: "not json".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("line 1, column 2"), "got: {msg}");
        assert!(msg.contains("not json"), "got: {msg}");
    }

    #[test]
    fn page_error_from_extract_error() {
        let err: ExtractError = DecodeError::RasterisationFailed {
            page: 2,
            detail: "bitmap".into(),
        }
        .into();
        let pe = PageError::from_extract_error(2, &err);
        assert!(matches!(pe, PageError::RenderFailed { page: 2, .. }));
        assert_eq!(pe.page(), 2);
    }

    #[test]
    fn retries_exhausted_display_wraps_last() {
        let e = InferenceError::RetriesExhausted {
            attempts: 4,
            last: Box::new(InferenceError::Server {
                backend: "gemini".into(),
                status: 503,
                detail: "unavailable".into(),
            }),
        };
        let msg = e.to_string();
        assert!(msg.contains("4 attempts"));
        assert!(msg.contains("503"));
    }
}
