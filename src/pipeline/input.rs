//! Input resolution: turn a user-supplied path or URL into an in-memory
//! [`Document`].
//!
//! pdfium can open a document straight from a byte slice, so both local files
//! and downloads end up as owned bytes; nothing is written to disk. The PDF
//! magic (`%PDF`) is checked here so a wrong upload fails with a
//! [`DecodeError::NotAPdf`] before any rendering work starts.

use crate::error::{DecodeError, ExtractError};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Raw bytes of one PDF plus where they came from.
#[derive(Clone)]
pub struct Document {
    pub bytes: Vec<u8>,
    /// File path or URL, for logs and error messages.
    pub source: String,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("source", &self.source)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl Document {
    /// Wrap bytes that are already in memory (upload widget, database, …).
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, source: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            source: source.into(),
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Verify the `%PDF` magic at the start of `bytes`.
pub fn check_pdf_magic(bytes: &[u8]) -> Result<(), DecodeError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(DecodeError::NotAPdf {
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

/// Load the input string into a [`Document`].
///
/// URLs are downloaded (bounded by `timeout_secs`); anything else is read as
/// a local file.
pub async fn load_document(input: &str, timeout_secs: u64) -> Result<Document, ExtractError> {
    let document = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };
    check_pdf_magic(&document.bytes)?;
    Ok(document)
}

async fn read_local(path_str: &str) -> Result<Document, ExtractError> {
    let path = PathBuf::from(path_str);
    let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ExtractError::PermissionDenied { path: path.clone() },
        _ => ExtractError::FileNotFound { path: path.clone() },
    })?;
    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    Ok(Document::from_bytes(bytes, path_str))
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<Document, ExtractError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            ExtractError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ExtractError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_err)?;
    if !response.status().is_success() {
        return Err(ExtractError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(map_err)?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(Document::from_bytes(bytes.to_vec(), url))
}
