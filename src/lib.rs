//! # edgequake-invoice
//!
//! Extract structured data from scanned invoice PDFs using Vision Language
//! Models (VLMs).
//!
//! ## Why this crate?
//!
//! Scanned invoices have no text layer, and OCR-then-regex pipelines break on
//! every new layout. Instead this crate rasterises the first page into a PNG
//! and asks a VLM to fill a fixed JSON schema (seller, buyer, invoice header,
//! line items with GST breakdown), the way an accounts clerk would read it.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     resolve local file or download from URL
//!  ├─ 2. Render    rasterise page 1 at 300 DPI via pdfium (spawn_blocking)
//!  ├─ 3. Encode    PNG → base64
//!  ├─ 4. Infer     instruction + schema + image → Gemini / OpenAI / Claude / …
//!  ├─ 5. Parse     answer → serde_json::Value (one re-prompt if not JSON)
//!  └─ 6. Validate  schema warnings, missing fields filled with null
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_invoice::{extract, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Backend auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / ANTHROPIC_API_KEY
//!     let config = ExtractionConfig::default();
//!     let output = extract("invoice.pdf", &config).await?;
//!     println!("{}", output.to_pretty_json()?);
//!     for w in &output.warnings {
//!         eprintln!("warning: {w}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invoice2json` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-invoice = { version = "0.1", default-features = false }
//! ```
//!
//! ## Choosing a Backend
//!
//! | Backend | Selected by | Notes |
//! |---------|-------------|-------|
//! | Gemini REST | `GEMINI_API_KEY`, `--provider gemini` | Default model `gemini-2.5-flash`; server-side JSON mode |
//! | edgequake-llm | `--provider openai\|anthropic\|ollama\|…` | JSON enforced by prompt only |
//!
//! Temperature is always 0: extraction is transcription.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod schema;
pub mod validate;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{InferenceBackend, InferenceRequest, InferenceResponse};
pub use config::{ExtractionConfig, ExtractionConfigBuilder, PageStrategy};
pub use error::{DecodeError, ErrorKind, ExtractError, InferenceError, MalformedResponseError, PageError};
pub use extract::{extract, extract_from_bytes, extract_sync, extract_to_file, inspect, Pipeline};
pub use output::{ExtractionOutput, ExtractionStats, PageExtraction, DOWNLOAD_FILE_NAME};
pub use pipeline::render::{DocumentInfo, PageRenderer};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
pub use record::InvoiceRecord;
pub use validate::ValidationWarning;
