//! Pipeline stages for invoice extraction.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. a fake renderer or backend in tests) without
//! touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ infer ──▶ parse ──▶ (validate)
//! (URL/path) (pdfium)  (base64)   (VLM)    (JSON)
//!                                   │
//!                       aggregate ◀─┘  (per-page mode only)
//! ```
//!
//! 1. [`input`] : resolve the user-supplied path or URL to in-memory bytes
//! 2. [`render`]: rasterise pages; runs in `spawn_blocking` because pdfium is
//!    not async-safe
//! 3. [`encode`]: PNG-encode and base64-wrap a `DynamicImage` for the
//!    multimodal request body
//! 4. [`infer`] : drive the model call with timeout and retry/backoff; the
//!    only stage with network I/O besides URL download
//! 5. [`parse`] : decode the answer as JSON
//! 6. [`aggregate`]: merge per-page records

pub mod aggregate;
pub mod encode;
pub mod infer;
pub mod input;
pub mod parse;
pub mod render;
