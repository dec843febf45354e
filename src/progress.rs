//! Progress-callback trait for extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to observe
//! the pipeline as it moves through its stages. The CLI uses this to drive
//! its spinner; library callers can forward events to logs or a UI.
//!
//! # Example
//!
//! ```rust
//! use edgequake_invoice::{ExtractionConfig, ExtractionProgressCallback, Stage};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl ExtractionProgressCallback for Printer {
//!     fn on_stage_start(&self, page_num: usize, stage: Stage) {
//!         eprintln!("page {page_num}: {}", stage.label());
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(Printer) as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pipeline stage reported to [`ExtractionProgressCallback::on_stage_start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Render,
    Encode,
    Infer,
    Parse,
    Validate,
}

impl Stage {
    /// Short human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Render => "rendering",
            Stage::Encode => "encoding",
            Stage::Infer => "asking the model",
            Stage::Parse => "decoding JSON",
            Stage::Validate => "validating",
        }
    }
}

/// Called by the pipeline as it processes a document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once the PDF has been rendered and the pages to extract are known.
    fn on_extraction_start(&self, pages: usize) {
        let _ = pages;
    }

    /// Called when a page enters a stage. `page_num` is 1-indexed; rendering
    /// happens for the whole document and is reported as page 0.
    fn on_stage_start(&self, page_num: usize, stage: Stage) {
        let _ = (page_num, stage);
    }

    /// Called before sleeping between inference attempts.
    fn on_retry(&self, page_num: usize, attempt: u32, delay_ms: u64, error: &str) {
        let _ = (page_num, attempt, delay_ms, error);
    }

    /// Called when a page produced a record.
    fn on_page_complete(&self, page_num: usize, warnings: usize) {
        let _ = (page_num, warnings);
    }

    /// Called when a page failed.
    fn on_page_error(&self, page_num: usize, error: &str) {
        let _ = (page_num, error);
    }

    /// Called once after all pages have been attempted.
    fn on_extraction_complete(&self, pages: usize, success_count: usize) {
        let _ = (pages, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        stages: Mutex<Vec<Stage>>,
        retries: AtomicUsize,
    }

    impl ExtractionProgressCallback for Recorder {
        fn on_stage_start(&self, _page_num: usize, stage: Stage) {
            self.stages.lock().unwrap().push(stage);
        }

        fn on_retry(&self, _page_num: usize, _attempt: u32, _delay_ms: u64, _error: &str) {
            self.retries.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_extraction_start(1);
        cb.on_stage_start(1, Stage::Infer);
        cb.on_retry(1, 1, 500, "503");
        cb.on_page_complete(1, 0);
        cb.on_page_error(1, "boom");
        cb.on_extraction_complete(1, 0);
    }

    #[test]
    fn overridden_methods_receive_events() {
        let rec = Recorder::default();
        rec.on_stage_start(1, Stage::Render);
        rec.on_stage_start(1, Stage::Infer);
        rec.on_retry(1, 1, 500, "timeout");
        assert_eq!(*rec.stages.lock().unwrap(), vec![Stage::Render, Stage::Infer]);
        assert_eq!(rec.retries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn labels_are_distinct() {
        let all = [
            Stage::Render,
            Stage::Encode,
            Stage::Infer,
            Stage::Parse,
            Stage::Validate,
        ];
        let mut labels: Vec<_> = all.iter().map(Stage::label).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), all.len());
    }
}
