//! Configuration types for invoice extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Credentials and the model identifier
//! live here and are handed to the inference backend when it is constructed;
//! nothing is read from process-global state after that point except the
//! documented environment fallbacks in [`crate::backend::resolve_backend`].

use crate::backend::InferenceBackend;
use crate::error::ExtractError;
use crate::pipeline::infer::RetryPolicy;
use crate::pipeline::render::RenderOptions;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Bounds for [`ExtractionConfig::max_rendered_pixels`].
pub const MIN_RENDERED_PIXELS: u32 = 100;
pub const MAX_RENDERED_PIXELS: u32 = 20_000;

/// Configuration for one invoice extraction.
///
/// # Example
/// ```rust
/// use edgequake_invoice::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .model("gemini-2.5-flash")
///     .max_retries(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 300);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Rendering DPI used when rasterising a page. Range: 72–600. Default: 300.
    ///
    /// Scanned invoices carry small print (GST numbers, HSN codes, tax
    /// tables); 300 DPI keeps those legible to the model.
    pub dpi: u32,

    /// Longest edge of a rendered page in pixels. Default: 4500.
    ///
    /// A cap independent of DPI so an oversized page cannot exhaust memory or
    /// the endpoint's inline-image limit. 4500 px leaves A4, Letter and Legal
    /// pages untouched at 300 DPI.
    pub max_rendered_pixels: u32,

    /// Model identifier. Default: `gemini-2.5-flash` for the Gemini backend,
    /// provider default otherwise.
    pub model: Option<String>,

    /// Backend name: `gemini`, or any provider known to edgequake-llm
    /// (`openai`, `anthropic`, `ollama`, …). Auto-detected when `None`.
    pub provider_name: Option<String>,

    /// Pre-constructed backend. Takes precedence over `provider_name`.
    pub backend: Option<Arc<dyn InferenceBackend>>,

    /// API key for the Gemini backend. Falls back to `GEMINI_API_KEY` /
    /// `GOOGLE_API_KEY` when `None`.
    pub api_key: Option<String>,

    /// Override for the Gemini REST base URL (proxies, regional endpoints).
    pub api_base_url: Option<String>,

    /// Maximum tokens the model may generate. Default: 8192.
    ///
    /// Invoices with dozens of line items produce long JSON; a low cap
    /// truncates it and the response no longer decodes.
    pub max_output_tokens: usize,

    /// Retries after the first attempt on a transient inference failure. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Upper bound for a single retry delay in milliseconds. Default: 30 000.
    pub max_backoff_ms: u64,

    /// Per-attempt inference timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom role instruction. If None, uses [`crate::prompts::DEFAULT_INSTRUCTION`].
    pub instruction: Option<String>,

    /// Which pages to extract. Default: [`PageStrategy::FirstPage`].
    pub page_strategy: PageStrategy,

    /// Re-ask the model once when its answer does not decode. Default: true.
    pub reprompt_on_malformed: bool,

    /// Strip a single outer Markdown code fence before decoding. Default: true.
    pub strip_code_fences: bool,

    /// Insert missing schema fields with their defaults. Default: true.
    pub fill_missing_fields: bool,

    /// Fail with [`ExtractError::Validation`] when the record has schema
    /// warnings. Default: false.
    pub strict: bool,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_rendered_pixels: 4500,
            model: None,
            provider_name: None,
            backend: None,
            api_key: None,
            api_base_url: None,
            max_output_tokens: 8192,
            max_retries: 3,
            retry_backoff_ms: 500,
            max_backoff_ms: 30_000,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            password: None,
            instruction: None,
            page_strategy: PageStrategy::default(),
            reprompt_on_malformed: true,
            strip_code_fences: true,
            fill_missing_fields: true,
            strict: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base_url", &self.api_base_url)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("page_strategy", &self.page_strategy)
            .field("reprompt_on_malformed", &self.reprompt_on_malformed)
            .field("strict", &self.strict)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Retry policy for the Extractor.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_ms: self.retry_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
            attempt_timeout_secs: self.api_timeout_secs,
        }
    }

    /// Render options for the given strategy.
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            dpi: self.dpi,
            max_rendered_pixels: self.max_rendered_pixels,
            password: self.password.clone(),
            max_pages: match self.page_strategy {
                PageStrategy::FirstPage => Some(1),
                PageStrategy::EachPage => None,
            },
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = Some(url.into());
        self
    }

    pub fn max_output_tokens(mut self, n: usize) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: u64) -> Self {
        self.config.max_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.config.instruction = Some(instruction.into());
        self
    }

    pub fn page_strategy(mut self, strategy: PageStrategy) -> Self {
        self.config.page_strategy = strategy;
        self
    }

    pub fn reprompt_on_malformed(mut self, v: bool) -> Self {
        self.config.reprompt_on_malformed = v;
        self
    }

    pub fn strip_code_fences(mut self, v: bool) -> Self {
        self.config.strip_code_fences = v;
        self
    }

    pub fn fill_missing_fields(mut self, v: bool) -> Self {
        self.config.fill_missing_fields = v;
        self
    }

    pub fn strict(mut self, v: bool) -> Self {
        self.config.strict = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if !(72..=600).contains(&c.dpi) {
            return Err(ExtractError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.download_timeout_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "Download timeout must be ≥ 1 second".into(),
            ));
        }
        if !(MIN_RENDERED_PIXELS..=MAX_RENDERED_PIXELS).contains(&c.max_rendered_pixels) {
            return Err(ExtractError::InvalidConfig(format!(
                "max_rendered_pixels must be {}–{}, got {}",
                MIN_RENDERED_PIXELS, MAX_RENDERED_PIXELS, c.max_rendered_pixels
            )));
        }
        if c.max_output_tokens == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_output_tokens must be ≥ 1".into(),
            ));
        }
        if matches!(c.api_key.as_deref(), Some(k) if k.trim().is_empty()) {
            return Err(ExtractError::InvalidConfig("API key is empty".into()));
        }
        Ok(self.config)
    }
}

/// Which pages of the PDF are sent to the model.
///
/// Most invoices fit on one page, and the first page carries the header
/// (seller, buyer, number, date) even when line items spill over. `EachPage`
/// extracts every page independently and merges the results; a page that
/// fails is recorded and skipped instead of aborting the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStrategy {
    /// Render and extract page one only. (default)
    #[default]
    FirstPage,
    /// Render and extract every page, merging the records.
    EachPage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ExtractionConfig::default();
        assert_eq!(c.dpi, 300);
        assert_eq!(c.page_strategy, PageStrategy::FirstPage);
        assert!(c.reprompt_on_malformed);
        assert!(c.fill_missing_fields);
        assert!(!c.strict);
        assert_eq!(c.api_timeout_secs, 60);
    }

    #[test]
    fn dpi_out_of_range_is_rejected() {
        let err = ExtractionConfig::builder().dpi(1200).build().unwrap_err();
        assert!(err.to_string().contains("DPI"), "got: {err}");
        assert!(ExtractionConfig::builder().dpi(50).build().is_err());
        assert!(ExtractionConfig::builder().dpi(600).build().is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        assert!(ExtractionConfig::builder()
            .api_timeout_secs(0)
            .build()
            .is_err());
    }

    #[test]
    fn zero_download_timeout_is_rejected() {
        assert!(ExtractionConfig::builder()
            .download_timeout_secs(0)
            .build()
            .is_err());
    }

    #[test]
    fn rendered_pixel_cap_is_bounded() {
        for px in [0, 99, 20_001, u32::MAX] {
            assert!(
                ExtractionConfig::builder().max_rendered_pixels(px).build().is_err(),
                "{px} accepted"
            );
        }
        assert!(ExtractionConfig::builder()
            .max_rendered_pixels(20_000)
            .build()
            .is_ok());
    }

    #[test]
    fn blank_api_key_is_rejected() {
        assert!(ExtractionConfig::builder().api_key("  ").build().is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let c = ExtractionConfig::builder()
            .api_key("AIza-secret")
            .password("hunter2")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("AIza-secret"));
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn first_page_strategy_limits_rendering() {
        let c = ExtractionConfig::default();
        assert_eq!(c.render_options().max_pages, Some(1));
        let c = ExtractionConfig::builder()
            .page_strategy(PageStrategy::EachPage)
            .build()
            .unwrap();
        assert_eq!(c.render_options().max_pages, None);
    }

    #[test]
    fn retry_policy_mirrors_config() {
        let c = ExtractionConfig::builder()
            .max_retries(5)
            .retry_backoff_ms(100)
            .api_timeout_secs(30)
            .build()
            .unwrap();
        let p = c.retry_policy();
        assert_eq!(p.max_retries, 5);
        assert_eq!(p.backoff_ms, 100);
        assert_eq!(p.attempt_timeout_secs, 30);
    }
}
