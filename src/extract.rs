//! Extraction entry points and the stage orchestration behind them.
//!
//! ## Flow
//!
//! ```text
//! Document ─▶ render ─▶ [page 1] ─▶ encode ─▶ infer ─▶ parse ─▶ validate ─▶ ExtractionOutput
//!                          │                     ▲       │
//!                          │                     └───────┘ one re-prompt on malformed JSON
//!                          └─ EachPage: every page, records merged by aggregate
//! ```
//!
//! Any failure in first-page mode aborts the request; there is no partial
//! result. In per-page mode a failing page becomes a [`PageError`] and the
//! request fails only if every page does.

use crate::backend::{resolve_backend, Correction, InferenceBackend};
use crate::config::{ExtractionConfig, PageStrategy};
use crate::error::{DecodeError, ExtractError, PageError};
use crate::output::{ExtractionOutput, ExtractionStats, PageExtraction};
use crate::pipeline::aggregate::merge_records;
use crate::pipeline::encode::encode_page;
use crate::pipeline::infer::Extractor;
use crate::pipeline::input::{self, Document};
use crate::pipeline::parse::parse_response;
use crate::pipeline::render::{self, DocumentInfo, PageImage, PageRenderer, PdfiumRenderer};
use crate::progress::Stage;
use crate::prompts::{correction_prompt, DEFAULT_INSTRUCTION};
use crate::schema::SCHEMA_VERSION;
use crate::validate::{fill_defaults, validate, ValidationWarning};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extract an invoice record from a PDF file or URL.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// - [`ExtractError::Decode`] when the bytes are not a readable PDF or have no pages
/// - [`ExtractError::Inference`] when the model could not be reached or refused
/// - [`ExtractError::MalformedResponse`] when its answer is not JSON
/// - input errors (missing file, failed download) and configuration errors
pub async fn extract(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);
    let document = input::load_document(input_str, config.download_timeout_secs).await?;
    Pipeline::from_config(config)?.run(document).await
}

/// Extract an invoice record from PDF bytes already in memory.
///
/// # Example
/// ```rust,no_run
/// use edgequake_invoice::{extract_from_bytes, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes: Vec<u8> = std::fs::read("invoice.pdf")?;
/// let output = extract_from_bytes(bytes, &ExtractionConfig::default()).await?;
/// println!("{}", output.to_pretty_json()?);
/// # Ok(())
/// # }
/// ```
pub async fn extract_from_bytes(
    bytes: impl Into<Vec<u8>>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let document = Document::from_bytes(bytes, "<bytes>");
    input::check_pdf_magic(&document.bytes)?;
    Pipeline::from_config(config)?.run(document).await
}

/// Extract and write the record as indented JSON to `output_path`.
///
/// Uses atomic write (temp file + rename) so a failed extraction never
/// leaves a partial or stale-looking artifact behind.
pub async fn extract_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    let input_str = input_str.as_ref();
    info!("Starting extraction: {}", input_str);
    let document = input::load_document(input_str, config.download_timeout_secs).await?;
    Pipeline::from_config(config)?
        .run_to_file(document, output_path.as_ref())
        .await
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(input_str, config))
}

/// Read document facts without calling the model.
///
/// Does not require an API key.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &ExtractionConfig,
) -> Result<DocumentInfo, ExtractError> {
    let document = input::load_document(input_str.as_ref(), config.download_timeout_secs).await?;
    render::inspect_document(
        Arc::new(PdfiumRenderer::new()),
        Arc::new(document.bytes),
        config.password.clone(),
    )
    .await
}

/// Write the record to `path` via a sibling temp file and rename.
pub async fn write_json_atomic(output: &ExtractionOutput, path: &Path) -> Result<(), ExtractError> {
    let write_err = |source: std::io::Error| ExtractError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let json = output
        .to_pretty_json()
        .map_err(|e| ExtractError::Internal(format!("Record serialisation failed: {}", e)))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(write_err)?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(write_err(e));
    }
    info!("Wrote {}", path.display());
    Ok(())
}

/// The stage sequence with its collaborators fixed.
///
/// [`extract`] builds one from the config; construct it directly to supply a
/// custom renderer or backend.
pub struct Pipeline {
    renderer: Arc<dyn PageRenderer>,
    extractor: Extractor,
    config: ExtractionConfig,
}

/// Per-page result before aggregation.
struct PageOutcome {
    record: Value,
    extraction: PageExtraction,
}

impl Pipeline {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        backend: Arc<dyn InferenceBackend>,
        config: &ExtractionConfig,
    ) -> Self {
        let instruction = config.instruction.as_deref().unwrap_or(DEFAULT_INSTRUCTION);
        Self {
            renderer,
            extractor: Extractor::new(
                backend,
                config.retry_policy(),
                instruction,
                config.max_output_tokens,
            ),
            config: config.clone(),
        }
    }

    /// pdfium renderer plus the backend resolved from `config`.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ExtractError> {
        let backend = resolve_backend(config)?;
        debug!("Using inference backend: {}", backend.name());
        Ok(Self::new(Arc::new(PdfiumRenderer::new()), backend, config))
    }

    /// Run every stage on `document`.
    pub async fn run(&self, document: Document) -> Result<ExtractionOutput, ExtractError> {
        let total_start = Instant::now();
        let cb = self.config.progress_callback.as_ref();

        // ── Render ───────────────────────────────────────────────────────
        if let Some(cb) = cb {
            cb.on_stage_start(0, Stage::Render);
        }
        let render_start = Instant::now();
        let mut pages = render::render_pages(
            Arc::clone(&self.renderer),
            Arc::new(document.bytes),
            self.config.render_options(),
        )
        .await?;
        let render_duration_ms = render_start.elapsed().as_millis() as u64;

        if self.config.page_strategy == PageStrategy::FirstPage {
            pages.truncate(1);
        }
        if pages.is_empty() {
            return Err(DecodeError::EmptyDocument.into());
        }
        info!(
            "Rendered {} page(s) from {} in {}ms",
            pages.len(),
            document.source,
            render_duration_ms
        );
        if let Some(cb) = cb {
            cb.on_extraction_start(pages.len());
        }

        // ── Extract ──────────────────────────────────────────────────────
        let inference_start = Instant::now();
        let mut records = Vec::with_capacity(pages.len());
        let mut extractions = Vec::with_capacity(pages.len());
        let mut first_error: Option<ExtractError> = None;

        for page in &pages {
            match self.extract_page(page).await {
                Ok(outcome) => {
                    if let Some(cb) = cb {
                        cb.on_page_complete(page.page_num, outcome.extraction.warnings);
                    }
                    records.push(outcome.record);
                    extractions.push(outcome.extraction);
                }
                Err(e) => {
                    warn!("Page {} failed: {}", page.page_num, e);
                    if let Some(cb) = cb {
                        cb.on_page_error(page.page_num, &e.to_string());
                    }
                    if self.config.page_strategy == PageStrategy::FirstPage {
                        return Err(e);
                    }
                    extractions.push(PageExtraction {
                        page_num: page.page_num,
                        error: Some(PageError::from_extract_error(page.page_num, &e)),
                        ..Default::default()
                    });
                    first_error.get_or_insert(e);
                }
            }
        }
        let inference_duration_ms = inference_start.elapsed().as_millis() as u64;

        if let Some(cb) = cb {
            cb.on_extraction_complete(pages.len(), records.len());
        }
        if records.is_empty() {
            return Err(first_error
                .unwrap_or_else(|| ExtractError::Internal("No page produced a record".into())));
        }

        // ── Validate ─────────────────────────────────────────────────────
        let succeeded = records.len();
        let mut record = if records.len() == 1 {
            records.remove(0)
        } else {
            merge_records(&records)
        };
        let warnings = self.check(&mut record)?;

        let stats = ExtractionStats {
            backend: self.extractor.backend_name().to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            pages_sent: pages.len(),
            pages_succeeded: succeeded,
            pages_failed: extractions.iter().filter(|p| p.error.is_some()).count(),
            total_input_tokens: extractions.iter().map(|p| p.input_tokens).sum(),
            total_output_tokens: extractions.iter().map(|p| p.output_tokens).sum(),
            total_retries: extractions.iter().map(|p| p.retries).sum(),
            reprompted: extractions.iter().any(|p| p.reprompted),
            total_duration_ms: total_start.elapsed().as_millis() as u64,
            render_duration_ms,
            inference_duration_ms,
        };
        info!(
            "Extraction complete: {}/{} page(s), {} warning(s), {}ms total",
            stats.pages_succeeded,
            stats.pages_sent,
            warnings.len(),
            stats.total_duration_ms
        );

        Ok(ExtractionOutput {
            record,
            warnings,
            pages: extractions,
            stats,
        })
    }

    /// [`run`](Self::run), then write the record to `path`. Nothing is
    /// written unless the extraction succeeds.
    pub async fn run_to_file(
        &self,
        document: Document,
        path: &Path,
    ) -> Result<ExtractionOutput, ExtractError> {
        let output = self.run(document).await?;
        write_json_atomic(&output, path).await?;
        Ok(output)
    }

    /// Encode → infer → parse for one page, with at most one re-prompt.
    async fn extract_page(&self, page: &PageImage) -> Result<PageOutcome, ExtractError> {
        let cb = self.config.progress_callback.as_ref();
        let page_num = page.page_num;
        let strip = self.config.strip_code_fences;

        if let Some(cb) = cb {
            cb.on_stage_start(page_num, Stage::Encode);
        }
        let encoded = encode_page(page)?;

        if let Some(cb) = cb {
            cb.on_stage_start(page_num, Stage::Infer);
        }
        let first = self
            .extractor
            .extract(&self.extractor.request(&encoded, None), cb)
            .await?;
        let mut extraction = PageExtraction {
            page_num,
            input_tokens: first.response.input_tokens,
            output_tokens: first.response.output_tokens,
            duration_ms: first.duration_ms,
            retries: first.retries,
            ..Default::default()
        };

        if let Some(cb) = cb {
            cb.on_stage_start(page_num, Stage::Parse);
        }
        let record = match parse_response(&first.response.text, strip) {
            Ok(value) => value,
            Err(e) if self.config.reprompt_on_malformed => {
                warn!("Page {}: answer is not JSON ({}); re-prompting once", page_num, e.detail);
                let correction = Correction {
                    previous_answer: first.response.text,
                    message: correction_prompt(&e.detail),
                };
                if let Some(cb) = cb {
                    cb.on_stage_start(page_num, Stage::Infer);
                }
                let second = self
                    .extractor
                    .extract(&self.extractor.request(&encoded, Some(correction)), cb)
                    .await?;
                extraction.reprompted = true;
                extraction.input_tokens += second.response.input_tokens;
                extraction.output_tokens += second.response.output_tokens;
                extraction.duration_ms += second.duration_ms;
                extraction.retries += second.retries;

                if let Some(cb) = cb {
                    cb.on_stage_start(page_num, Stage::Parse);
                }
                parse_response(&second.response.text, strip)?
            }
            Err(e) => return Err(e.into()),
        };

        extraction.warnings = validate(&record).len();
        Ok(PageOutcome { record, extraction })
    }

    /// Validate, enforce strict mode, then fill defaults.
    fn check(&self, record: &mut Value) -> Result<Vec<ValidationWarning>, ExtractError> {
        if let Some(cb) = self.config.progress_callback.as_ref() {
            cb.on_stage_start(0, Stage::Validate);
        }
        let warnings = validate(record);
        for w in &warnings {
            debug!("Validation: {}", w);
        }
        if self.config.strict && !warnings.is_empty() {
            return Err(ExtractError::Validation { warnings });
        }
        if self.config.fill_missing_fields {
            fill_defaults(record);
        }
        Ok(warnings)
    }
}
