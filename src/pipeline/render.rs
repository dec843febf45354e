//! PDF rasterisation: render pages to `DynamicImage` via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and not
//! async-aware. [`render_pages`] moves the work onto tokio's blocking pool so
//! the runtime's worker threads never stall while a 300 DPI page rasterises.
//!
//! ## Why a trait?
//!
//! [`PageRenderer`] is the seam between the pipeline and pdfium. Production
//! code uses [`PdfiumRenderer`]; tests substitute an in-memory renderer so the
//! orchestration can be exercised without the native library.

use crate::error::{DecodeError, ExtractError};
use crate::pipeline::input::check_pdf_magic;
use image::DynamicImage;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Points per inch in PDF user space.
const PDF_POINTS_PER_INCH: f32 = 72.0;

/// One rasterised page.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-indexed page number.
    pub page_num: usize,
    pub image: DynamicImage,
}

/// Rendering parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub dpi: u32,
    /// Cap on the longest edge in pixels.
    pub max_rendered_pixels: u32,
    pub password: Option<String>,
    /// Render at most this many leading pages; `None` renders all.
    pub max_pages: Option<usize>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_rendered_pixels: 4500,
            password: None,
            max_pages: None,
        }
    }
}

/// Document-level facts available without rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub page_count: usize,
    pub title: Option<String>,
    pub author: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub pdf_version: String,
}

/// Converts PDF bytes into ordered page images.
pub trait PageRenderer: Send + Sync {
    /// Render pages in order. Fails with [`DecodeError`] for unreadable or
    /// empty documents.
    fn render(&self, pdf: &[u8], options: &RenderOptions) -> Result<Vec<PageImage>, ExtractError>;

    /// Document facts without rasterising.
    fn inspect(&self, pdf: &[u8], password: Option<&str>) -> Result<DocumentInfo, ExtractError>;
}

/// Render on tokio's blocking pool.
pub async fn render_pages(
    renderer: Arc<dyn PageRenderer>,
    pdf: Arc<Vec<u8>>,
    options: RenderOptions,
) -> Result<Vec<PageImage>, ExtractError> {
    tokio::task::spawn_blocking(move || renderer.render(&pdf, &options))
        .await
        .map_err(|e| ExtractError::Internal(format!("Render task panicked: {}", e)))?
}

/// Inspect on tokio's blocking pool.
pub async fn inspect_document(
    renderer: Arc<dyn PageRenderer>,
    pdf: Arc<Vec<u8>>,
    password: Option<String>,
) -> Result<DocumentInfo, ExtractError> {
    tokio::task::spawn_blocking(move || renderer.inspect(&pdf, password.as_deref()))
        .await
        .map_err(|e| ExtractError::Internal(format!("Inspect task panicked: {}", e)))?
}

/// pdfium-backed renderer.
///
/// The library is bound per call: from `PDFIUM_LIB_PATH` or the pdfium-auto
/// cache when present, otherwise from the system library search path.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumRenderer;

impl PdfiumRenderer {
    pub fn new() -> Self {
        Self
    }

    fn bind(&self) -> Result<Pdfium, ExtractError> {
        if let Some(path) = pdfium_auto::cached_pdfium_path() {
            return pdfium_auto::bind_pdfium_from_path(&path)
                .map_err(|e| ExtractError::PdfiumUnavailable(e.to_string()));
        }
        Pdfium::bind_to_system_library()
            .map(Pdfium::new)
            .map_err(|e| ExtractError::PdfiumUnavailable(format!("{:?}", e)))
    }
}

impl PageRenderer for PdfiumRenderer {
    fn render(&self, pdf: &[u8], options: &RenderOptions) -> Result<Vec<PageImage>, ExtractError> {
        check_pdf_magic(pdf)?;
        let pdfium = self.bind()?;
        let document = load(&pdfium, pdf, options.password.as_deref())?;

        let pages = document.pages();
        let total = pages.len() as usize;
        if total == 0 {
            return Err(DecodeError::EmptyDocument.into());
        }
        let wanted = options.max_pages.map_or(total, |n| n.min(total));
        info!("PDF loaded: {} pages, rendering {} at {} DPI", total, wanted, options.dpi);

        let max_px = i32::try_from(options.max_rendered_pixels).unwrap_or(i32::MAX);
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(options.dpi as f32 / PDF_POINTS_PER_INCH)
            .set_maximum_width(max_px)
            .set_maximum_height(max_px);

        let mut images = Vec::with_capacity(wanted);
        for idx in 0..wanted {
            let page_num = idx + 1;
            let page = pages
                .get(idx as u16)
                .map_err(|e| DecodeError::RasterisationFailed {
                    page: page_num,
                    detail: format!("{:?}", e),
                })?;
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                DecodeError::RasterisationFailed {
                    page: page_num,
                    detail: format!("{:?}", e),
                }
            })?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                page_num,
                image.width(),
                image.height()
            );
            images.push(PageImage { page_num, image });
        }

        Ok(images)
    }

    fn inspect(&self, pdf: &[u8], password: Option<&str>) -> Result<DocumentInfo, ExtractError> {
        check_pdf_magic(pdf)?;
        let pdfium = self.bind()?;
        let document = load(&pdfium, pdf, password)?;

        let metadata = document.metadata();
        let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
            metadata
                .get(tag)
                .map(|t| t.value().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(DocumentInfo {
            page_count: document.pages().len() as usize,
            title: get_meta(PdfDocumentMetadataTagType::Title),
            author: get_meta(PdfDocumentMetadataTagType::Author),
            creator: get_meta(PdfDocumentMetadataTagType::Creator),
            producer: get_meta(PdfDocumentMetadataTagType::Producer),
            pdf_version: format!("{:?}", document.version()),
        })
    }
}

fn load<'a>(
    pdfium: &'a Pdfium,
    pdf: &'a [u8],
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, DecodeError> {
    pdfium
        .load_pdf_from_byte_slice(pdf, password)
        .map_err(|e| classify_load_error(&format!("{:?}", e), password.is_some()))
}

/// Map a pdfium load failure onto a [`DecodeError`].
///
/// pdfium reports password problems through its generic error code, so the
/// debug text is the only signal available.
fn classify_load_error(detail: &str, had_password: bool) -> DecodeError {
    if detail.contains("Password") || detail.contains("password") {
        if had_password {
            DecodeError::WrongPassword
        } else {
            DecodeError::PasswordRequired
        }
    } else {
        DecodeError::Corrupt {
            detail: detail.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_errors_are_classified() {
        assert_eq!(
            classify_load_error("PdfiumLibraryInternalError(PasswordError)", false),
            DecodeError::PasswordRequired
        );
        assert_eq!(
            classify_load_error("PdfiumLibraryInternalError(PasswordError)", true),
            DecodeError::WrongPassword
        );
    }

    #[test]
    fn other_errors_are_corrupt() {
        assert!(matches!(
            classify_load_error("PdfiumLibraryInternalError(FormatError)", false),
            DecodeError::Corrupt { .. }
        ));
    }

    #[test]
    fn renderer_rejects_non_pdf_before_binding() {
        // The magic check runs first, so this needs no pdfium library.
        let err = PdfiumRenderer::new()
            .render(b"<html>502 Bad Gateway</html>", &RenderOptions::default())
            .unwrap_err();
        assert!(matches!(err, ExtractError::Decode(DecodeError::NotAPdf { .. })));
    }

    #[test]
    fn renderer_rejects_empty_bytes() {
        let err = PdfiumRenderer::new()
            .render(&[], &RenderOptions::default())
            .unwrap_err();
        assert!(matches!(err, ExtractError::Decode(_)));
    }
}
