//! Image encoding: `DynamicImage` → base64 PNG.
//!
//! Vision endpoints accept images inline as base64 in the JSON request body.
//! PNG is lossless; JPEG artefacts around small glyphs cost accuracy on
//! exactly the fields invoices care about (GSTIN, PAN, amounts).

use crate::error::DecodeError;
use crate::pipeline::render::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::io::Cursor;
use tracing::debug;

/// A page ready to be attached to an inference request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPage {
    /// 1-indexed page number.
    pub page_num: usize,
    pub mime_type: &'static str,
    /// Base64 (standard alphabet, padded) image bytes.
    pub data: String,
    pub width: u32,
    pub height: u32,
}

/// Encode a rasterised page as a base64 PNG.
pub fn encode_page(page: &PageImage) -> Result<EncodedPage, DecodeError> {
    let mut buf = Vec::new();
    page.image
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| DecodeError::ImageEncoding {
            page: page.page_num,
            detail: e.to_string(),
        })?;

    let data = STANDARD.encode(&buf);
    debug!(
        "Encoded page {} → {} bytes PNG, {} bytes base64",
        page.page_num,
        buf.len(),
        data.len()
    );

    Ok(EncodedPage {
        page_num: page.page_num,
        mime_type: "image/png",
        data,
        width: page.image.width(),
        height: page.image.height(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    fn page(w: u32, h: u32) -> PageImage {
        PageImage {
            page_num: 1,
            image: DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]))),
        }
    }

    #[test]
    fn encode_small_image() {
        let encoded = encode_page(&page(10, 20)).expect("encode should succeed");
        assert_eq!(encoded.mime_type, "image/png");
        assert_eq!((encoded.width, encoded.height), (10, 20));
        assert_eq!(encoded.page_num, 1);
    }

    #[test]
    fn payload_is_png() {
        let encoded = encode_page(&page(4, 4)).unwrap();
        let bytes = STANDARD.decode(&encoded.data).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }
}
