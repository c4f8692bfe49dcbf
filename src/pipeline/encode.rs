//! Image encoding for the page splitter and the HTTP engines.
//!
//! Rendered PDF pages are PNG-encoded: lossless compression keeps glyph edges
//! crisp, which matters more to recognition accuracy than payload size.
//! HTTP engines then wrap the unit bytes as base64 (Ollama `images`) or as a
//! `data:` URL (OpenAI-compatible `image_url`).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

use super::split::PageUnit;

/// Encode a rasterised page as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} page → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

/// Plain base64 of the unit bytes.
pub fn to_base64(unit: &PageUnit) -> String {
    STANDARD.encode(&unit.bytes)
}

/// `data:<mime>;base64,<payload>` for chat-completion image parts.
pub fn data_url(unit: &PageUnit) -> String {
    format!("data:{};base64,{}", unit.mime, to_base64(unit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image_as_png() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let png = encode_png(&img).expect("encode should succeed");
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn data_url_carries_mime() {
        let unit = PageUnit {
            index: 0,
            bytes: vec![0xFF, 0xD8, 0xFF],
            mime: "image/jpeg",
        };
        let url = data_url(&unit);
        assert!(url.starts_with("data:image/jpeg;base64,"));
        let payload = url.trim_start_matches("data:image/jpeg;base64,");
        assert_eq!(STANDARD.decode(payload).unwrap(), unit.bytes);
    }
}
