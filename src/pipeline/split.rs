//! Page Splitter: decompose a source document into processing units.
//!
//! ## Format detection
//!
//! The format is sniffed from magic bytes, never from the file name: upload
//! names are caller-controlled and routinely wrong. Single images become one
//! unit carrying the original bytes untouched. PDFs are rasterised page by
//! page through pdfium and each page is PNG-encoded.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. `max_pixels` caps the longest edge regardless
//! of physical size, keeping memory bounded and staying inside the image
//! size multimodal models handle well.
//!
//! Splitting is CPU-bound and pdfium is not async-safe; the pipeline calls
//! [`Splitter::split`] from `spawn_blocking`.

use crate::error::RecognitionError;
use crate::pipeline::encode::encode_png;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};

/// One independently recognisable piece of a document.
#[derive(Clone, PartialEq, Eq)]
pub struct PageUnit {
    /// 0-based position in the source document.
    pub index: usize,
    pub bytes: Vec<u8>,
    pub mime: &'static str,
}

impl PageUnit {
    /// File extension matching `mime`, for engines that need a path on disk.
    pub fn extension(&self) -> &'static str {
        SourceFormat::from_mime(self.mime)
            .map(SourceFormat::extension)
            .unwrap_or("bin")
    }
}

impl std::fmt::Debug for PageUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageUnit")
            .field("index", &self.index)
            .field("bytes", &self.bytes.len())
            .field("mime", &self.mime)
            .finish()
    }
}

/// Decomposes raw source bytes into ordered units. Pure and deterministic.
pub trait Splitter: Send + Sync {
    fn split(&self, source: &[u8]) -> Result<Vec<PageUnit>, RecognitionError>;
}

// ── Format sniffing ──────────────────────────────────────────────────────

/// Source formats the splitter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Pdf,
    Png,
    Jpeg,
    Tiff,
    Bmp,
    Gif,
    Webp,
}

impl SourceFormat {
    const ALL: [SourceFormat; 7] = [
        SourceFormat::Pdf,
        SourceFormat::Png,
        SourceFormat::Jpeg,
        SourceFormat::Tiff,
        SourceFormat::Bmp,
        SourceFormat::Gif,
        SourceFormat::Webp,
    ];

    /// Identify a format from its leading bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        let starts = |magic: &[u8]| bytes.starts_with(magic);
        if starts(b"%PDF") {
            Some(SourceFormat::Pdf)
        } else if starts(b"\x89PNG\r\n\x1a\n") {
            Some(SourceFormat::Png)
        } else if starts(&[0xFF, 0xD8, 0xFF]) {
            Some(SourceFormat::Jpeg)
        } else if starts(b"II*\0") || starts(b"MM\0*") {
            Some(SourceFormat::Tiff)
        } else if starts(b"BM") {
            Some(SourceFormat::Bmp)
        } else if starts(b"GIF87a") || starts(b"GIF89a") {
            Some(SourceFormat::Gif)
        } else if bytes.len() >= 12 && starts(b"RIFF") && &bytes[8..12] == b"WEBP" {
            Some(SourceFormat::Webp)
        } else {
            None
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            SourceFormat::Pdf => "application/pdf",
            SourceFormat::Png => "image/png",
            SourceFormat::Jpeg => "image/jpeg",
            SourceFormat::Tiff => "image/tiff",
            SourceFormat::Bmp => "image/bmp",
            SourceFormat::Gif => "image/gif",
            SourceFormat::Webp => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            SourceFormat::Pdf => "pdf",
            SourceFormat::Png => "png",
            SourceFormat::Jpeg => "jpg",
            SourceFormat::Tiff => "tif",
            SourceFormat::Bmp => "bmp",
            SourceFormat::Gif => "gif",
            SourceFormat::Webp => "webp",
        }
    }

    fn from_mime(mime: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.mime() == mime)
    }
}

// ── Default splitter ─────────────────────────────────────────────────────

/// Images pass through as one unit; PDFs are rasterised via pdfium.
#[derive(Debug, Clone)]
pub struct DocumentSplitter {
    /// Longest rendered edge in pixels. Default: 2000.
    pub max_pixels: u32,
    /// Directory holding the pdfium shared library. `None` uses the system
    /// library search path.
    pub library_path: Option<PathBuf>,
}

impl Default for DocumentSplitter {
    fn default() -> Self {
        Self {
            max_pixels: 2000,
            library_path: None,
        }
    }
}

impl DocumentSplitter {
    pub fn new(max_pixels: u32, library_path: Option<PathBuf>) -> Self {
        Self {
            max_pixels: max_pixels.max(100),
            library_path,
        }
    }

    fn bind(&self) -> Result<Pdfium, RecognitionError> {
        let bindings = match &self.library_path {
            Some(dir) => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| {
            RecognitionError::unsupported_format(format!(
                "PDF support unavailable (pdfium not loadable): {:?}",
                e
            ))
        })?;
        Ok(Pdfium::new(bindings))
    }

    fn split_pdf(&self, source: &[u8]) -> Result<Vec<PageUnit>, RecognitionError> {
        let pdfium = self.bind()?;
        let document = pdfium.load_pdf_from_byte_slice(source, None).map_err(|e| {
            let detail = format!("{:?}", e);
            if detail.to_ascii_lowercase().contains("password") {
                RecognitionError::unsupported_format("PDF is password-protected")
            } else {
                RecognitionError::unsupported_format(format!("corrupt PDF: {}", detail))
            }
        })?;

        let pages = document.pages();
        let total = pages.len() as usize;
        if total == 0 {
            return Err(RecognitionError::unsupported_format("PDF has no pages"));
        }
        info!("PDF loaded: {} pages", total);

        let render_config = PdfRenderConfig::new()
            .set_target_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let mut units = Vec::with_capacity(total);
        for (index, page) in pages.iter().enumerate() {
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                RecognitionError::unsupported_format(format!(
                    "page {} could not be rasterised: {:?}",
                    index + 1,
                    e
                ))
            })?;
            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                index + 1,
                image.width(),
                image.height()
            );
            let bytes = encode_png(&image).map_err(|e| {
                RecognitionError::unsupported_format(format!(
                    "page {} could not be encoded: {}",
                    index + 1,
                    e
                ))
            })?;
            units.push(PageUnit {
                index,
                bytes,
                mime: SourceFormat::Png.mime(),
            });
        }
        Ok(units)
    }
}

impl Splitter for DocumentSplitter {
    fn split(&self, source: &[u8]) -> Result<Vec<PageUnit>, RecognitionError> {
        if source.is_empty() {
            return Err(RecognitionError::unsupported_format("source is empty"));
        }
        match SourceFormat::sniff(source) {
            Some(SourceFormat::Pdf) => self.split_pdf(source),
            Some(image) => Ok(vec![PageUnit {
                index: 0,
                bytes: source.to_vec(),
                mime: image.mime(),
            }]),
            None => {
                let head: Vec<String> = source.iter().take(4).map(|b| format!("{b:02x}")).collect();
                Err(RecognitionError::unsupported_format(format!(
                    "unrecognised format (leading bytes {})",
                    head.join(" ")
                )))
            }
        }
    }
}
