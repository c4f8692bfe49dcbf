//! Prompts for the multimodal engines.
//!
//! Both multimodal variants send the same instruction so their output is
//! comparable; callers can override it per engine via
//! [`crate::config::RemoteMultimodalConfig::prompt`] and
//! [`crate::config::LocalMultimodalConfig::prompt`].

/// Default extraction instruction sent alongside each page image.
pub const DEFAULT_EXTRACTION_PROMPT: &str = "Extract all text from this image. \
Return only the extracted text without any explanations or additional comments.";

/// Instruction used when the caller wants layout preserved.
///
/// Not the default: line-for-line transcription costs noticeably more output
/// tokens on dense pages.
pub const LAYOUT_EXTRACTION_PROMPT: &str = "Extract all text from this image. \
Preserve the original line breaks and reading order, keep table cells on the same line \
separated by tabs, and return only the extracted text without any explanations or \
additional comments.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_ask_for_text_only() {
        for p in [DEFAULT_EXTRACTION_PROMPT, LAYOUT_EXTRACTION_PROMPT] {
            assert!(p.starts_with("Extract all text from this image."));
            assert!(p.contains("without any explanations"));
        }
    }
}
