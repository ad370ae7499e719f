//! Image OCR with rotation retries.

use std::path::PathBuf;
use std::process::Command;

use image::{DynamicImage, ImageFormat};

use super::is_readable;
use crate::config::RecoveryPolicy;
use crate::error::{HarvesterError, Result};

/// Recognizes text in an image.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &DynamicImage) -> Result<String>;
}

/// OCR through the `tesseract` command-line tool.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: PathBuf,
    language: String,
}

impl TesseractOcr {
    /// Locate `tesseract` on `PATH`.
    pub fn new(language: impl Into<String>) -> Result<Self> {
        let binary = which::which("tesseract")
            .map_err(|_| HarvesterError::ToolUnavailable("tesseract".to_string()))?;
        Ok(Self {
            binary,
            language: language.into(),
        })
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, image: &DynamicImage) -> Result<String> {
        let input = tempfile::Builder::new()
            .prefix("ocr-")
            .suffix(".png")
            .tempfile()?;
        image.save_with_format(input.path(), ImageFormat::Png)?;

        let output = Command::new(&self.binary)
            .arg(input.path())
            .arg("stdout")
            .args(["-l", &self.language])
            .output()?;

        if !output.status.success() {
            return Err(HarvesterError::ToolFailed {
                tool: "tesseract".to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Grayscale and boost contrast ahead of OCR.
#[must_use]
pub fn preprocess(image: &DynamicImage, contrast_boost: f32) -> DynamicImage {
    image.grayscale().adjust_contrast(contrast_boost)
}

/// Rotate by `quarter_turns` × 90° clockwise.
#[must_use]
pub fn rotate(image: &DynamicImage, quarter_turns: u32) -> DynamicImage {
    match quarter_turns % 4 {
        0 => image.clone(),
        1 => image.rotate90(),
        2 => image.rotate180(),
        _ => image.rotate270(),
    }
}

/// OCR one page, rotating until the text is readable.
///
/// Makes at most `policy.rotation_attempts` OCR calls. Returns `None` when
/// no orientation produced readable text.
pub fn recognize_with_rotation(
    engine: &dyn OcrEngine,
    image: &DynamicImage,
    policy: &RecoveryPolicy,
) -> Result<Option<String>> {
    let prepared = preprocess(image, policy.contrast_boost);

    for attempt in 0..policy.rotation_attempts {
        let text = engine.recognize(&rotate(&prepared, attempt))?;
        if is_readable(&text, policy.min_readable_chars) {
            tracing::debug!(attempt, chars = text.len(), "OCR produced readable text");
            return Ok(Some(text));
        }
        tracing::debug!(attempt, "OCR text too short, rotating");
    }

    Ok(None)
}
