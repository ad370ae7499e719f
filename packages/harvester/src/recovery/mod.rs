//! Text recovery engine.
//!
//! PDFs are read through their text layer first. When that yields too little
//! text the pages are rasterized and OCR'd, rotating each page in quarter
//! turns until the text is readable. Images go straight to OCR.
//!
//! Recovery never fails: any error is logged with the polling unit's
//! hierarchy path and turned into an unreadable result.

pub mod ocr;
pub mod pdf;

use std::path::Path;

pub use ocr::{OcrEngine, TesseractOcr};
pub use pdf::{PdfBackend, SystemPdfBackend};

use crate::config::RecoveryPolicy;
use crate::error::{HarvesterError, Result};
use crate::types::{ArtifactKind, ArtifactRecord, RecoveryMethod, TextRecoveryResult};

/// Readability heuristic shared by direct extraction and OCR.
///
/// Text is readable when, trimmed, it has at least `min_chars` characters
/// and at least one of them is alphanumeric.
///
/// # Examples
/// ```
/// use election_harvester::recovery::is_readable;
///
/// assert!(!is_readable("short", 50));
/// assert!(!is_readable(&"-".repeat(80), 50));
/// assert!(is_readable(&"A".repeat(50), 50));
/// ```
#[must_use]
pub fn is_readable(text: &str, min_chars: usize) -> bool {
    let trimmed = text.trim();
    trimmed.chars().count() >= min_chars && trimmed.chars().any(char::is_alphanumeric)
}

/// Turns downloaded artifacts into text.
pub struct TextRecoveryEngine {
    pdf: Box<dyn PdfBackend>,
    ocr: Box<dyn OcrEngine>,
    policy: RecoveryPolicy,
}

impl TextRecoveryEngine {
    #[must_use]
    pub fn new(pdf: Box<dyn PdfBackend>, ocr: Box<dyn OcrEngine>, policy: RecoveryPolicy) -> Self {
        Self { pdf, ocr, policy }
    }

    /// Engine backed by `lopdf`, `pdftoppm` and `tesseract`.
    pub fn with_system_tools(policy: RecoveryPolicy) -> Result<Self> {
        let ocr = TesseractOcr::new(policy.ocr_language.clone())?;
        Ok(Self::new(
            Box::new(SystemPdfBackend::new()),
            Box::new(ocr),
            policy,
        ))
    }

    #[must_use]
    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// Recover text from a downloaded artifact.
    pub fn recover(&self, artifact: &ArtifactRecord) -> TextRecoveryResult {
        let default_method = match artifact.kind {
            ArtifactKind::Image => RecoveryMethod::Ocr,
            _ => RecoveryMethod::DirectExtract,
        };

        if !artifact.is_recoverable() {
            tracing::warn!(
                hierarchy = %artifact.node.path_label(),
                content_type = %artifact.content_type,
                "artifact is not a stored document, skipping text recovery"
            );
            return unreadable(artifact, default_method);
        }

        match self.try_recover(artifact.kind, &artifact.local_path) {
            Ok((text, method)) => {
                let readable = is_readable(&text, self.policy.min_readable_chars);
                TextRecoveryResult {
                    source: artifact.clone(),
                    text: Some(text),
                    method,
                    readable,
                }
            }
            Err(e) => {
                tracing::warn!(
                    hierarchy = %artifact.node.path_label(),
                    path = %artifact.local_path.display(),
                    error = %e,
                    "text recovery failed"
                );
                unreadable(artifact, default_method)
            }
        }
    }

    /// Recover text from a local file without hierarchy context.
    pub fn recover_file(&self, kind: ArtifactKind, path: &Path) -> Result<(String, RecoveryMethod)> {
        self.try_recover(kind, path)
    }

    fn try_recover(&self, kind: ArtifactKind, path: &Path) -> Result<(String, RecoveryMethod)> {
        match kind {
            ArtifactKind::Pdf => self.recover_pdf(path),
            ArtifactKind::Image => {
                // Sniff the format; the stored extension comes from the server.
                let image = image::ImageReader::open(path)?
                    .with_guessed_format()?
                    .decode()?;
                let text = self.ocr_pages(&[image])?;
                Ok((text, RecoveryMethod::Ocr))
            }
            ArtifactKind::Other => Err(HarvesterError::Config(format!(
                "{} is not a PDF or image",
                path.display()
            ))),
        }
    }

    fn recover_pdf(&self, path: &Path) -> Result<(String, RecoveryMethod)> {
        let direct = self.pdf.page_texts(path)?.concat();
        if is_readable(&direct, self.policy.min_readable_chars) {
            return Ok((direct, RecoveryMethod::DirectExtract));
        }

        tracing::info!(
            path = %path.display(),
            chars = direct.trim().chars().count(),
            "direct text extraction insufficient, falling back to OCR"
        );
        let pages = self.pdf.render_pages(path, self.policy.render_dpi)?;
        let text = self.ocr_pages(&pages)?;
        Ok((text, RecoveryMethod::Ocr))
    }

    /// OCR each page; pages that never became readable contribute nothing.
    fn ocr_pages(&self, pages: &[image::DynamicImage]) -> Result<String> {
        let mut text = String::new();
        for (index, page) in pages.iter().enumerate() {
            match ocr::recognize_with_rotation(self.ocr.as_ref(), page, &self.policy)? {
                Some(page_text) => text.push_str(&page_text),
                None => tracing::debug!(page = index + 1, "no readable orientation found"),
            }
        }
        Ok(text)
    }
}

fn unreadable(artifact: &ArtifactRecord, method: RecoveryMethod) -> TextRecoveryResult {
    TextRecoveryResult {
        source: artifact.clone(),
        text: None,
        method,
        readable: false,
    }
}
