//! PDF text layer extraction and page rasterization.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use image::DynamicImage;

use crate::error::{HarvesterError, Result};

/// Access to a PDF's text layer and page images.
pub trait PdfBackend: Send + Sync {
    /// Text of every page in order. Pages without a decodable text layer
    /// yield an empty string.
    fn page_texts(&self, path: &Path) -> Result<Vec<String>>;

    /// Rasterize every page in order.
    fn render_pages(&self, path: &Path, dpi: u32) -> Result<Vec<DynamicImage>>;
}

/// `lopdf` for the text layer, poppler's `pdftoppm` for rasterization.
#[derive(Debug, Clone, Default)]
pub struct SystemPdfBackend {
    pdftoppm: Option<PathBuf>,
}

impl SystemPdfBackend {
    /// Look up `pdftoppm` on `PATH`.
    ///
    /// A missing binary only fails once a page actually needs rendering.
    #[must_use]
    pub fn new() -> Self {
        let pdftoppm = which::which("pdftoppm").ok();
        if pdftoppm.is_none() {
            tracing::warn!("pdftoppm not found, OCR fallback for PDFs is disabled");
        }
        Self { pdftoppm }
    }
}

impl PdfBackend for SystemPdfBackend {
    fn page_texts(&self, path: &Path) -> Result<Vec<String>> {
        let document = lopdf::Document::load(path)?;
        let texts = document
            .get_pages()
            .keys()
            .map(|&number| {
                document.extract_text(&[number]).unwrap_or_else(|e| {
                    tracing::debug!(page = number, error = %e, "page has no extractable text");
                    String::new()
                })
            })
            .collect();
        Ok(texts)
    }

    fn render_pages(&self, path: &Path, dpi: u32) -> Result<Vec<DynamicImage>> {
        let binary = self
            .pdftoppm
            .as_ref()
            .ok_or_else(|| HarvesterError::ToolUnavailable("pdftoppm".to_string()))?;

        let scratch = tempfile::tempdir()?;
        let output = Command::new(binary)
            .args(["-r", &dpi.to_string(), "-png"])
            .arg(path)
            .arg(scratch.path().join("page"))
            .output()?;

        if !output.status.success() {
            return Err(HarvesterError::ToolFailed {
                tool: "pdftoppm".to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // pdftoppm zero-pads page numbers, so name order is page order.
        let mut pages: Vec<PathBuf> = fs::read_dir(scratch.path())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
            .collect();
        pages.sort();

        pages
            .iter()
            .map(|page| image::open(page).map_err(HarvesterError::from))
            .collect()
    }
}
