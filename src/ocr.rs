//! OCR collaborators used when a PDF has no text layer.
//!
//! Two seams: a [`PageRasterizer`] that turns every page of a PDF into an
//! image, and an [`OcrEngine`] that reads text back out of one image. The
//! default implementations shell out to poppler's `pdftoppm` and the
//! `tesseract` CLI.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::ExtractionConfig;
use crate::error::ExtractionError;

/// Rasterizes a PDF into one PNG per page, in page order.
pub trait PageRasterizer: Send + Sync {
    fn rasterize(&self, pdf: &Path) -> Result<Vec<Vec<u8>>, ExtractionError>;
}

/// Recognizes text in a single page image.
pub trait OcrEngine: Send + Sync {
    /// `lang` is a tesseract-style hint such as `"chi_sim+eng"`.
    fn recognize(&self, image_png: &[u8], lang: &str) -> Result<String, ExtractionError>;
}

/// `pdftoppm -png -r <dpi>` into a scratch directory.
pub struct PdftoppmRasterizer {
    program: String,
    dpi: u32,
}

impl PdftoppmRasterizer {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            program: config.pdftoppm_bin.clone(),
            dpi: config.ocr_dpi,
        }
    }
}

impl PageRasterizer for PdftoppmRasterizer {
    fn rasterize(&self, pdf: &Path) -> Result<Vec<Vec<u8>>, ExtractionError> {
        let scratch = tempfile::TempDir::new()?;
        let prefix = scratch.path().join("page");

        let output = Command::new(&self.program)
            .arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(pdf)
            .arg(&prefix)
            .output()
            .map_err(|e| ExtractionError::Rasterize(format!("{}: {}", self.program, e)))?;
        if !output.status.success() {
            return Err(ExtractionError::Rasterize(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let mut pages: Vec<(u32, PathBuf)> = std::fs::read_dir(scratch.path())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter_map(|path| page_number(&path).map(|n| (n, path)))
            .collect();
        pages.sort_by_key(|(n, _)| *n);

        tracing::debug!(pdf = %pdf.display(), pages = pages.len(), "rasterized PDF");

        pages
            .into_iter()
            .map(|(_, path)| std::fs::read(path).map_err(ExtractionError::from))
            .collect()
    }
}

/// `page-1.png`, `page-01.png`, ... → page number. pdftoppm zero-pads by page count.
fn page_number(path: &Path) -> Option<u32> {
    if path.extension()?.to_str()? != "png" {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    stem.strip_prefix("page-")?.parse().ok()
}

/// The `tesseract` command-line engine reading from a temp image file.
pub struct TesseractCli {
    program: String,
}

impl TesseractCli {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            program: config.tesseract_bin.clone(),
        }
    }
}

impl OcrEngine for TesseractCli {
    fn recognize(&self, image_png: &[u8], lang: &str) -> Result<String, ExtractionError> {
        let scratch = tempfile::TempDir::new()?;
        let image = scratch.path().join("page.png");
        std::fs::write(&image, image_png)?;

        let output = Command::new(&self.program)
            .arg(&image)
            .arg("stdout")
            .arg("-l")
            .arg(lang)
            .output()
            .map_err(|e| ExtractionError::Ocr(format!("{}: {}", self.program, e)))?;
        if !output.status.success() {
            return Err(ExtractionError::Ocr(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
