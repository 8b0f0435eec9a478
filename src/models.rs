//! Core data models used throughout the review pipeline.
//!
//! These types represent the documents, verdicts, and findings that flow
//! from classification through extraction and analysis into the report.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Coarse document category derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// `.docx` / `.doc`
    WordLike,
    /// `.pdf`
    PdfLike,
    /// `.txt`
    TextLike,
    Other,
}

impl DocumentKind {
    /// Classify a path by its extension (case-insensitive).
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "docx" | "doc" => DocumentKind::WordLike,
            "pdf" => DocumentKind::PdfLike,
            "txt" => DocumentKind::TextLike,
            _ => DocumentKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::WordLike => "word",
            DocumentKind::PdfLike => "pdf",
            DocumentKind::TextLike => "text",
            DocumentKind::Other => "other",
        }
    }
}

/// A discovered file. Identity is the normalized absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub path: PathBuf,
    pub kind: DocumentKind,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let path = std::path::absolute(&path).unwrap_or(path);
        let kind = DocumentKind::from_path(&path);
        Self { path, kind }
    }

    /// File name used for display and as the report key.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// File name without its extension, used to name derived artifacts.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.file_name())
    }
}

/// Why a document needs manual review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    ContainsEmbeddedImage,
    UnsupportedFormat,
    None,
}

impl ReviewReason {
    /// Label written to the review list.
    pub fn label(&self) -> &'static str {
        match self {
            ReviewReason::ContainsEmbeddedImage => "含有圖片",
            ReviewReason::UnsupportedFormat => "疑慮性合約",
            ReviewReason::None => "",
        }
    }
}

/// Per-document classification outcome.
///
/// `ContainsEmbeddedImage` is only ever set for [`DocumentKind::WordLike`];
/// `UnsupportedFormat` only for [`DocumentKind::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassificationVerdict {
    pub needs_conversion: bool,
    pub needs_review: bool,
    pub review_reason: ReviewReason,
}

impl ClassificationVerdict {
    pub fn for_kind(kind: DocumentKind, has_images: bool) -> Self {
        match kind {
            DocumentKind::WordLike => Self {
                needs_conversion: true,
                needs_review: has_images,
                review_reason: if has_images {
                    ReviewReason::ContainsEmbeddedImage
                } else {
                    ReviewReason::None
                },
            },
            DocumentKind::PdfLike | DocumentKind::TextLike => Self {
                needs_conversion: false,
                needs_review: false,
                review_reason: ReviewReason::None,
            },
            DocumentKind::Other => Self {
                needs_conversion: false,
                needs_review: true,
                review_reason: ReviewReason::UnsupportedFormat,
            },
        }
    }
}

/// How text was obtained from a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Direct,
    Ocr,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Direct => "direct",
            ExtractionMethod::Ocr => "ocr",
        }
    }
}

/// Text extracted from one document in one run.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub document: Document,
    pub text: String,
    pub method: ExtractionMethod,
    pub success: bool,
}

/// Free-text output of the language model for one document.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub document: Document,
    pub raw_response: String,
}

/// Risk-bearing lines found in an analysis response.
///
/// An empty `summary_lines` with `suspicious == false` means the document is clean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspicionFinding {
    pub summary_lines: Vec<String>,
    /// Labels of the rules that fired, in rule order.
    pub labels: Vec<String>,
    pub suspicious: bool,
}

/// One row of the persistent report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub filename: String,
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_extension() {
        assert_eq!(
            DocumentKind::from_path(Path::new("a/合同.docx")),
            DocumentKind::WordLike
        );
        assert_eq!(
            DocumentKind::from_path(Path::new("old.DOC")),
            DocumentKind::WordLike
        );
        assert_eq!(
            DocumentKind::from_path(Path::new("scan.pdf")),
            DocumentKind::PdfLike
        );
        assert_eq!(
            DocumentKind::from_path(Path::new("notes.txt")),
            DocumentKind::TextLike
        );
        assert_eq!(
            DocumentKind::from_path(Path::new("photo.jpg")),
            DocumentKind::Other
        );
        assert_eq!(
            DocumentKind::from_path(Path::new("README")),
            DocumentKind::Other
        );
    }

    #[test]
    fn verdict_reasons_follow_kind() {
        let v = ClassificationVerdict::for_kind(DocumentKind::WordLike, true);
        assert!(v.needs_review && v.needs_conversion);
        assert_eq!(v.review_reason, ReviewReason::ContainsEmbeddedImage);

        let v = ClassificationVerdict::for_kind(DocumentKind::WordLike, false);
        assert!(!v.needs_review);
        assert_eq!(v.review_reason, ReviewReason::None);

        // Images are irrelevant outside word documents.
        let v = ClassificationVerdict::for_kind(DocumentKind::PdfLike, true);
        assert!(!v.needs_review);

        let v = ClassificationVerdict::for_kind(DocumentKind::Other, false);
        assert_eq!(v.review_reason, ReviewReason::UnsupportedFormat);
        assert!(!v.needs_conversion);
    }

    #[test]
    fn stem_and_file_name() {
        let doc = Document::new("/tmp/contracts/采购合同.pdf");
        assert_eq!(doc.file_name(), "采购合同.pdf");
        assert_eq!(doc.stem(), "采购合同");
        assert_eq!(doc.kind, DocumentKind::PdfLike);
    }
}
