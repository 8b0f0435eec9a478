//! Text extraction for contract documents (PDF, DOCX).
//!
//! PDFs are read page by page from their text layer. When that yields
//! nothing but whitespace the pages are rasterized and run through OCR
//! instead. Word documents are read paragraph by paragraph, one line each.
//! Extraction only ever reads the source file.

use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::config::ExtractionConfig;
use crate::error::ExtractionError;
use crate::models::{Document, DocumentKind, ExtractionMethod, ExtractionResult};
use crate::ocr::{OcrEngine, PageRasterizer, PdftoppmRasterizer, TesseractCli};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Reads the text layer of a PDF, one string per page.
pub trait PdfTextLayer: Send + Sync {
    fn pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractionError>;
}

/// Text layer backed by `pdf-extract`.
pub struct PdfExtractTextLayer;

impl PdfTextLayer for PdfExtractTextLayer {
    fn pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        // pdf-extract panics on some malformed fonts; contain it to this document.
        match catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(bytes)
        })) {
            Ok(Ok(pages)) => Ok(pages),
            Ok(Err(e)) => Err(ExtractionError::Pdf(e.to_string())),
            Err(_) => Err(ExtractionError::Pdf("PDF parser panicked".to_string())),
        }
    }
}

/// Extracts plain text from one document, falling back to OCR for scanned PDFs.
pub struct TextExtractor {
    text_layer: Box<dyn PdfTextLayer>,
    rasterizer: Box<dyn PageRasterizer>,
    ocr: Box<dyn OcrEngine>,
    ocr_language: String,
}

impl TextExtractor {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            text_layer: Box::new(PdfExtractTextLayer),
            rasterizer: Box::new(PdftoppmRasterizer::new(config)),
            ocr: Box::new(TesseractCli::new(config)),
            ocr_language: config.ocr_language.clone(),
        }
    }

    pub fn with_collaborators(
        text_layer: Box<dyn PdfTextLayer>,
        rasterizer: Box<dyn PageRasterizer>,
        ocr: Box<dyn OcrEngine>,
        ocr_language: impl Into<String>,
    ) -> Self {
        Self {
            text_layer,
            rasterizer,
            ocr,
            ocr_language: ocr_language.into(),
        }
    }

    /// Extract text from `document`. Only PDF and Word documents are supported.
    pub fn extract(&self, document: &Document) -> Result<ExtractionResult, ExtractionError> {
        let (text, method) = match document.kind {
            DocumentKind::PdfLike => self.extract_pdf(document)?,
            DocumentKind::WordLike => {
                let bytes = std::fs::read(&document.path)?;
                (extract_docx(&bytes)?, ExtractionMethod::Direct)
            }
            DocumentKind::TextLike | DocumentKind::Other => {
                let ext = document
                    .path
                    .extension()
                    .map(|e| format!(".{}", e.to_string_lossy()))
                    .unwrap_or_else(|| document.file_name());
                return Err(ExtractionError::UnsupportedType(ext));
            }
        };

        Ok(ExtractionResult {
            document: document.clone(),
            text,
            method,
            success: true,
        })
    }

    fn extract_pdf(&self, document: &Document) -> Result<(String, ExtractionMethod), ExtractionError> {
        let bytes = std::fs::read(&document.path)?;
        let direct: String = self.text_layer.pages(&bytes)?.concat();
        if !direct.trim().is_empty() {
            return Ok((direct, ExtractionMethod::Direct));
        }

        tracing::info!(path = %document.path.display(), "PDF has no text layer, using OCR");
        let mut text = String::new();
        for page in self.rasterizer.rasterize(&document.path)? {
            text.push_str(&self.ocr.recognize(&page, &self.ocr_language)?);
        }
        Ok((text, ExtractionMethod::Ocr))
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractionError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractionError::Ooxml(e.to_string()))?;
    let entry = archive.by_name("word/document.xml").map_err(|e| match e {
        zip::result::ZipError::FileNotFound => {
            ExtractionError::Ooxml("word/document.xml not found".to_string())
        }
        other => ExtractionError::Ooxml(other.to_string()),
    })?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractionError::Ooxml(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractionError::Ooxml(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_paragraphs(&doc_xml)
}

/// Paragraph text in document order, each paragraph followed by `\n`.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractionError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    let mut in_run = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"r" => in_run = true,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"r" => in_run = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"p" => out.push('\n'),
                // Tab stops in paragraph properties share the name; only runs count.
                b"tab" if in_run => out.push('\t'),
                b"br" | b"cr" if in_run => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractionError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractionError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct FixedLayer(Vec<&'static str>);

    impl PdfTextLayer for FixedLayer {
        fn pages(&self, _bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
    }

    struct TwoPages(Arc<AtomicUsize>);

    impl PageRasterizer for TwoPages {
        fn rasterize(&self, _pdf: &Path) -> Result<Vec<Vec<u8>>, ExtractionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![b"p1".to_vec(), b"p2".to_vec()])
        }
    }

    /// Echoes the page bytes back with the language hint.
    struct EchoOcr;

    impl OcrEngine for EchoOcr {
        fn recognize(&self, image_png: &[u8], lang: &str) -> Result<String, ExtractionError> {
            Ok(format!("[{}:{}]", lang, String::from_utf8_lossy(image_png)))
        }
    }

    fn extractor(pages: Vec<&'static str>, raster_calls: Arc<AtomicUsize>) -> TextExtractor {
        TextExtractor::with_collaborators(
            Box::new(FixedLayer(pages)),
            Box::new(TwoPages(raster_calls)),
            Box::new(EchoOcr),
            "chi_sim+eng",
        )
    }

    fn write(dir: &TempDir, name: &str, bytes: &[u8]) -> Document {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        Document::new(path)
    }

    fn docx_with_body(body: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file(
                "word/document.xml",
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn pdf_with_text_layer_is_direct() {
        let tmp = TempDir::new().unwrap();
        let doc = write(&tmp, "a.pdf", b"%PDF");
        let calls = Arc::new(AtomicUsize::new(0));
        let result = extractor(vec!["第一页", "第二页"], calls.clone())
            .extract(&doc)
            .unwrap();
        assert_eq!(result.text, "第一页第二页");
        assert_eq!(result.method, ExtractionMethod::Direct);
        assert!(result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn blank_text_layer_falls_back_to_ocr() {
        let tmp = TempDir::new().unwrap();
        let doc = write(&tmp, "scan.pdf", b"%PDF");
        let calls = Arc::new(AtomicUsize::new(0));
        let result = extractor(vec!["  \n", "\t"], calls.clone())
            .extract(&doc)
            .unwrap();
        assert_eq!(result.method, ExtractionMethod::Ocr);
        assert_eq!(result.text, "[chi_sim+eng:p1][chi_sim+eng:p2]");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pdf_without_pages_falls_back_to_ocr() {
        let tmp = TempDir::new().unwrap();
        let doc = write(&tmp, "scan.pdf", b"%PDF");
        let result = extractor(vec![], Arc::new(AtomicUsize::new(0)))
            .extract(&doc)
            .unwrap();
        assert_eq!(result.method, ExtractionMethod::Ocr);
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = PdfExtractTextLayer.pages(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractionError::Pdf(_)));
    }

    #[test]
    fn docx_paragraphs_one_per_line() {
        let tmp = TempDir::new().unwrap();
        let body = "<w:p><w:pPr><w:tabs><w:tab w:val=\"left\" w:pos=\"720\"/></w:tabs></w:pPr>\
                    <w:r><w:t xml:space=\"preserve\">甲方： </w:t></w:r><w:r><w:t>A公司</w:t></w:r></w:p>\
                    <w:p/>\
                    <w:p><w:r><w:t>金额</w:t><w:tab/><w:t>100 &amp; 13%</w:t></w:r></w:p>";
        let doc = write(&tmp, "c.docx", &docx_with_body(body));
        let calls = Arc::new(AtomicUsize::new(0));
        let result = extractor(vec![], calls).extract(&doc).unwrap();
        assert_eq!(result.text, "甲方： A公司\n\n金额\t100 & 13%\n");
        assert_eq!(result.method, ExtractionMethod::Direct);
    }

    #[test]
    fn docx_without_document_part_is_an_error() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        let err = extract_docx(&buf).unwrap_err();
        assert!(matches!(err, ExtractionError::Ooxml(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_docx(b"not a zip").unwrap_err();
        assert!(matches!(err, ExtractionError::Ooxml(_)));
    }

    #[test]
    fn other_kinds_are_unsupported() {
        let tmp = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let ex = extractor(vec![], calls);
        for name in ["notes.txt", "sheet.xlsx"] {
            let doc = write(&tmp, name, b"x");
            let err = ex.extract(&doc).unwrap_err();
            assert!(matches!(err, ExtractionError::UnsupportedType(_)));
        }
    }

    #[test]
    fn extraction_leaves_source_untouched() {
        let tmp = TempDir::new().unwrap();
        let bytes = docx_with_body("<w:p><w:r><w:t>x</w:t></w:r></w:p>");
        let doc = write(&tmp, "c.docx", &bytes);
        extractor(vec![], Arc::new(AtomicUsize::new(0)))
            .extract(&doc)
            .unwrap();
        assert_eq!(std::fs::read(&doc.path).unwrap(), bytes);
    }
}
