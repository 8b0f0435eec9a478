//! Review pipeline orchestration.
//!
//! Coordinates the full run: classify → convert Word → extract → analyze →
//! detect → report. Documents are handled strictly one after another. A
//! failure in extraction or analysis ends that document only; a failure to
//! write the report ends the run, since a flagged contract must never be
//! silently dropped.
//!
//! Consecutive model calls are separated by a fixed blocking delay
//! ([`RateLimiter`]) to stay inside the service's rate limit.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis::FieldExtractor;
use crate::classify::{classify_folder, write_review_list};
use crate::config::{AuditConfig, Config, ScanConfig};
use crate::convert::{convert_batch, DocumentConverter};
use crate::extract::TextExtractor;
use crate::models::{Document, DocumentKind, ReportEntry};
use crate::progress::{NoProgress, PipelineEvent, ProgressReporter};
use crate::report::ReportStore;
use crate::suspicion::RuleSet;

/// Enforces a fixed pause between consecutive calls.
///
/// The first call goes through immediately. Every later call waits the full
/// delay, regardless of how long the previous document took.
#[derive(Debug)]
pub struct RateLimiter {
    min_delay: Duration,
    calls: u64,
}

impl RateLimiter {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            calls: 0,
        }
    }

    /// Delay the next call will wait, if any.
    pub fn pending_delay(&self) -> Option<Duration> {
        if self.calls == 0 || self.min_delay.is_zero() {
            None
        } else {
            Some(self.min_delay)
        }
    }

    /// Block until the next call may go out.
    pub async fn acquire(&mut self) {
        if let Some(delay) = self.pending_delay() {
            tokio::time::sleep(delay).await;
        }
        self.calls += 1;
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

/// What happened to the Word → PDF step of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionState {
    /// Not a Word document.
    NotNeeded,
    /// Conversion turned off for this run.
    Skipped,
    Converted(PathBuf),
    Failed(String),
}

/// Terminal state of one analyzed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentState {
    Flagged { summary: String },
    Clean,
    ExtractionFailed(String),
    AnalysisFailed(String),
}

#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    pub document: Document,
    pub conversion: ConversionState,
    pub state: DocumentState,
}

/// Knobs chosen per invocation rather than in the config file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Skip the office-automation step and read Word files directly.
    pub no_convert: bool,
    /// Analyze at most this many documents.
    pub limit: Option<usize>,
    /// Also write the dated review list of flagged files.
    pub review_list: bool,
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub classified: usize,
    pub needs_review: usize,
    pub skipped: usize,
    pub converted: usize,
    pub conversion_failed: usize,
    pub analyzed: usize,
    pub flagged: usize,
    pub failed: usize,
    /// Set when at least one entry was written this run.
    pub report_path: Option<PathBuf>,
    pub review_list: Option<PathBuf>,
    pub outcomes: Vec<DocumentOutcome>,
}

impl RunSummary {
    /// Final stdout summary.
    pub fn print(&self) {
        println!("classified: {}", self.classified);
        println!("  needs review: {}", self.needs_review);
        if self.skipped > 0 {
            println!("  unreadable: {}", self.skipped);
        }
        if let Some(path) = &self.review_list {
            println!("  review list: {}", path.display());
        }
        println!("converted: {}", self.converted);
        if self.conversion_failed > 0 {
            println!("  conversion failed: {}", self.conversion_failed);
        }
        println!("analyzed: {}", self.analyzed);
        println!("flagged: {}", self.flagged);
        println!("failed: {}", self.failed);
        if let Some(path) = &self.report_path {
            println!("report: {}", path.display());
        }
        println!("ok");
    }
}

/// Sequential document review over one folder.
pub struct Pipeline {
    scan: ScanConfig,
    extractor: TextExtractor,
    analyzer: Box<dyn FieldExtractor>,
    rules: RuleSet,
    converter: Box<dyn DocumentConverter>,
    conversion_dir: PathBuf,
    restart_every: usize,
    store: ReportStore,
    review_list_dir: PathBuf,
    audit: AuditConfig,
    limiter: RateLimiter,
    reporter: Box<dyn ProgressReporter>,
}

impl Pipeline {
    /// Build a pipeline from configuration around an already-credentialed analyzer.
    pub fn new(config: &Config, analyzer: Box<dyn FieldExtractor>) -> Self {
        Self {
            scan: config.scan.clone(),
            extractor: TextExtractor::from_config(&config.extraction),
            analyzer,
            rules: RuleSet::from_config(&config.suspicion),
            converter: crate::convert::create_converter(&config.conversion),
            conversion_dir: config.conversion.output_dir.clone(),
            restart_every: config.conversion.restart_every,
            store: ReportStore::new(&config.report.path),
            review_list_dir: config.report.review_list_dir.clone(),
            audit: config.audit.clone(),
            limiter: RateLimiter::new(Duration::from_secs(config.analysis.min_delay_secs)),
            reporter: Box::new(NoProgress),
        }
    }

    pub fn with_extractor(mut self, extractor: TextExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_converter(mut self, converter: Box<dyn DocumentConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_min_delay(mut self, delay: Duration) -> Self {
        self.limiter = RateLimiter::new(delay);
        self
    }

    pub fn with_reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Review every document under `root`.
    pub async fn run(&mut self, root: &Path, options: &RunOptions) -> Result<RunSummary> {
        // Refuse to start if the existing report cannot be appended to.
        self.store.load().with_context(|| {
            format!("Report is not usable: {}", self.store.path().display())
        })?;

        self.reporter.report(PipelineEvent::Discovering {
            root: root.display().to_string(),
        });
        let classification = classify_folder(root, &self.scan)?;

        let mut summary = RunSummary {
            classified: classification.all_files.len(),
            needs_review: classification.image_files.len() + classification.unsupported_files.len(),
            skipped: classification.skipped.len(),
            ..RunSummary::default()
        };
        self.reporter.report(PipelineEvent::Classified {
            total: summary.classified as u64,
            flagged: summary.needs_review as u64,
        });

        if options.review_list {
            let today = chrono::Local::now().date_naive();
            summary.review_list =
                write_review_list(&classification, &self.review_list_dir, today)
                    .context("Failed to write review list")?;
        }

        // Word → PDF. Failed or skipped documents fall back to direct reading.
        let mut pdfs: HashMap<PathBuf, PathBuf> = HashMap::new();
        let mut conversion_errors: HashMap<PathBuf, String> = HashMap::new();
        if !options.no_convert {
            let candidates = classification.conversion_candidates();
            let converted = convert_batch(
                self.converter.as_mut(),
                root,
                &candidates,
                &self.conversion_dir,
                self.restart_every,
                self.reporter.as_ref(),
            );
            summary.converted = converted.converted.len();
            summary.conversion_failed = converted.failed.len();
            for (document, pdf) in converted.converted {
                pdfs.insert(document.path, pdf);
            }
            for (document, error) in converted.failed {
                conversion_errors.insert(document.path, error);
            }
        }

        let mut targets: Vec<&Document> = classification
            .all_files
            .iter()
            .map(|c| &c.document)
            .filter(|d| matches!(d.kind, DocumentKind::WordLike | DocumentKind::PdfLike))
            .collect();
        if let Some(limit) = options.limit {
            targets.truncate(limit);
        }

        let total = targets.len() as u64;
        for (i, document) in targets.into_iter().enumerate() {
            self.reporter.report(PipelineEvent::Processing {
                n: i as u64 + 1,
                total,
                file: document.file_name(),
            });

            let conversion = if document.kind != DocumentKind::WordLike {
                ConversionState::NotNeeded
            } else if options.no_convert {
                ConversionState::Skipped
            } else if let Some(pdf) = pdfs.get(&document.path) {
                ConversionState::Converted(pdf.clone())
            } else {
                ConversionState::Failed(
                    conversion_errors
                        .get(&document.path)
                        .cloned()
                        .unwrap_or_default(),
                )
            };

            let state = self.process(document, &conversion).await?;
            match &state {
                DocumentState::Flagged { .. } => {
                    summary.analyzed += 1;
                    summary.flagged += 1;
                    summary.report_path = Some(self.store.path().to_path_buf());
                }
                DocumentState::Clean => summary.analyzed += 1,
                DocumentState::ExtractionFailed(_) | DocumentState::AnalysisFailed(_) => {
                    summary.failed += 1
                }
            }
            summary.outcomes.push(DocumentOutcome {
                document: document.clone(),
                conversion,
                state,
            });
        }

        Ok(summary)
    }

    /// Carry one document through extract → analyze → detect → report.
    ///
    /// Only a report write failure is returned as an error.
    async fn process(
        &mut self,
        document: &Document,
        conversion: &ConversionState,
    ) -> Result<DocumentState> {
        let source = match conversion {
            ConversionState::Converted(pdf) => Document::new(pdf),
            _ => document.clone(),
        };

        let extraction = match self.extractor.extract(&source) {
            Ok(extraction) => extraction,
            Err(e) => {
                tracing::warn!(path = %source.path.display(), error = %e, "extraction failed");
                return Ok(DocumentState::ExtractionFailed(e.to_string()));
            }
        };
        tracing::info!(
            file = %document.file_name(),
            method = extraction.method.as_str(),
            chars = extraction.text.chars().count(),
            "extracted text"
        );
        self.write_audit(&self.audit.text_dir, document, &extraction.text);

        if let Some(delay) = self.limiter.pending_delay() {
            self.reporter.report(PipelineEvent::Waiting {
                secs: delay.as_secs(),
            });
        }
        self.limiter.acquire().await;

        let raw = match self.analyzer.analyze(&extraction.text).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(path = %document.path.display(), error = %e, "analysis failed");
                return Ok(DocumentState::AnalysisFailed(e.to_string()));
            }
        };
        self.write_audit(&self.audit.result_dir, document, &raw);

        let finding = self.rules.detect(&raw);
        if !finding.suspicious {
            tracing::info!(file = %document.file_name(), "no suspicious passage");
            return Ok(DocumentState::Clean);
        }

        let summary = finding.summary();
        self.store
            .append(ReportEntry {
                filename: document.file_name(),
                summary: summary.clone(),
            })
            .with_context(|| format!("Failed to record finding for {}", document.file_name()))?;
        tracing::info!(file = %document.file_name(), rules = ?finding.labels, "flagged");
        self.reporter.report(PipelineEvent::Flagged {
            file: document.file_name(),
        });

        Ok(DocumentState::Flagged { summary })
    }

    /// Audit files are best effort; a failure only costs the artifact.
    fn write_audit(&self, dir: &Path, document: &Document, content: &str) {
        if !self.audit.enabled {
            return;
        }
        if let Err(e) = write_artifact(dir, &document.stem(), content) {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to write audit file");
        }
    }
}

/// Write `<dir>/<stem>.txt`, creating `dir` as needed.
pub fn write_artifact(dir: &Path, stem: &str, content: &str) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.txt", stem));
    std::fs::write(&path, content)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AnalysisError, ConversionError, ExtractionError};
    use crate::extract::PdfTextLayer;
    use crate::ocr::{OcrEngine, PageRasterizer};
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;
    use tempfile::TempDir;

    /// Returns the file's raw bytes as its only page.
    struct RawLayer;

    impl PdfTextLayer for RawLayer {
        fn pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
            Ok(vec![String::from_utf8_lossy(bytes).to_string()])
        }
    }

    struct NoPages;

    impl PageRasterizer for NoPages {
        fn rasterize(&self, _pdf: &Path) -> Result<Vec<Vec<u8>>, ExtractionError> {
            Err(ExtractionError::Rasterize("no rasterizer in tests".to_string()))
        }
    }

    struct NoOcr;

    impl OcrEngine for NoOcr {
        fn recognize(&self, _image_png: &[u8], _lang: &str) -> Result<String, ExtractionError> {
            Err(ExtractionError::Ocr("no OCR in tests".to_string()))
        }
    }

    /// Answers by keyword in the contract text; fails on "服务不可用".
    struct ScriptedAnalyzer {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FieldExtractor for ScriptedAnalyzer {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn analyze(&self, text: &str) -> Result<String, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.contains("服务不可用") {
                return Err(AnalysisError::Service {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            if text.contains("未约定回款") {
                Ok("1. 需方：A公司\n5. 不存在预开发票风险\n6. 开口合同".to_string())
            } else {
                Ok("1. 需方：B公司\n5. 没有预开发票风险\n6. 闭口合同".to_string())
            }
        }
    }

    struct NeverConverts;

    impl DocumentConverter for NeverConverts {
        fn name(&self) -> &str {
            "never"
        }

        fn convert(&mut self, _source: &Path, _dest_dir: &Path) -> Result<PathBuf, ConversionError> {
            Err(ConversionError::Disabled)
        }
    }

    /// Writes the source's parent folder name as the PDF text.
    struct FolderStamp;

    impl DocumentConverter for FolderStamp {
        fn name(&self) -> &str {
            "stamp"
        }

        fn convert(&mut self, source: &Path, dest_dir: &Path) -> Result<PathBuf, ConversionError> {
            let folder = source.parent().unwrap().file_name().unwrap().to_string_lossy().to_string();
            let pdf = crate::convert::pdf_destination(source, dest_dir);
            std::fs::write(&pdf, format!("from {}", folder)).unwrap();
            Ok(pdf)
        }
    }

    /// Records every text it is asked to analyze.
    struct RecordingAnalyzer {
        texts: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl FieldExtractor for RecordingAnalyzer {
        fn model_name(&self) -> &str {
            "recording"
        }

        async fn analyze(&self, text: &str) -> Result<String, AnalysisError> {
            self.texts.lock().unwrap().push(text.to_string());
            Ok("6. 闭口合同".to_string())
        }
    }

    fn config(out: &Path) -> Config {
        let mut config = Config::minimal();
        config.report.path = out.join("report.csv");
        config.report.review_list_dir = out.to_path_buf();
        config.conversion.output_dir = out.join("pdf");
        config.audit.text_dir = out.join("txt");
        config.audit.result_dir = out.join("result");
        config
    }

    fn pipeline(out: &Path, calls: Arc<AtomicUsize>) -> Pipeline {
        Pipeline::new(&config(out), Box::new(ScriptedAnalyzer { calls }))
            .with_extractor(TextExtractor::with_collaborators(
                Box::new(RawLayer),
                Box::new(NoPages),
                Box::new(NoOcr),
                "chi_sim+eng",
            ))
            .with_converter(Box::new(NeverConverts))
            .with_min_delay(Duration::ZERO)
    }

    fn docx(paragraph: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("word/_rels/document.xml.rels", options).unwrap();
            zip.write_all(br#"<?xml version="1.0"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"></Relationships>"#).unwrap();
            zip.start_file("word/document.xml", options).unwrap();
            let xml = format!(
                r#"<?xml version="1.0"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>"#,
                paragraph
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    fn fixture() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("contracts");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a_open.pdf"), "付款：未约定回款时间").unwrap();
        std::fs::write(dir.join("b_closed.pdf"), "付款：发货后30日内付清").unwrap();
        std::fs::write(dir.join("c_down.pdf"), "服务不可用").unwrap();
        std::fs::write(dir.join("d_notes.txt"), "not a contract").unwrap();
        std::fs::write(dir.join("e_photo.jpg"), [0xffu8, 0xd8]).unwrap();
        std::fs::write(dir.join(".DS_Store"), "meta").unwrap();
        tmp
    }

    #[tokio::test]
    async fn run_flags_only_suspicious_documents() {
        let tmp = fixture();
        let out = tmp.path().join("out");
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pipeline = pipeline(&out, calls.clone());

        let summary = pipeline
            .run(&tmp.path().join("contracts"), &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.classified, 5);
        assert_eq!(summary.needs_review, 1);
        assert_eq!(summary.analyzed, 2);
        assert_eq!(summary.flagged, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let rows = ReportStore::new(out.join("report.csv")).load().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].filename, "a_open.pdf");
        assert_eq!(rows[0].summary, "6. 开口合同");
        assert_eq!(summary.report_path, Some(out.join("report.csv")));

        let states: Vec<&DocumentState> = summary.outcomes.iter().map(|o| &o.state).collect();
        assert!(matches!(states[0], DocumentState::Flagged { .. }));
        assert_eq!(states[1], &DocumentState::Clean);
        assert!(matches!(states[2], DocumentState::AnalysisFailed(_)));
    }

    #[tokio::test]
    async fn clean_run_writes_no_report() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("contracts");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("closed.pdf"), "付款：发货后30日内付清").unwrap();
        let out = tmp.path().join("out");

        let summary = pipeline(&out, Arc::new(AtomicUsize::new(0)))
            .run(&dir, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.flagged, 0);
        assert!(summary.report_path.is_none());
        assert!(!out.join("report.csv").exists());
    }

    #[tokio::test]
    async fn rerun_duplicates_findings() {
        let tmp = fixture();
        let out = tmp.path().join("out");
        let root = tmp.path().join("contracts");
        for _ in 0..2 {
            pipeline(&out, Arc::new(AtomicUsize::new(0)))
                .run(&root, &RunOptions::default())
                .await
                .unwrap();
        }
        let rows = ReportStore::new(out.join("report.csv")).load().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], rows[1]);
    }

    #[tokio::test]
    async fn extraction_failure_skips_analysis() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("contracts");
        std::fs::create_dir_all(&dir).unwrap();
        // Blank text layer and no OCR available.
        std::fs::write(dir.join("a_scanned.pdf"), "  \n ").unwrap();
        std::fs::write(dir.join("b_ok.pdf"), "未约定回款").unwrap();
        let out = tmp.path().join("out");
        let calls = Arc::new(AtomicUsize::new(0));

        let summary = pipeline(&out, calls.clone())
            .run(&dir, &RunOptions::default())
            .await
            .unwrap();

        assert!(matches!(
            summary.outcomes[0].state,
            DocumentState::ExtractionFailed(_)
        ));
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.flagged, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreadable_word_file_never_reaches_analysis() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("contracts");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("broken.docx"), "not a zip").unwrap();
        let out = tmp.path().join("out");
        let calls = Arc::new(AtomicUsize::new(0));

        let summary = pipeline(&out, calls.clone())
            .run(&dir, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.classified, 0);
        assert!(summary.outcomes.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_conversion_falls_back_to_word_text() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("contracts");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("c.docx"), docx("未约定回款")).unwrap();
        let out = tmp.path().join("out");

        let summary = pipeline(&out, Arc::new(AtomicUsize::new(0)))
            .run(&dir, &RunOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.conversion_failed, 1);
        let outcome = &summary.outcomes[0];
        assert!(matches!(outcome.conversion, ConversionState::Failed(_)));
        assert!(matches!(outcome.state, DocumentState::Flagged { .. }));
        assert_eq!(
            std::fs::read_to_string(out.join("txt/c.txt")).unwrap(),
            "未约定回款\n"
        );
    }

    #[tokio::test]
    async fn same_named_word_files_in_subfolders_keep_their_own_text() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("contracts");
        for folder in ["alpha", "beta"] {
            std::fs::create_dir_all(dir.join(folder)).unwrap();
            std::fs::write(dir.join(folder).join("合同.docx"), docx("x")).unwrap();
        }
        let out = tmp.path().join("out");
        let texts = Arc::new(std::sync::Mutex::new(Vec::new()));

        let summary = Pipeline::new(
            &config(&out),
            Box::new(RecordingAnalyzer {
                texts: texts.clone(),
            }),
        )
        .with_extractor(TextExtractor::with_collaborators(
            Box::new(RawLayer),
            Box::new(NoPages),
            Box::new(NoOcr),
            "chi_sim+eng",
        ))
        .with_converter(Box::new(FolderStamp))
        .with_min_delay(Duration::ZERO)
        .run(&dir, &RunOptions::default())
        .await
        .unwrap();

        assert_eq!(summary.converted, 2);
        assert_eq!(*texts.lock().unwrap(), vec!["from alpha", "from beta"]);
        assert!(out.join("pdf/alpha/合同.pdf").is_file());
        assert!(out.join("pdf/beta/合同.pdf").is_file());
    }

    #[tokio::test]
    async fn binary_doc_is_converted_and_analyzed() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("contracts");
        std::fs::create_dir_all(&dir).unwrap();
        let mut ole = vec![0xd0, 0xcf, 0x11, 0xe0, 0xa1, 0xb1, 0x1a, 0xe1];
        ole.resize(512, 0);
        std::fs::write(dir.join("old.doc"), ole).unwrap();
        let out = tmp.path().join("out");
        let texts = Arc::new(std::sync::Mutex::new(Vec::new()));

        let summary = Pipeline::new(
            &config(&out),
            Box::new(RecordingAnalyzer {
                texts: texts.clone(),
            }),
        )
        .with_extractor(TextExtractor::with_collaborators(
            Box::new(RawLayer),
            Box::new(NoPages),
            Box::new(NoOcr),
            "chi_sim+eng",
        ))
        .with_converter(Box::new(FolderStamp))
        .with_min_delay(Duration::ZERO)
        .run(&dir, &RunOptions::default())
        .await
        .unwrap();

        assert_eq!(summary.classified, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.converted, 1);
        assert_eq!(summary.analyzed, 1);
        assert_eq!(*texts.lock().unwrap(), vec!["from contracts"]);
    }

    #[tokio::test]
    async fn limit_caps_analyzed_documents() {
        let tmp = fixture();
        let out = tmp.path().join("out");
        let calls = Arc::new(AtomicUsize::new(0));
        let options = RunOptions {
            limit: Some(1),
            ..RunOptions::default()
        };

        let summary = pipeline(&out, calls.clone())
            .run(&tmp.path().join("contracts"), &options)
            .await
            .unwrap();

        assert_eq!(summary.outcomes.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn audit_artifacts_written_per_document() {
        let tmp = fixture();
        let out = tmp.path().join("out");

        pipeline(&out, Arc::new(AtomicUsize::new(0)))
            .run(&tmp.path().join("contracts"), &RunOptions::default())
            .await
            .unwrap();

        let text = std::fs::read_to_string(out.join("txt/a_open.txt")).unwrap();
        assert_eq!(text, "付款：未约定回款时间");
        let result = std::fs::read_to_string(out.join("result/a_open.txt")).unwrap();
        assert!(result.contains("开口合同"));
        // Analysis failed, so only the extracted text exists.
        assert!(out.join("txt/c_down.txt").is_file());
        assert!(!out.join("result/c_down.txt").exists());
    }

    #[tokio::test]
    async fn review_list_on_request() {
        let tmp = fixture();
        let out = tmp.path().join("out");
        let options = RunOptions {
            review_list: true,
            ..RunOptions::default()
        };

        let summary = pipeline(&out, Arc::new(AtomicUsize::new(0)))
            .run(&tmp.path().join("contracts"), &options)
            .await
            .unwrap();

        let path = summary.review_list.unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("e_photo.jpg,疑慮性合約,FALSE"));
    }

    #[tokio::test]
    async fn corrupt_report_is_fatal_before_any_call() {
        let tmp = fixture();
        let out = tmp.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("report.csv"), "a,b,c\n").unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = pipeline(&out, calls.clone())
            .run(&tmp.path().join("contracts"), &RunOptions::default())
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rate_limiter_skips_first_call() {
        let limiter = RateLimiter::new(Duration::from_secs(40));
        assert_eq!(limiter.pending_delay(), None);
        assert_eq!(RateLimiter::new(Duration::ZERO).pending_delay(), None);
    }

    #[tokio::test]
    async fn rate_limiter_waits_between_calls() {
        let mut limiter = RateLimiter::new(Duration::from_millis(30));
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(30));
        assert_eq!(limiter.pending_delay(), Some(Duration::from_millis(30)));
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert_eq!(limiter.calls(), 3);
    }
}
