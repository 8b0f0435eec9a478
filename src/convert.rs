//! Word → PDF conversion through a host office-automation bridge.
//!
//! [`DocumentConverter`] is the only thing the pipeline knows about. Each
//! host gets its own variant:
//!
//! | Backend | Mechanism |
//! |---------|-----------|
//! | `word-windows` | Word COM automation driven from PowerShell |
//! | `word-macos` | Word scripted through `osascript` |
//! | `libreoffice` | `soffice --headless --convert-to pdf` |
//! | `disabled` | always fails with [`ConversionError::Disabled`] |
//!
//! Automation bridges hold one document at a time and leak memory over long
//! batches, so a [`ConversionSession`] resets the converter every
//! `restart_every` documents.
//!
//! Converted files mirror the source tree under the output directory, so
//! `alpha/合同.docx` and `beta/合同.docx` never share a PDF. Sources with the
//! same stem in one folder (`合同.doc` next to `合同.docx`) get a subfolder
//! named after their extension.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::config::ConversionConfig;
use crate::error::ConversionError;
use crate::models::Document;
use crate::progress::{PipelineEvent, ProgressReporter};

/// Converts one source document into a PDF inside `dest_dir`.
pub trait DocumentConverter: Send {
    fn name(&self) -> &str;

    /// Called once before the first document of a batch.
    fn prepare(&mut self) -> Result<(), ConversionError> {
        Ok(())
    }

    /// Convert `source`, returning the path of the written PDF.
    fn convert(&mut self, source: &Path, dest_dir: &Path) -> Result<PathBuf, ConversionError>;

    /// Release and restart the automation host.
    fn reset(&mut self) -> Result<(), ConversionError> {
        Ok(())
    }

    /// Called once after the last document of a batch.
    fn finish(&mut self) {}
}

/// Destination of a converted document: same stem, `.pdf` extension.
pub fn pdf_destination(source: &Path, dest_dir: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "document".to_string());
    dest_dir.join(format!("{}.pdf", stem))
}

/// Build the converter named by `conversion.backend`.
pub fn create_converter(config: &ConversionConfig) -> Box<dyn DocumentConverter> {
    match config.backend.as_str() {
        "word-windows" => Box::new(WordWindowsConverter),
        "word-macos" => Box::new(WordMacConverter::default()),
        "libreoffice" => Box::new(LibreOfficeConverter::new(&config.soffice_bin)),
        "disabled" => Box::new(DisabledConverter),
        _ => {
            if cfg!(target_os = "windows") {
                Box::new(WordWindowsConverter)
            } else if cfg!(target_os = "macos") {
                Box::new(WordMacConverter::default())
            } else {
                Box::new(LibreOfficeConverter::new(&config.soffice_bin))
            }
        }
    }
}

// ============ Session ============

/// Counts and totals for one conversion batch.
#[derive(Debug, Default, Clone)]
pub struct ConversionSummary {
    pub converted: Vec<(Document, PathBuf)>,
    pub failed: Vec<(Document, String)>,
}

impl ConversionSummary {
    pub fn total(&self) -> usize {
        self.converted.len() + self.failed.len()
    }
}

/// Drives a converter over a batch and resets it on a fixed cadence.
pub struct ConversionSession<'a> {
    converter: &'a mut dyn DocumentConverter,
    dest_dir: PathBuf,
    root: Option<PathBuf>,
    restart_every: usize,
    processed: usize,
    prepared: bool,
    claimed: HashSet<PathBuf>,
}

impl<'a> ConversionSession<'a> {
    pub fn new(
        converter: &'a mut dyn DocumentConverter,
        dest_dir: impl Into<PathBuf>,
        restart_every: usize,
    ) -> Self {
        Self {
            converter,
            dest_dir: dest_dir.into(),
            root: None,
            restart_every: restart_every.max(1),
            processed: 0,
            prepared: false,
            claimed: HashSet::new(),
        }
    }

    /// Mirror each source's folder relative to `root` under the output directory.
    pub fn with_root(mut self, root: &Path) -> Self {
        self.root = Some(std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf()));
        self
    }

    /// Folder the converter writes `source` into, unique within this batch.
    pub fn destination_dir(&mut self, source: &Path) -> PathBuf {
        let relative = match (&self.root, source.parent()) {
            (Some(root), Some(parent)) => parent.strip_prefix(root).ok(),
            _ => None,
        };
        let base = match relative {
            Some(rel) if !rel.as_os_str().is_empty() => self.dest_dir.join(rel),
            _ => self.dest_dir.clone(),
        };

        let ext = source
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_else(|| "source".to_string());
        let mut dir = base.clone();
        let mut n = 1;
        while self.claimed.contains(&pdf_destination(source, &dir)) {
            dir = if n == 1 {
                base.join(&ext)
            } else {
                base.join(format!("{}-{}", ext, n))
            };
            n += 1;
        }
        self.claimed.insert(pdf_destination(source, &dir));
        dir
    }

    /// Create the destination folder and clear a PDF left by an earlier run,
    /// so a converter that writes nothing cannot pass on a stale file.
    fn prepare_destination(&mut self, source: &Path) -> Result<PathBuf, ConversionError> {
        let dir = self.destination_dir(source);
        std::fs::create_dir_all(&dir)?;
        let stale = pdf_destination(source, &dir);
        if stale.is_file() {
            std::fs::remove_file(&stale)?;
        }
        Ok(dir)
    }

    pub fn converter_name(&self) -> &str {
        self.converter.name()
    }

    /// Convert one document. Failures are counted toward the restart cadence too.
    pub fn convert(&mut self, document: &Document) -> Result<PathBuf, ConversionError> {
        if !self.prepared {
            std::fs::create_dir_all(&self.dest_dir)?;
            if let Err(e) = self.converter.prepare() {
                tracing::warn!(converter = self.converter.name(), error = %e, "converter prepare failed");
            }
            self.prepared = true;
        }

        let result = match self.prepare_destination(&document.path) {
            Ok(dir) => self.converter.convert(&document.path, &dir),
            Err(e) => Err(e),
        };
        self.processed += 1;

        if self.processed % self.restart_every == 0 {
            tracing::debug!(
                converter = self.converter.name(),
                processed = self.processed,
                "restarting converter"
            );
            if let Err(e) = self.converter.reset() {
                tracing::warn!(converter = self.converter.name(), error = %e, "converter reset failed");
            }
        }

        result
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    /// Shut the automation host down if the batch touched it.
    pub fn finish(self) {
        if self.prepared {
            self.converter.finish();
        }
    }
}

/// Convert every document found under `root`, never stopping on a failure.
pub fn convert_batch(
    converter: &mut dyn DocumentConverter,
    root: &Path,
    documents: &[&Document],
    dest_dir: &Path,
    restart_every: usize,
    reporter: &dyn ProgressReporter,
) -> ConversionSummary {
    let mut summary = ConversionSummary::default();
    let mut session = ConversionSession::new(converter, dest_dir, restart_every).with_root(root);
    let total = documents.len() as u64;
    for (i, document) in documents.iter().enumerate() {
        reporter.report(PipelineEvent::Converting {
            n: i as u64 + 1,
            total,
            file: document.file_name(),
        });
        match session.convert(document) {
            Ok(pdf) => {
                tracing::info!(file = %document.file_name(), pdf = %pdf.display(), "converted");
                summary.converted.push(((*document).clone(), pdf));
            }
            Err(e) => {
                tracing::warn!(file = %document.file_name(), error = %e, "conversion failed");
                summary.failed.push(((*document).clone(), e.to_string()));
            }
        }
    }
    session.finish();
    summary
}

// ============ Disabled ============

/// Used when conversion is turned off; every call fails.
pub struct DisabledConverter;

impl DocumentConverter for DisabledConverter {
    fn name(&self) -> &str {
        "disabled"
    }

    fn convert(&mut self, _source: &Path, _dest_dir: &Path) -> Result<PathBuf, ConversionError> {
        Err(ConversionError::Disabled)
    }
}

// ============ LibreOffice ============

/// Headless LibreOffice. Every call is its own process, so no reset is needed.
pub struct LibreOfficeConverter {
    program: String,
}

impl LibreOfficeConverter {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl DocumentConverter for LibreOfficeConverter {
    fn name(&self) -> &str {
        "libreoffice"
    }

    fn convert(&mut self, source: &Path, dest_dir: &Path) -> Result<PathBuf, ConversionError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(dest_dir)
            .arg(source);
        run_checked(self.name(), &self.program, &mut cmd, source)?;
        expect_output(pdf_destination(source, dest_dir))
    }
}

// ============ Word on Windows ============

/// Microsoft Word through COM, one Word instance per document.
pub struct WordWindowsConverter;

/// `wdFormatPDF`
const WD_FORMAT_PDF: u32 = 17;

impl WordWindowsConverter {
    fn script(source: &Path, pdf: &Path) -> String {
        format!(
            "$ErrorActionPreference = 'Stop'\n\
             $word = New-Object -ComObject Word.Application\n\
             $word.Visible = $false\n\
             try {{\n\
               $doc = $word.Documents.Open('{src}')\n\
               $doc.SaveAs([ref]'{pdf}', [ref]{fmt})\n\
               $doc.Close()\n\
             }} finally {{\n\
               $word.Quit()\n\
             }}",
            src = powershell_quote(&source.to_string_lossy()),
            pdf = powershell_quote(&pdf.to_string_lossy()),
            fmt = WD_FORMAT_PDF,
        )
    }
}

impl DocumentConverter for WordWindowsConverter {
    fn name(&self) -> &str {
        "word-windows"
    }

    fn convert(&mut self, source: &Path, dest_dir: &Path) -> Result<PathBuf, ConversionError> {
        let pdf = pdf_destination(source, dest_dir);
        let mut cmd = Command::new("powershell");
        cmd.arg("-NoProfile")
            .arg("-NonInteractive")
            .arg("-Command")
            .arg(Self::script(source, &pdf));
        run_checked(self.name(), "powershell", &mut cmd, source)?;
        expect_output(pdf)
    }
}

// ============ Word on macOS ============

/// Microsoft Word through AppleScript. Word stays open across documents and
/// is quit on reset and at the end of a batch.
pub struct WordMacConverter {
    quit_pause: Duration,
    restart_pause: Duration,
}

impl Default for WordMacConverter {
    fn default() -> Self {
        Self {
            quit_pause: Duration::from_secs(2),
            restart_pause: Duration::from_secs(3),
        }
    }
}

const QUIT_WORD_IF_RUNNING: &str = r#"
tell application "Microsoft Word"
    if it is running then
        quit
    end if
end tell
"#;

const QUIT_WORD: &str = r#"
tell application "Microsoft Word"
    quit
end tell
"#;

impl WordMacConverter {
    fn save_as_script(source: &Path, pdf: &Path) -> String {
        format!(
            r#"
tell application "Microsoft Word"
    activate
    delay 2
    open "{src}"
    delay 3
    set theDoc to active document
    save as theDoc file name "{pdf}" file format format PDF
    delay 2
    close theDoc saving no
    delay 1
end tell
"#,
            src = applescript_quote(&source.to_string_lossy()),
            pdf = applescript_quote(&pdf.to_string_lossy()),
        )
    }

    /// Second attempt when `save as` is refused.
    fn make_pdf_script(source: &Path, pdf: &Path) -> String {
        format!(
            r#"
tell application "Microsoft Word"
    activate
    delay 2
    open "{src}"
    delay 3
    set myDoc to active document
    set myFilePath to "{pdf}"
    make new PDF file at active document with properties {{file name:myFilePath}}
    delay 2
    close active document saving no
    delay 1
end tell
"#,
            src = applescript_quote(&source.to_string_lossy()),
            pdf = applescript_quote(&pdf.to_string_lossy()),
        )
    }

    fn osascript(script: &str) -> Command {
        let mut cmd = Command::new("osascript");
        cmd.arg("-e").arg(script);
        cmd
    }

    fn quit(&self, script: &str, pause: Duration) {
        // Word may simply not be running; nothing to report.
        let _ = Self::osascript(script).output();
        std::thread::sleep(pause);
    }
}

impl DocumentConverter for WordMacConverter {
    fn name(&self) -> &str {
        "word-macos"
    }

    fn prepare(&mut self) -> Result<(), ConversionError> {
        self.quit(QUIT_WORD_IF_RUNNING, self.quit_pause);
        Ok(())
    }

    fn convert(&mut self, source: &Path, dest_dir: &Path) -> Result<PathBuf, ConversionError> {
        let pdf = pdf_destination(source, dest_dir);
        let primary = run_checked(
            self.name(),
            "osascript",
            &mut Self::osascript(&Self::save_as_script(source, &pdf)),
            source,
        );
        if let Err(e) = primary {
            tracing::warn!(path = %source.display(), error = %e, "save as PDF failed, trying alternate script");
            run_checked(
                self.name(),
                "osascript",
                &mut Self::osascript(&Self::make_pdf_script(source, &pdf)),
                source,
            )?;
        }
        expect_output(pdf)
    }

    fn reset(&mut self) -> Result<(), ConversionError> {
        self.quit(QUIT_WORD, self.restart_pause);
        Ok(())
    }

    fn finish(&mut self) {
        let _ = Self::osascript(QUIT_WORD).output();
    }
}

// ============ helpers ============

fn run_checked(
    converter: &str,
    program: &str,
    cmd: &mut Command,
    source: &Path,
) -> Result<(), ConversionError> {
    let output = cmd.output().map_err(|e| ConversionError::Launch {
        program: program.to_string(),
        source: e,
    })?;
    if output.status.success() {
        Ok(())
    } else {
        Err(ConversionError::Failed {
            converter: converter.to_string(),
            path: source.to_path_buf(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn expect_output(pdf: PathBuf) -> Result<PathBuf, ConversionError> {
    if pdf.is_file() {
        Ok(pdf)
    } else {
        Err(ConversionError::MissingOutput(pdf))
    }
}

fn applescript_quote(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn powershell_quote(s: &str) -> String {
    s.replace('\'', "''")
}
