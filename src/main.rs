//! # Contract Review CLI (`crev`)
//!
//! The `crev` binary walks a folder of contracts, sets aside the ones that
//! need a human (embedded images, unsupported formats), converts Word files
//! to PDF, extracts text, asks a language model for six contract fields and
//! records the contracts whose answers carry a risk signal.
//!
//! ## Usage
//!
//! ```bash
//! crev --config ./config/crev.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `crev run <folder>` | Full review: classify, convert, extract, analyze, report |
//! | `crev classify <folder>` | Classification only |
//! | `crev convert <folder>` | Convert every Word document to PDF |
//! | `crev extract <path>` | Extract one document to `<stem>.txt` |
//! | `crev analyze <path>` | Analyze one text file to `<stem>_result.txt` |
//! | `crev detect <path>` | Run the risk rules over an analysis result |
//! | `crev report` | Show the report of flagged contracts |
//!
//! ## Examples
//!
//! ```bash
//! # Review a folder, writing the manual-review checklist too
//! crev run ~/contracts --review-list
//!
//! # Read Word files directly instead of converting them
//! crev run ~/contracts --no-convert
//!
//! # Check a single scanned PDF
//! crev extract ~/contracts/采购合同.pdf
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use contract_review::analysis::{create_client, load_api_key, FieldExtractor};
use contract_review::classify::{classify_folder, write_review_list};
use contract_review::config::{self, Config};
use contract_review::convert::{convert_batch, create_converter};
use contract_review::extract::TextExtractor;
use contract_review::models::Document;
use contract_review::pipeline::{Pipeline, RunOptions};
use contract_review::progress::ProgressMode;
use contract_review::report::ReportStore;
use contract_review::suspicion::RuleSet;

/// Contract Review: flags contracts with payment and invoicing risks.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/crev.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "crev",
    about = "Contract Review: flags contracts with payment and invoicing risks",
    version,
    long_about = "Contract Review walks a folder of contracts, sets aside the ones that need \
    manual review, extracts their text (with OCR for scanned PDFs), asks a language model for \
    the key payment fields and records every contract whose answers carry a risk signal."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/crev.toml` when that file exists, otherwise
    /// built-in defaults are used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Progress on stderr: `off`, `human`, or `json`.
    ///
    /// Defaults to `human` when stderr is a terminal, otherwise `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Review every contract in a folder.
    ///
    /// Classifies the folder, converts Word documents to PDF, extracts text,
    /// analyzes each document (one model call at a time, rate-limited) and
    /// appends suspicious contracts to the report.
    Run {
        /// Folder of contracts.
        folder: Option<PathBuf>,

        /// Read Word documents directly instead of converting them to PDF.
        #[arg(long)]
        no_convert: bool,

        /// Maximum number of documents to analyze.
        #[arg(long)]
        limit: Option<usize>,

        /// Also write the dated list of files that need manual review.
        #[arg(long)]
        review_list: bool,
    },

    /// Classify a folder without analyzing anything.
    Classify {
        /// Folder of contracts.
        folder: Option<PathBuf>,

        /// Write the dated list of files that need manual review.
        #[arg(long)]
        review_list: bool,
    },

    /// Convert every Word document in a folder to PDF.
    Convert {
        /// Folder of contracts.
        folder: Option<PathBuf>,
    },

    /// Extract the text of one PDF or Word document.
    ///
    /// Writes `<stem>.txt` next to the document and prints the text.
    Extract {
        /// Document to extract.
        path: Option<PathBuf>,
    },

    /// Analyze one extracted text file with the language model.
    ///
    /// Writes `<stem>_result.txt` next to the text file and prints the answer.
    Analyze {
        /// UTF-8 text file.
        path: Option<PathBuf>,
    },

    /// Run the risk rules over a saved analysis result.
    Detect {
        /// Analysis result text file.
        path: Option<PathBuf>,
    },

    /// Show the report of flagged contracts.
    Report,
}

/// A missing positional is a diagnostic with exit code 1, not a usage error.
fn require(arg: Option<PathBuf>, usage: &str) -> Result<PathBuf> {
    match arg {
        Some(path) => Ok(path),
        None => bail!("Missing argument. Usage: {}", usage),
    }
}

fn require_existing(arg: Option<PathBuf>, usage: &str) -> Result<PathBuf> {
    let path = require(arg, usage)?;
    if !path.exists() {
        bail!("File not found: {}", path.display());
    }
    Ok(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,contract_review=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = config::resolve_config(cli.config.as_deref())?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Run {
            folder,
            no_convert,
            limit,
            review_list,
        } => {
            let folder = require(folder, "crev run <folder>")?;
            let options = RunOptions {
                no_convert,
                limit,
                review_list,
            };
            run_review(&cfg, &folder, &options, progress).await?;
        }
        Commands::Classify {
            folder,
            review_list,
        } => {
            let folder = require(folder, "crev classify <folder>")?;
            run_classify(&cfg, &folder, review_list)?;
        }
        Commands::Convert { folder } => {
            let folder = require(folder, "crev convert <folder>")?;
            run_convert(&cfg, &folder, progress)?;
        }
        Commands::Extract { path } => {
            let path = require_existing(path, "crev extract <path>")?;
            run_extract(&cfg, &path)?;
        }
        Commands::Analyze { path } => {
            let path = require_existing(path, "crev analyze <path>")?;
            run_analyze(&cfg, &path).await?;
        }
        Commands::Detect { path } => {
            let path = require_existing(path, "crev detect <path>")?;
            run_detect(&cfg, &path)?;
        }
        Commands::Report => {
            run_report(&cfg)?;
        }
    }

    Ok(())
}

async fn run_review(
    cfg: &Config,
    folder: &Path,
    options: &RunOptions,
    progress: ProgressMode,
) -> Result<()> {
    // Credentials are checked before any document is touched.
    let key = load_api_key(&cfg.analysis.api_key_file)?;
    let client = create_client(&cfg.analysis, key)?;
    tracing::info!(model = client.model_name(), "analysis client ready");

    let mut pipeline = Pipeline::new(cfg, client).with_reporter(progress.reporter());
    let summary = pipeline.run(folder, options).await?;
    summary.print();
    Ok(())
}

fn run_classify(cfg: &Config, folder: &Path, review_list: bool) -> Result<()> {
    let classification = classify_folder(folder, &cfg.scan)?;

    println!("classify {}", folder.display());
    println!("  files: {}", classification.all_files.len());
    println!("  embedded images: {}", classification.image_files.len());
    println!("  unsupported format: {}", classification.unsupported_files.len());
    println!("  clean: {}", classification.clean_files().len());
    if !classification.skipped.is_empty() {
        println!("  unreadable: {}", classification.skipped.len());
    }
    for (document, reason) in classification.flagged() {
        println!("  - {}  {}", document.file_name(), reason.label());
    }

    if review_list {
        let today = chrono::Local::now().date_naive();
        match write_review_list(&classification, &cfg.report.review_list_dir, today)? {
            Some(path) => println!("  review list: {}", path.display()),
            None => println!("  review list: nothing to review"),
        }
    }
    println!("ok");
    Ok(())
}

fn run_convert(cfg: &Config, folder: &Path, progress: ProgressMode) -> Result<()> {
    let classification = classify_folder(folder, &cfg.scan)?;
    let candidates = classification.conversion_candidates();
    let mut converter = create_converter(&cfg.conversion);
    let reporter = progress.reporter();

    let summary = convert_batch(
        converter.as_mut(),
        folder,
        &candidates,
        &cfg.conversion.output_dir,
        cfg.conversion.restart_every,
        reporter.as_ref(),
    );

    println!("convert {} ({})", folder.display(), converter.name());
    println!("  total: {}", summary.total());
    println!("  converted: {}", summary.converted.len());
    println!("  failed: {}", summary.failed.len());
    for (document, error) in &summary.failed {
        println!("  - {}  {}", document.file_name(), error);
    }
    println!("  output: {}", cfg.conversion.output_dir.display());
    println!("ok");
    Ok(())
}

fn run_extract(cfg: &Config, path: &Path) -> Result<()> {
    let document = Document::new(path);
    let extractor = TextExtractor::from_config(&cfg.extraction);
    let result = extractor
        .extract(&document)
        .with_context(|| format!("Failed to extract {}", path.display()))?;
    tracing::info!(
        file = %document.file_name(),
        method = result.method.as_str(),
        "extracted text"
    );

    let out = document.path.with_file_name(format!("{}.txt", document.stem()));
    std::fs::write(&out, &result.text)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    println!("=== File Content ===");
    println!("{}", result.text);
    Ok(())
}

async fn run_analyze(cfg: &Config, path: &Path) -> Result<()> {
    let key = load_api_key(&cfg.analysis.api_key_file)?;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let client = create_client(&cfg.analysis, key)?;
    let response = client
        .analyze(&text)
        .await
        .with_context(|| format!("Analysis failed for {}", path.display()))?;

    let document = Document::new(path);
    let out = document
        .path
        .with_file_name(format!("{}_result.txt", document.stem()));
    std::fs::write(&out, &response)
        .with_context(|| format!("Failed to write {}", out.display()))?;

    println!("{}", response);
    Ok(())
}

fn run_detect(cfg: &Config, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let finding = RuleSet::from_config(&cfg.suspicion).detect(&raw);

    println!("detect {}", path.display());
    println!("  suspicious: {}", if finding.suspicious { "yes" } else { "no" });
    if !finding.labels.is_empty() {
        println!("  rules: {}", finding.labels.join(", "));
    }
    println!();
    println!("{}", finding.summary());
    Ok(())
}

fn run_report(cfg: &Config) -> Result<()> {
    let store = ReportStore::new(&cfg.report.path);
    let rows = store.load()?;

    println!("report: {}", store.path().display());
    if rows.is_empty() {
        println!("  (no entries)");
        return Ok(());
    }
    println!("  entries: {}", rows.len());
    for row in rows {
        println!();
        println!("{}", row.filename);
        for line in row.summary.lines().filter(|l| !l.trim().is_empty()) {
            println!("  {}", line);
        }
    }
    Ok(())
}
