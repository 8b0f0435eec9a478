use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file picked up when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/crev.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub suspicion: SuspicionConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ScanConfig {
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
    #[serde(default = "default_ocr_dpi")]
    pub ocr_dpi: u32,
    #[serde(default = "default_pdftoppm_bin")]
    pub pdftoppm_bin: String,
    #[serde(default = "default_tesseract_bin")]
    pub tesseract_bin: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ocr_language: default_ocr_language(),
            ocr_dpi: default_ocr_dpi(),
            pdftoppm_bin: default_pdftoppm_bin(),
            tesseract_bin: default_tesseract_bin(),
        }
    }
}

fn default_ocr_language() -> String {
    "chi_sim+eng".to_string()
}
fn default_ocr_dpi() -> u32 {
    300
}
fn default_pdftoppm_bin() -> String {
    "pdftoppm".to_string()
}
fn default_tesseract_bin() -> String {
    "tesseract".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversionConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_pdf_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_restart_every")]
    pub restart_every: usize,
    #[serde(default = "default_soffice_bin")]
    pub soffice_bin: String,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            output_dir: default_pdf_dir(),
            restart_every: default_restart_every(),
            soffice_bin: default_soffice_bin(),
        }
    }
}

fn default_backend() -> String {
    "auto".to_string()
}
fn default_pdf_dir() -> PathBuf {
    PathBuf::from("./output/pdf")
}
fn default_restart_every() -> usize {
    5
}
fn default_soffice_bin() -> String {
    "soffice".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_api_key_file")]
    pub api_key_file: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_min_delay_secs")]
    pub min_delay_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            endpoint: default_endpoint(),
            api_key_file: default_api_key_file(),
            timeout_secs: default_timeout_secs(),
            min_delay_secs: default_min_delay_secs(),
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_model() -> String {
    "gemini-1.5-pro-latest".to_string()
}
fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_api_key_file() -> PathBuf {
    PathBuf::from("Gemini_API_key.txt")
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_min_delay_secs() -> u64 {
    40
}

#[derive(Debug, Deserialize, Clone)]
pub struct SuspicionConfig {
    /// How many open-contract mentions it takes to flag a document.
    #[serde(default = "default_open_contract_min")]
    pub open_contract_min_occurrences: usize,
    #[serde(default)]
    pub extra_rules: Vec<RuleConfig>,
}

impl Default for SuspicionConfig {
    fn default() -> Self {
        Self {
            open_contract_min_occurrences: default_open_contract_min(),
            extra_rules: Vec::new(),
        }
    }
}

fn default_open_contract_min() -> usize {
    1
}

/// A user-supplied phrase rule appended after the built-in ones.
#[derive(Debug, Deserialize, Clone)]
pub struct RuleConfig {
    pub label: String,
    pub any_of: Vec<String>,
    #[serde(default)]
    pub none_of: Vec<String>,
    #[serde(default = "default_rule_min")]
    pub min_occurrences: usize,
}

fn default_rule_min() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    #[serde(default = "default_report_path")]
    pub path: PathBuf,
    #[serde(default = "default_output_dir")]
    pub review_list_dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path: default_report_path(),
            review_list_dir: default_output_dir(),
        }
    }
}

fn default_report_path() -> PathBuf {
    PathBuf::from("./output/suspicious_contracts.csv")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_text_dir")]
    pub text_dir: PathBuf,
    #[serde(default = "default_result_dir")]
    pub result_dir: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            text_dir: default_text_dir(),
            result_dir: default_result_dir(),
        }
    }
}

fn default_audit_enabled() -> bool {
    true
}
fn default_text_dir() -> PathBuf {
    PathBuf::from("./output/txt")
}
fn default_result_dir() -> PathBuf {
    PathBuf::from("./output/result")
}

impl Config {
    /// Built-in defaults, used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load an explicit config, else the default path if present, else defaults.
pub fn resolve_config(explicit: Option<&Path>) -> Result<Config> {
    match explicit {
        Some(path) => load_config(path),
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                load_config(default_path)
            } else {
                Ok(Config::minimal())
            }
        }
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.extraction.ocr_dpi == 0 {
        anyhow::bail!("extraction.ocr_dpi must be > 0");
    }
    if config.extraction.ocr_language.trim().is_empty() {
        anyhow::bail!("extraction.ocr_language must not be empty");
    }

    if config.conversion.restart_every == 0 {
        anyhow::bail!("conversion.restart_every must be >= 1");
    }
    match config.conversion.backend.as_str() {
        "auto" | "word-windows" | "word-macos" | "libreoffice" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown conversion backend: '{}'. Must be auto, word-windows, word-macos, libreoffice, or disabled.",
            other
        ),
    }

    if config.analysis.timeout_secs == 0 {
        anyhow::bail!("analysis.timeout_secs must be > 0");
    }
    match config.analysis.provider.as_str() {
        "gemini" => {}
        other => anyhow::bail!("Unknown analysis provider: '{}'. Must be gemini.", other),
    }

    if config.suspicion.open_contract_min_occurrences == 0 {
        anyhow::bail!("suspicion.open_contract_min_occurrences must be >= 1");
    }
    for rule in &config.suspicion.extra_rules {
        if rule.label.trim().is_empty() {
            anyhow::bail!("suspicion.extra_rules entries need a label");
        }
        if rule.any_of.iter().all(|p| p.is_empty()) {
            anyhow::bail!(
                "suspicion.extra_rules '{}' needs at least one phrase in any_of",
                rule.label
            );
        }
        if rule.min_occurrences == 0 {
            anyhow::bail!(
                "suspicion.extra_rules '{}': min_occurrences must be >= 1",
                rule.label
            );
        }
    }

    Ok(())
}
