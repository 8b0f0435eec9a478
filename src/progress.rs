//! Run progress reporting.
//!
//! Reports observable progress during `crev run` and `crev convert` so users
//! see what is being scanned, how many documents are left, and when the run
//! is waiting on the model's rate limit. Progress is emitted on **stderr** so
//! stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event of a review run.
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    /// Walking the folder. Total unknown.
    Discovering { root: String },
    /// Classification finished.
    Classified { total: u64, flagged: u64 },
    /// Converting document `n` of `total` to PDF.
    Converting { n: u64, total: u64, file: String },
    /// Extracting and analyzing document `n` of `total`.
    Processing { n: u64, total: u64, file: String },
    /// Blocking before the next model call.
    Waiting { secs: u64 },
    /// A document was appended to the report.
    Flagged { file: String },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the pipeline.
    fn report(&self, event: PipelineEvent);
}

/// Human-friendly progress on stderr: "review  analyzing  12 / 1,204  合同.pdf".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: PipelineEvent) {
        let line = match &event {
            PipelineEvent::Discovering { root } => format!("review {}  discovering...\n", root),
            PipelineEvent::Classified { total, flagged } => format!(
                "review  classified  {} files, {} need manual review\n",
                format_number(*total),
                format_number(*flagged)
            ),
            PipelineEvent::Converting { n, total, file } => format!(
                "review  converting  {} / {}  {}\n",
                format_number(*n),
                format_number(*total),
                file
            ),
            PipelineEvent::Processing { n, total, file } => format!(
                "review  analyzing  {} / {}  {}\n",
                format_number(*n),
                format_number(*total),
                file
            ),
            PipelineEvent::Waiting { secs } => {
                format!("review  waiting {}s for rate limit\n", secs)
            }
            PipelineEvent::Flagged { file } => format!("review  flagged  {}\n", file),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: PipelineEvent) {
        let obj = match &event {
            PipelineEvent::Discovering { root } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "root": root
            }),
            PipelineEvent::Classified { total, flagged } => serde_json::json!({
                "event": "progress",
                "phase": "classified",
                "total": total,
                "flagged": flagged
            }),
            PipelineEvent::Converting { n, total, file } => serde_json::json!({
                "event": "progress",
                "phase": "converting",
                "n": n,
                "total": total,
                "file": file
            }),
            PipelineEvent::Processing { n, total, file } => serde_json::json!({
                "event": "progress",
                "phase": "analyzing",
                "n": n,
                "total": total,
                "file": file
            }),
            PipelineEvent::Waiting { secs } => serde_json::json!({
                "event": "progress",
                "phase": "waiting",
                "secs": secs
            }),
            PipelineEvent::Flagged { file } => serde_json::json!({
                "event": "flagged",
                "file": file
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: PipelineEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
