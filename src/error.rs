//! Error taxonomy for the review pipeline.
//!
//! Each pipeline stage has its own error type. The orchestrator treats
//! everything except [`PersistenceError`] as a per-document failure: it is
//! logged with the offending path and the batch moves on.

use std::path::PathBuf;

use thiserror::Error;

/// A document could not be opened or inspected during classification.
#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not a readable word-processor container ({path}): {reason}")]
    Container { path: PathBuf, reason: String },
}

/// Text could not be extracted from a document.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("page rasterization failed: {0}")]
    Rasterize(String),

    #[error("OCR failed: {0}")]
    Ocr(String),
}

/// The office-automation bridge failed to produce a PDF.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("converter is disabled")]
    Disabled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{converter} could not convert {path}: {detail}")]
    Failed {
        converter: String,
        path: PathBuf,
        detail: String,
    },

    #[error("converter reported success but {0} was not written")]
    MissingOutput(PathBuf),
}

/// The external language-model service failed.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("credential file not found: {0}")]
    MissingCredential(PathBuf),

    #[error("credential file is empty: {0}")]
    EmptyCredential(PathBuf),

    #[error("unknown analysis provider: {0}")]
    UnknownProvider(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model service returned {status}: {body}")]
    Service { status: u16, body: String },

    #[error("model service response had no text: {0}")]
    EmptyResponse(String),
}

/// The report store could not be read or rewritten. Fatal to a run.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("report I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("report {path} is not a valid table: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("report {path} has unexpected columns: {found:?}")]
    Schema { path: PathBuf, found: Vec<String> },
}
