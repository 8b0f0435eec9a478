//! # Contract Review
//!
//! Batch review of contract folders for payment and invoicing risk.
//!
//! Contract Review walks a folder of contracts, sets aside the documents a
//! person has to look at (Word files with embedded images, unsupported
//! formats), turns the rest into plain text and asks a language model for
//! six contract fields. Answers that carry a risk signal (pre-invoicing,
//! missing terms, open-ended payment) land in a persistent report.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌─────────┐   ┌─────────┐   ┌────────┐
//! │ Classify │──▶│ Convert │──▶│ Extract │──▶│ Analyze │──▶│ Detect │
//! │ walk+zip │   │ Word→PDF│   │ PDF/OCR │   │  model  │   │ rules  │
//! └──────────┘   └─────────┘   └─────────┘   └─────────┘   └───┬────┘
//!                                                              ▼
//!                                                        ┌──────────┐
//!                                                        │  Report  │
//!                                                        │   CSV    │
//!                                                        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! crev classify ~/contracts --review-list
//! crev run ~/contracts
//! crev report
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Per-stage error types |
//! | [`classify`] | Folder classification and review list |
//! | [`extract`] | PDF and Word text extraction |
//! | [`ocr`] | Page rasterizer and OCR engine |
//! | [`convert`] | Word → PDF converters |
//! | [`analysis`] | Language-model field extraction |
//! | [`suspicion`] | Risk-signal rules |
//! | [`report`] | Persistent report of flagged contracts |
//! | [`pipeline`] | Run orchestration and rate limiting |
//! | [`progress`] | Progress reporting on stderr |

pub mod analysis;
pub mod classify;
pub mod config;
pub mod convert;
pub mod error;
pub mod extract;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod progress;
pub mod report;
pub mod suspicion;
