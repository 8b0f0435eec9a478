//! File classifier: walks a folder and decides which documents need review.
//!
//! Word documents are opened as OOXML containers and flagged when their
//! main part has any image relationship. Legacy binary `.doc` files cannot be
//! inspected that way; they stay in the run unflagged and go to the
//! converter like any other Word file. Files with an extension outside
//! word/pdf/txt are flagged as unsupported. OS metadata files never take
//! part in classification.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::error::ClassificationError;
use crate::models::{ClassificationVerdict, Document, DocumentKind, ReviewReason};

/// Files the OS or office suites drop next to real documents.
const OS_METADATA_GLOBS: &[&str] = &[
    "**/.DS_Store",
    "**/._*",
    "**/Thumbs.db",
    "**/desktop.ini",
    "**/~$*",
];

const DOCUMENT_RELS: &str = "word/_rels/document.xml.rels";
const MAX_RELS_BYTES: u64 = 10 * 1024 * 1024;

/// A classified file.
#[derive(Debug, Clone)]
pub struct ClassifiedDocument {
    pub document: Document,
    pub verdict: ClassificationVerdict,
}

/// Result of classifying one folder.
///
/// `all_files` excludes OS metadata and unreadable files; every entry of
/// `all_files` is in exactly one of `image_files`, `unsupported_files`, or
/// [`clean_files`](Classification::clean_files).
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub all_files: Vec<ClassifiedDocument>,
    pub image_files: Vec<Document>,
    pub unsupported_files: Vec<Document>,
    /// Files that could not be inspected, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

impl Classification {
    pub fn clean_files(&self) -> Vec<&Document> {
        self.all_files
            .iter()
            .filter(|c| !c.verdict.needs_review)
            .map(|c| &c.document)
            .collect()
    }

    /// Documents that go through the office-automation converter.
    pub fn conversion_candidates(&self) -> Vec<&Document> {
        self.all_files
            .iter()
            .filter(|c| c.verdict.needs_conversion)
            .map(|c| &c.document)
            .collect()
    }

    /// Flagged documents with their reasons, images first.
    pub fn flagged(&self) -> Vec<(&Document, ReviewReason)> {
        self.image_files
            .iter()
            .map(|d| (d, ReviewReason::ContainsEmbeddedImage))
            .chain(
                self.unsupported_files
                    .iter()
                    .map(|d| (d, ReviewReason::UnsupportedFormat)),
            )
            .collect()
    }
}

/// Recursively classify every regular file under `root`.
pub fn classify_folder(root: &Path, scan: &ScanConfig) -> Result<Classification> {
    if !root.is_dir() {
        bail!("Folder does not exist: {}", root.display());
    }

    let mut excludes: Vec<String> = OS_METADATA_GLOBS.iter().map(|s| s.to_string()).collect();
    excludes.extend(scan.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut result = Classification::default();

    let walker = WalkDir::new(root)
        .follow_links(scan.follow_symlinks)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if exclude_set.is_match(relative) {
            continue;
        }

        let document = Document::new(path);
        let has_images = if document.kind == DocumentKind::WordLike {
            match has_embedded_images(&document.path) {
                Ok(found) => found,
                Err(ClassificationError::Container { .. }) if is_legacy_doc(&document.path) => {
                    tracing::info!(file = %document.file_name(), "binary .doc, images not inspectable");
                    false
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cannot inspect document, skipping");
                    result.skipped.push((document.path.clone(), e.to_string()));
                    continue;
                }
            }
        } else {
            false
        };

        let verdict = ClassificationVerdict::for_kind(document.kind, has_images);
        match verdict.review_reason {
            ReviewReason::ContainsEmbeddedImage => {
                tracing::info!(file = %document.file_name(), "word document contains images");
                result.image_files.push(document.clone());
            }
            ReviewReason::UnsupportedFormat => {
                tracing::info!(file = %document.file_name(), "not a word/pdf/txt file");
                result.unsupported_files.push(document.clone());
            }
            ReviewReason::None => {}
        }
        result.all_files.push(ClassifiedDocument { document, verdict });
    }

    Ok(result)
}

/// True when the document's main part references at least one image.
pub fn has_embedded_images(path: &Path) -> Result<bool, ClassificationError> {
    let file = std::fs::File::open(path).map_err(|source| ClassificationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let container_err = |reason: String| ClassificationError::Container {
        path: path.to_path_buf(),
        reason,
    };

    let mut archive = zip::ZipArchive::new(file).map_err(|e| container_err(e.to_string()))?;
    let mut rels = Vec::new();
    match archive.by_name(DOCUMENT_RELS) {
        Ok(entry) => {
            entry
                .take(MAX_RELS_BYTES)
                .read_to_end(&mut rels)
                .map_err(|e| container_err(e.to_string()))?;
        }
        // A package without document relationships has no images.
        Err(zip::result::ZipError::FileNotFound) => return Ok(false),
        Err(e) => return Err(container_err(e.to_string())),
    }

    rels_reference_image(&rels).map_err(container_err)
}

fn is_legacy_doc(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("doc"))
}

fn rels_reference_image(xml: &[u8]) -> Result<bool, String> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let is_image = e.attributes().flatten().any(|a| {
                    a.key.local_name().as_ref() == b"Type"
                        && String::from_utf8_lossy(&a.value).contains("image")
                });
                if is_image {
                    return Ok(true);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(false)
}

/// File name of the dated review list, e.g. `20250314 Doubtful File Name.csv`.
pub fn review_list_name(date: NaiveDate) -> String {
    format!("{} Doubtful File Name.csv", date.format("%Y%m%d"))
}

/// Write the flagged files as a checklist for manual review.
///
/// Returns `None` without touching the filesystem when nothing is flagged.
pub fn write_review_list(
    classification: &Classification,
    dir: &Path,
    date: NaiveDate,
) -> Result<Option<PathBuf>> {
    let flagged = classification.flagged();
    if flagged.is_empty() {
        return Ok(None);
    }

    std::fs::create_dir_all(dir)?;
    let path = dir.join(review_list_name(date));

    let mut out = Vec::new();
    // Spreadsheet apps need the BOM to read UTF-8 CSV.
    out.extend_from_slice("\u{feff}".as_bytes());
    {
        let mut writer = csv::Writer::from_writer(&mut out);
        writer.write_record(["名稱", "疑慮原因", "完成核取方塊"])?;
        for (document, reason) in flagged {
            writer.write_record([document.file_name().as_str(), reason.label(), "FALSE"])?;
        }
        writer.flush()?;
    }
    std::fs::write(&path, out)?;

    Ok(Some(path))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
