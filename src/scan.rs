//! Scan entry point: checks the root, dispatches to the family grammar,
//! and reports progress to the caller's sink.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::descriptor::{NodeType, RootNode};
use crate::domain::InstrumentFamily;
use crate::error::ImporterError;
use crate::flow;
use crate::microscopy;
use crate::readers::{ParsedDataset, ReaderSet};
use crate::validator::Validator;

/// Scan-time knobs beyond the root path.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub family: InstrumentFamily,
    /// Parse dataset files on a thread pool instead of inline.
    pub parallel: bool,
    /// Acquisition hardware the datasets must report, when pinned by config.
    pub expected_hardware: Option<String>,
}

impl ScanOptions {
    pub fn new(family: InstrumentFamily) -> ScanOptions {
        ScanOptions {
            family,
            parallel: false,
            expected_hardware: None,
        }
    }
}

/// Everything one scan session produces. Rescans build a fresh pair; nothing
/// is carried over.
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub root: RootNode,
    pub validator: Validator,
}

/// Progress notifications emitted while a scan runs.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Started { root: Utf8PathBuf },
    DatasetParsed { path: Utf8PathBuf },
    DatasetRejected { path: Utf8PathBuf, reason: String },
    Finished { valid: bool, datasets: usize },
}

/// Receiver for scan progress; implementations decide rendering.
pub trait ProgressSink {
    fn event(&self, event: ScanEvent);
}

/// Sink that drops every event, for callers without a progress surface.
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ScanEvent) {}
}

/// Walk `root_path` with the family's directory grammar and build the
/// descriptor tree plus its validity report.
///
/// Only an unreadable root fails the call; every other problem lands in the
/// returned [`Validator`] and the scan keeps going.
pub fn scan(
    root_path: &Utf8Path,
    options: &ScanOptions,
    sink: &dyn ProgressSink,
) -> Result<ScanOutcome, ImporterError> {
    let root_path = checked_root(root_path)?;
    info!(root = %root_path, family = %options.family, "scan started");
    sink.event(ScanEvent::Started {
        root: root_path.clone(),
    });

    let readers = ReaderSet::standard();
    let outcome = match options.family {
        InstrumentFamily::Flow => flow::scan(&root_path, options, &readers, sink)?,
        InstrumentFamily::Microscopy => microscopy::scan(&root_path, options, &readers, sink)?,
    };

    info!(
        valid = outcome.validator.is_valid(),
        invalid_paths = outcome.validator.invalid_count(),
        datasets = outcome.root.count(NodeType::Dataset),
        "scan finished"
    );
    sink.event(ScanEvent::Finished {
        valid: outcome.validator.is_valid(),
        datasets: outcome.root.count(NodeType::Dataset),
    });
    Ok(outcome)
}

fn checked_root(path: &Utf8Path) -> Result<Utf8PathBuf, ImporterError> {
    let metadata = fs::metadata(path.as_std_path())
        .map_err(|err| ImporterError::InaccessibleRoot(format!("{path}: {err}")))?;
    if !metadata.is_dir() {
        return Err(ImporterError::InaccessibleRoot(format!(
            "{path}: not a directory"
        )));
    }
    Ok(path.to_path_buf())
}

/// Names of the direct children of `dir`, lexically sorted so repeated scans
/// classify entries in the same order.
pub(crate) fn sorted_entry_names(dir: &Utf8Path) -> Result<Vec<String>, ImporterError> {
    let entries = fs::read_dir(dir.as_std_path())
        .map_err(|err| ImporterError::Filesystem(format!("{dir}: {err}")))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| ImporterError::Filesystem(format!("{dir}: {err}")))?;
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(name) => {
                return Err(ImporterError::Filesystem(format!(
                    "{dir}: non-UTF-8 entry {name:?}"
                )));
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Path of `child` relative to `root`, for display and tree bookkeeping.
pub(crate) fn relative_to(root: &Utf8Path, child: &Utf8Path) -> String {
    child
        .strip_prefix(root)
        .map(|relative| relative.to_string())
        .unwrap_or_else(|_| child.to_string())
}

/// Lowercased extension, without the dot. Entries without one are skipped by
/// both grammars.
pub(crate) fn extension_of(name: &str) -> Option<String> {
    let index = name.rfind('.')?;
    if index == 0 || index + 1 == name.len() {
        return None;
    }
    Some(name[index + 1..].to_ascii_lowercase())
}

/// Operating-system litter that acquisition stations leave behind; skipped
/// without a verdict.
pub(crate) fn is_junk_file(name: &str) -> bool {
    name.ends_with(".DS_Store") || name.starts_with("._") || name == "Thumbs.db"
}

/// Documents that may sit next to datasets without being datasets.
const ATTACHMENT_EXTENSIONS: [&str; 7] = ["pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx"];

pub(crate) fn is_attachment(extension: &str) -> bool {
    ATTACHMENT_EXTENSIONS.contains(&extension)
}

pub(crate) type ParsedCandidate = (Utf8PathBuf, Result<ParsedDataset, ImporterError>);

/// Parse every discovered dataset file, inline or on the rayon pool.
///
/// Results come back in candidate order either way, so the merge step and
/// the final tree are identical across both modes.
pub(crate) fn parse_candidates(
    candidates: &[Utf8PathBuf],
    readers: &ReaderSet,
    parallel: bool,
) -> Vec<ParsedCandidate> {
    if parallel {
        candidates
            .par_iter()
            .map(|path| (path.clone(), readers.parse(path)))
            .collect()
    } else {
        candidates
            .iter()
            .map(|path| (path.clone(), readers.parse(path)))
            .collect()
    }
}
