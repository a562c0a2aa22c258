//! CSV export of decoded event tables.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::Builder;
use tracing::info;

use crate::error::ImporterError;
use crate::readers::fcs::{EventTable, FcsFile};

/// Column selection and row thinning for [`export_csv`].
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Parameter names to keep, in output order; empty keeps all of them.
    pub columns: Vec<String>,
    /// Write every nth event; 1 writes all of them.
    pub sample: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            sample: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub source: Utf8PathBuf,
    pub destination: Utf8PathBuf,
    pub columns: Vec<String>,
    pub events_written: usize,
    pub events_total: usize,
}

/// Decode the event table of `source` and write it to `destination` as CSV.
///
/// Rows go to a temporary file next to the destination which is renamed into
/// place once complete, so a failed export never leaves a partial file.
pub fn export_csv(
    source: &Utf8Path,
    destination: &Utf8Path,
    options: &ExportOptions,
) -> Result<ExportSummary, ImporterError> {
    let file = FcsFile::open(source)?;
    let layout = file
        .data
        .clone()
        .ok_or_else(|| ImporterError::ExportFailed(format!("{source} has no data segment")))?;
    let table = EventTable::read(source, &layout)?;

    let names = file.parameter_names();
    let indices = select_columns(&names, &options.columns)?;
    let header: Vec<&str> = indices.iter().map(|&index| names[index]).collect();

    let parent = destination
        .parent()
        .ok_or_else(|| ImporterError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| ImporterError::Filesystem(err.to_string()))?;
    let temp = Builder::new()
        .prefix("lab-importer-export")
        .suffix(".csv")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| ImporterError::Filesystem(err.to_string()))?;

    let mut writer = csv::Writer::from_writer(temp);
    writer
        .write_record(&header)
        .map_err(|err| ImporterError::ExportFailed(err.to_string()))?;

    let stride = options.sample.max(1);
    let mut events_written = 0;
    for row in table.rows().step_by(stride) {
        let record: Vec<String> = indices
            .iter()
            .map(|&index| row[index].to_string())
            .collect();
        writer
            .write_record(&record)
            .map_err(|err| ImporterError::ExportFailed(err.to_string()))?;
        events_written += 1;
    }

    let temp = writer
        .into_inner()
        .map_err(|err| ImporterError::ExportFailed(err.to_string()))?;
    if destination.as_std_path().exists() {
        fs::remove_file(destination.as_std_path())
            .map_err(|err| ImporterError::Filesystem(err.to_string()))?;
    }
    temp.persist(destination.as_std_path())
        .map_err(|err| ImporterError::Filesystem(err.to_string()))?;

    info!(
        source = source.as_str(),
        destination = destination.as_str(),
        events = events_written,
        "exported event table"
    );

    Ok(ExportSummary {
        source: source.to_owned(),
        destination: destination.to_owned(),
        columns: header.iter().map(|name| name.to_string()).collect(),
        events_written,
        events_total: layout.events,
    })
}

fn select_columns(names: &[&str], requested: &[String]) -> Result<Vec<usize>, ImporterError> {
    if requested.is_empty() {
        return Ok((0..names.len()).collect());
    }
    requested
        .iter()
        .map(|wanted| {
            names
                .iter()
                .position(|name| *name == wanted.as_str())
                .ok_or_else(|| ImporterError::ExportFailed(format!("unknown parameter: {wanted}")))
        })
        .collect()
}
