//! Operation layer shared by the CLI commands.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::descriptor::{ExperimentNode, NodeType, RootNode};
use crate::domain::{FormatType, InstrumentFamily, ProjectRef};
use crate::error::ImporterError;
use crate::export::{self, ExportOptions, ExportSummary};
use crate::mapper::{MetadataMapper, RegistrationIds};
use crate::readers::fcs::{FcsFile, Parameter};
use crate::readers::{AttributeMap, ReaderSet, SeriesInfo};
use crate::scan::{ProgressSink, ScanOptions};
use crate::validator::Validator;

/// One scan session, shaped for reporting: verdict and counts up front, the
/// full descriptor tree below.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scanned_at: String,
    pub root_path: Utf8PathBuf,
    pub instrument: InstrumentFamily,
    pub experiments: usize,
    pub datasets: usize,
    pub attachments: usize,
    pub verdict: Validator,
    pub tree: RootNode,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResult {
    pub path: Utf8PathBuf,
    pub format: FormatType,
    pub version: String,
    pub events: usize,
    pub parameters: Vec<Parameter>,
    pub attributes: AttributeMap,
    pub series: Vec<SeriesInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapResult {
    pub root_path: Utf8PathBuf,
    pub project: ProjectRef,
    pub mappings: Vec<ExperimentMapping>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentMapping {
    pub experiment: String,
    pub code: String,
    pub identifiers: RegistrationIds,
}

pub struct App {
    readers: ReaderSet,
}

impl App {
    pub fn new(readers: ReaderSet) -> App {
        App { readers }
    }

    /// Scan a directory tree and wrap the outcome in a serializable report.
    pub fn scan(
        &self,
        root: &Utf8Path,
        options: &ScanOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ScanReport, ImporterError> {
        let outcome = crate::scan::scan(root, options, sink)?;
        let attachments = outcome
            .root
            .experiments
            .iter()
            .map(|experiment| experiment.attachments.len())
            .sum();
        Ok(ScanReport {
            scanned_at: iso_timestamp(),
            root_path: outcome.root.path.clone(),
            instrument: options.family,
            experiments: outcome.root.experiments.len(),
            datasets: outcome.root.count(NodeType::Dataset),
            attachments,
            verdict: outcome.validator,
            tree: outcome.root,
        })
    }

    /// Metadata of a single acquisition file, without scanning a tree.
    pub fn info(&self, path: &Utf8Path) -> Result<InfoResult, ImporterError> {
        let extension = path
            .extension()
            .ok_or_else(|| ImporterError::UnexpectedEntry(path.to_string()))?;
        let format = FormatType::from_extension(extension)
            .ok_or_else(|| ImporterError::UnknownFormat(extension.to_string()))?;

        match format {
            FormatType::Fcs => {
                let file = FcsFile::open(path)?;
                let events = file.events();
                Ok(InfoResult {
                    path: path.to_owned(),
                    format,
                    version: file.version,
                    events,
                    parameters: file.parameters,
                    attributes: file.text,
                    series: Vec::new(),
                })
            }
            FormatType::Lif => {
                let parsed = self.readers.parse(path)?;
                Ok(InfoResult {
                    path: path.to_owned(),
                    format,
                    version: parsed.version,
                    events: 0,
                    parameters: Vec::new(),
                    attributes: parsed.attributes,
                    series: parsed.series,
                })
            }
        }
    }

    /// Decode one event table to CSV.
    pub fn export(
        &self,
        source: &Utf8Path,
        destination: &Utf8Path,
        options: &ExportOptions,
    ) -> Result<ExportSummary, ImporterError> {
        export::export_csv(source, destination, options)
    }

    /// Registration identifiers for experiments under a scanned root.
    ///
    /// With `experiment` set only that experiment is mapped; otherwise every
    /// experiment the scan discovered is.
    pub fn map(
        &self,
        root: &Utf8Path,
        options: &ScanOptions,
        project: &ProjectRef,
        experiment: Option<&str>,
        sink: &dyn ProgressSink,
    ) -> Result<MapResult, ImporterError> {
        let outcome = crate::scan::scan(root, options, sink)?;
        let mappings = match experiment {
            Some(name) => {
                let node = outcome.root.experiment(name).ok_or_else(|| {
                    ImporterError::StructuralMismatch(format!(
                        "no experiment named {name} under {root}"
                    ))
                })?;
                vec![map_experiment(node, project)]
            }
            None => outcome
                .root
                .experiments
                .iter()
                .map(|node| map_experiment(node, project))
                .collect(),
        };
        Ok(MapResult {
            root_path: outcome.root.path.clone(),
            project: project.clone(),
            mappings,
        })
    }
}

fn map_experiment(experiment: &ExperimentNode, project: &ProjectRef) -> ExperimentMapping {
    let mapper = MetadataMapper::new(experiment, project);
    ExperimentMapping {
        experiment: experiment.name.clone(),
        code: experiment.code.clone(),
        identifiers: mapper.identifiers(),
    }
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
