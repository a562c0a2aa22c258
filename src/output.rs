use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ExperimentMapping, InfoResult, MapResult, ScanReport};
use crate::config::ResolvedConfig;
use crate::descriptor::{ContainerKind, ContainerNode, DatasetNode, RootNode};
use crate::export::ExportSummary;
use crate::scan::{ProgressSink, ScanEvent};
use crate::validator::Validator;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_scan(report: &ScanReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_info(result: &InfoResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_export(summary: &ExportSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_map(result: &MapResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_config(config: &ResolvedConfig) -> io::Result<()> {
        Self::print_json(config)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ScanEvent) {}
}

/// Plain-text rendering of a descriptor tree, one node per line, two-space
/// indent per level.
pub fn render_tree(root: &RootNode) -> String {
    let mut lines = vec![format!("{} ({})", root.name, root.path)];
    for experiment in &root.experiments {
        lines.push(format!("  experiment {}", experiment.name));
        for attachment in &experiment.attachments {
            lines.push(format!("    attachment {attachment}"));
        }
        for container in &experiment.containers {
            render_container(container, 2, &mut lines);
        }
        for dataset in &experiment.datasets {
            render_dataset(dataset, 2, &mut lines);
        }
    }
    lines.join("\n")
}

/// Per-path rejection reasons, empty for a clean scan.
pub fn render_verdict(validator: &Validator) -> String {
    let mut lines = Vec::new();
    for (path, reasons) in validator.invalid_paths() {
        lines.push(path.to_string());
        for reason in reasons {
            lines.push(format!("  {reason}"));
        }
    }
    lines.join("\n")
}

pub fn render_mapping(mapping: &ExperimentMapping) -> String {
    format!(
        "{} -> {} (space {})",
        mapping.experiment, mapping.identifiers.experiment, mapping.identifiers.space
    )
}

fn render_container(container: &ContainerNode, depth: usize, lines: &mut Vec<String>) {
    let indent = "  ".repeat(depth);
    let label = kind_label(container.kind);
    match container.geometry {
        Some(geometry) => lines.push(format!("{indent}{label} {} [{geometry}]", container.name)),
        None => lines.push(format!("{indent}{label} {}", container.name)),
    }
    for child in &container.children {
        render_container(child, depth + 1, lines);
    }
    for dataset in &container.datasets {
        render_dataset(dataset, depth + 1, lines);
    }
}

fn render_dataset(dataset: &DatasetNode, depth: usize, lines: &mut Vec<String>) {
    let indent = "  ".repeat(depth);
    lines.push(format!("{indent}{} ({})", dataset.name, dataset.format));
}

fn kind_label(kind: ContainerKind) -> &'static str {
    match kind {
        ContainerKind::Tray => "tray",
        ContainerKind::Specimen => "specimen",
        ContainerKind::Tube => "tube",
        ContainerKind::Well => "well",
    }
}
