//! Flow-cytometry directory grammar.
//!
//! Acquisition software exports one folder per experiment filled with FCS
//! files; plate acquisitions add a tray/specimen/well nesting, tube
//! acquisitions a specimen/tube one. The walk classifies every entry,
//! the parse phase reads the FCS metadata, and the merge phase rebuilds
//! the hierarchy from the keywords each file carries.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::descriptor::{ContainerKind, DatasetNode, RootNode};
use crate::domain::{FormatType, TrayGeometry, WellCoordinate};
use crate::error::ImporterError;
use crate::readers::{ParsedDataset, ReaderSet};
use crate::scan::{
    self, ProgressSink, ScanEvent, ScanOptions, ScanOutcome, parse_candidates, relative_to,
    sorted_entry_names,
};
use crate::validator::Validator;

struct Discovery {
    candidates: Vec<Utf8PathBuf>,
    attachments: Vec<Utf8PathBuf>,
    validator: Validator,
}

pub(crate) fn scan(
    root: &Utf8Path,
    options: &ScanOptions,
    readers: &ReaderSet,
    sink: &dyn ProgressSink,
) -> Result<ScanOutcome, ImporterError> {
    let mut discovery = Discovery {
        candidates: Vec::new(),
        attachments: Vec::new(),
        validator: Validator::new(),
    };
    walk_directory(root, root, &mut discovery);
    debug!(
        candidates = discovery.candidates.len(),
        attachments = discovery.attachments.len(),
        "flow discovery done"
    );

    let parsed = parse_candidates(&discovery.candidates, readers, options.parallel);

    let mut tree = RootNode::new(root.to_path_buf());
    let mut validator = discovery.validator;
    for (path, result) in parsed {
        match result {
            Ok(dataset) => {
                sink.event(ScanEvent::DatasetParsed { path: path.clone() });
                merge_dataset(root, &path, &dataset, &mut tree, &mut validator, options);
            }
            Err(err) => {
                let reason = err.to_string();
                warn!(path = %path, error = %reason, "dataset demoted");
                sink.event(ScanEvent::DatasetRejected {
                    path: path.clone(),
                    reason: reason.clone(),
                });
                validator.mark_invalid(&path, "Parsing failed");
                validator.mark_invalid(&path, reason);
            }
        }
    }

    assign_attachments(root, &discovery.attachments, &mut tree, &mut validator);
    infer_geometries(root, &mut tree, &mut validator);

    Ok(ScanOutcome {
        root: tree,
        validator,
    })
}

/// Depth-first structural pass. Collects FCS candidates and attachments;
/// everything that violates the grammar goes straight to the validator.
fn walk_directory(root: &Utf8Path, dir: &Utf8Path, discovery: &mut Discovery) {
    let names = match sorted_entry_names(dir) {
        Ok(names) => names,
        Err(err) => {
            discovery.validator.mark_invalid(dir, err.to_string());
            return;
        }
    };

    // An empty root is fine (nothing to import yet); an empty subfolder
    // means a broken export.
    if names.is_empty() && dir != root {
        discovery.validator.mark_invalid(dir, "Empty folder");
        return;
    }

    for name in names {
        let path = dir.join(&name);
        if path.as_std_path().is_dir() {
            walk_directory(root, &path, discovery);
            continue;
        }

        if dir == root {
            discovery
                .validator
                .mark_invalid(&path, "Files must be in sub-folders.");
            continue;
        }

        if scan::is_junk_file(&name) {
            continue;
        }
        let Some(extension) = scan::extension_of(&name) else {
            continue;
        };

        // The acquisition software has two export modes; only the plain
        // FCS export is annotatable. The XML file marks the other one.
        if extension == "xml" {
            discovery.validator.mark_invalid(&path, "Experiment export");
            continue;
        }

        if scan::is_attachment(&extension) {
            discovery.attachments.push(path);
            continue;
        }

        // Leftover transfer marker: the folder was handed over once
        // already and never picked up. Stop classifying this folder.
        if name.eq_ignore_ascii_case("data_structure.ois") {
            discovery
                .validator
                .mark_invalid(&path, "Failed registration to openBIS!");
            return;
        }

        if name.to_ascii_lowercase().contains("_properties.oix") {
            discovery
                .validator
                .mark_invalid(&path, "Experiment already annotated");
            return;
        }

        if extension != "fcs" {
            discovery
                .validator
                .mark_invalid(&path, "Unsupported file format");
            continue;
        }

        discovery.candidates.push(path);
    }
}

/// Keyword lookup with the empty string standing in for absent keys, the
/// same contract acquisition keywords have in the files themselves.
fn keyword<'a>(parsed: &'a ParsedDataset, key: &str) -> &'a str {
    parsed
        .attributes
        .get(key)
        .map(String::as_str)
        .unwrap_or_default()
}

/// Place one parsed FCS file into the tree, driven by its keywords.
fn merge_dataset(
    root: &Utf8Path,
    path: &Utf8Path,
    parsed: &ParsedDataset,
    tree: &mut RootNode,
    validator: &mut Validator,
    options: &ScanOptions,
) {
    let experiment_name = non_empty_or(keyword(parsed, "EXPERIMENT NAME"), "UNKNOWN");
    let Some(experiment_dir) = experiment_folder(root, path, experiment_name) else {
        validator.mark_invalid(
            path,
            format!("Containing folder name does not match experiment name ({experiment_name})."),
        );
        return;
    };

    if let Some(expected) = &options.expected_hardware {
        let hardware = keyword(parsed, "$CYT");
        if hardware != expected {
            validator.mark_invalid(path, format!("Wrong hardware string: {hardware}"));
        }
    }

    let relative_experiment = relative_to(root, &experiment_dir);
    let experiment = tree.experiment_entry(experiment_name, &relative_experiment);
    experiment.set_attribute("owner_name", keyword(parsed, "$OP"));
    experiment.set_attribute("acq_hardware", keyword(parsed, "$CYT"));
    experiment.set_attribute("acq_software", keyword(parsed, "CREATOR"));
    experiment.set_attribute("date", keyword(parsed, "$DATE"));

    let dataset = dataset_node(root, path, parsed);
    let specimen_name = non_empty_or(keyword(parsed, "$SRC"), "UNKNOWN");
    let plate_name = keyword(parsed, "PLATE NAME");
    let index_sort = if keyword(parsed, "INDEX SORTING SORTED LOCATION COUNT").is_empty() {
        "false"
    } else {
        "true"
    };

    // A PLATE NAME keyword makes this a plate acquisition: the well slots
    // under a specimen inside the tray. Without it the file is a plain
    // tube measurement.
    if plate_name.is_empty() {
        let specimen = experiment.container_entry(specimen_name, ContainerKind::Specimen);
        let tube = specimen.child_entry(keyword(parsed, "TUBE NAME"), ContainerKind::Tube);
        tube.set_attribute("dataFilename", keyword(parsed, "$FIL"));
        tube.set_attribute("indexSort", index_sort);
        tube.datasets.push(dataset);
    } else {
        let tray = experiment.container_entry(plate_name, ContainerKind::Tray);
        let specimen = tray.child_entry(specimen_name, ContainerKind::Specimen);
        let well = specimen.child_entry(keyword(parsed, "WELL ID"), ContainerKind::Well);
        well.set_attribute("dataFilename", keyword(parsed, "$FIL"));
        well.set_attribute("indexSort", index_sort);
        well.datasets.push(dataset);
    }
}

fn dataset_node(root: &Utf8Path, path: &Utf8Path, parsed: &ParsedDataset) -> DatasetNode {
    let relative = relative_to(root, path);
    let mut node = DatasetNode::new(path.to_path_buf(), &relative, FormatType::Fcs);
    node.set_attribute("version", &parsed.version);
    node.set_attribute("date", keyword(parsed, "$DATE"));
    node.set_attribute("acq_hardware", keyword(parsed, "$CYT"));
    node.set_attribute("owner_name", keyword(parsed, "$OP"));
    node.set_attribute("source", keyword(parsed, "$SRC"));
    node.set_attribute("dataFilename", keyword(parsed, "$FIL"));
    node.set_attribute("numParameters", keyword(parsed, "$PAR"));
    node.set_attribute("numEvents", keyword(parsed, "$TOT"));
    node
}

/// Walk from the file's folder toward the root looking for the ancestor
/// named after the EXPERIMENT NAME keyword. The root itself never counts.
fn experiment_folder(
    root: &Utf8Path,
    file: &Utf8Path,
    experiment_name: &str,
) -> Option<Utf8PathBuf> {
    let mut current = file.parent();
    while let Some(dir) = current {
        if dir == root {
            return None;
        }
        if dir.file_name() == Some(experiment_name) {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

/// Attachments belong to the experiment whose folder contains them,
/// wherever in the listing they were encountered.
fn assign_attachments(
    root: &Utf8Path,
    attachments: &[Utf8PathBuf],
    tree: &mut RootNode,
    validator: &mut Validator,
) {
    for path in attachments {
        let relative = relative_to(root, path);
        let owner = tree.experiments.iter_mut().find(|experiment| {
            relative.strip_prefix(&experiment.relative_path)
                .is_some_and(|rest| rest.starts_with('/'))
        });
        match owner {
            Some(experiment) => experiment.attachments.push(relative),
            None => validator.mark_invalid(
                path,
                "This attachment does not seem to be assigned to any experiment!",
            ),
        }
    }
}

/// Fit each tray to the smallest catalogued plate that holds all its wells.
fn infer_geometries(root: &Utf8Path, tree: &mut RootNode, validator: &mut Validator) {
    for experiment in &mut tree.experiments {
        let experiment_path = root.join(&experiment.relative_path);
        for container in &mut experiment.containers {
            if container.kind != ContainerKind::Tray {
                continue;
            }
            let mut coordinates = Vec::new();
            let mut unparsable = false;
            for specimen in &container.children {
                for well in &specimen.children {
                    match well.name.parse::<WellCoordinate>() {
                        Ok(coordinate) => coordinates.push(coordinate),
                        Err(_) => unparsable = true,
                    }
                }
            }
            let geometry = if unparsable {
                None
            } else {
                TrayGeometry::fitting(&coordinates)
            };
            match geometry {
                Some(geometry) => {
                    container.geometry = Some(geometry);
                    container.set_attribute("geometry", geometry.as_str());
                }
                None => {
                    validator.mark_invalid(
                        &experiment_path.join(&container.name),
                        ImporterError::UnsupportedGeometry.to_string(),
                    );
                }
            }
        }
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() { fallback } else { value }
}
