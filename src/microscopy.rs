//! Microscopy directory grammar.
//!
//! Two fixed levels: experiment folders directly under the root, dataset
//! files directly inside each experiment folder. The one container format
//! parsed today is the Leica LIF family; other vendor extensions are
//! recognized so their rejection reads differently from plain garbage.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::descriptor::{DatasetNode, RootNode};
use crate::error::ImporterError;
use crate::readers::{ParsedDataset, ReaderSet};
use crate::scan::{
    self, ProgressSink, ScanEvent, ScanOptions, ScanOutcome, parse_candidates, relative_to,
    sorted_entry_names,
};
use crate::validator::Validator;

/// Vendor formats we can name but not parse. Rejecting them with their own
/// reason tells users the file is plausible, just not importable here.
const RECOGNIZED_UNSUPPORTED: [&str; 8] = ["czi", "nd2", "lsm", "oib", "oif", "ims", "stk", "zvi"];

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
    walk_root(root, &mut discovery);
    debug!(
        candidates = discovery.candidates.len(),
        attachments = discovery.attachments.len(),
        "microscopy discovery done"
    );

    let parsed = parse_candidates(&discovery.candidates, readers, options.parallel);

    let mut tree = RootNode::new(root.to_path_buf());
    let mut validator = discovery.validator;
    for (path, result) in parsed {
        match result {
            Ok(dataset) => {
                sink.event(ScanEvent::DatasetParsed { path: path.clone() });
                merge_dataset(root, &path, &dataset, &mut tree);
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

    for path in &discovery.attachments {
        attach(root, path, &mut tree);
    }

    Ok(ScanOutcome {
        root: tree,
        validator,
    })
}

fn walk_root(root: &Utf8Path, discovery: &mut Discovery) {
    let names = match sorted_entry_names(root) {
        Ok(names) => names,
        Err(err) => {
            discovery.validator.mark_invalid(root, err.to_string());
            return;
        }
    };
    for name in names {
        let path = root.join(&name);
        if path.as_std_path().is_dir() {
            walk_experiment(root, &path, discovery);
            continue;
        }
        if scan::is_junk_file(&name) {
            continue;
        }
        if scan::extension_of(&name).is_none() {
            continue;
        }
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
        discovery
            .validator
            .mark_invalid(&path, "File must be in subfolder.");
    }
}

fn walk_experiment(root: &Utf8Path, dir: &Utf8Path, discovery: &mut Discovery) {
    let names = match sorted_entry_names(dir) {
        Ok(names) => names,
        Err(err) => {
            discovery.validator.mark_invalid(dir, err.to_string());
            return;
        }
    };
    if names.is_empty() {
        discovery.validator.mark_invalid(dir, "Empty folder");
        return;
    }
    for name in names {
        let path = dir.join(&name);
        if path.as_std_path().is_dir() {
            // Datasets spanning a folder need a vendor-specific composite
            // reader; none ship today.
            discovery.validator.mark_invalid(
                &path,
                format!("Unsupported composite file format in folder {path}"),
            );
            continue;
        }
        if scan::is_junk_file(&name) {
            continue;
        }
        let Some(extension) = scan::extension_of(&name) else {
            continue;
        };
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
        if scan::is_attachment(&extension) {
            discovery.attachments.push(path);
            continue;
        }
        if extension == "lif" {
            discovery.candidates.push(path);
            continue;
        }
        if RECOGNIZED_UNSUPPORTED.contains(&extension.as_str()) {
            discovery
                .validator
                .mark_invalid(&path, "Unsupported file format");
            continue;
        }
        discovery.validator.mark_invalid(&path, "Invalid file type.");
    }
}

/// The containing folder names the experiment; the file becomes a dataset
/// below it, carrying its series list.
fn merge_dataset(root: &Utf8Path, path: &Utf8Path, parsed: &ParsedDataset, tree: &mut RootNode) {
    let Some(experiment_dir) = path.parent() else {
        return;
    };
    let experiment_name = experiment_dir.file_name().unwrap_or_default();
    let experiment = tree.experiment_entry(experiment_name, &relative_to(root, experiment_dir));

    let mut node = DatasetNode::new(
        path.to_path_buf(),
        &relative_to(root, path),
        parsed.format,
    );
    node.set_attribute("version", &parsed.version);
    for (key, value) in &parsed.attributes {
        node.set_attribute(key, value);
    }
    node.series = parsed.series.clone();
    experiment.datasets.push(node);
}

fn attach(root: &Utf8Path, path: &Utf8Path, tree: &mut RootNode) {
    let Some(experiment_dir) = path.parent() else {
        return;
    };
    let Some(name) = experiment_dir.file_name() else {
        return;
    };
    let experiment = tree.experiment_entry(name, &relative_to(root, experiment_dir));
    experiment.attachments.push(relative_to(root, path));
}
