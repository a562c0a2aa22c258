use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::Serialize;

use crate::domain::{FormatType, TrayGeometry};
use crate::readers::{AttributeMap, SeriesInfo};

/// Closed set of node tags; rendering and validation policy key off these,
/// never off structural identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Root,
    Experiment,
    Tray,
    Specimen,
    Tube,
    Well,
    Dataset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerKind {
    Tray,
    Specimen,
    Tube,
    Well,
}

impl ContainerKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            ContainerKind::Tray => NodeType::Tray,
            ContainerKind::Specimen => NodeType::Specimen,
            ContainerKind::Tube => NodeType::Tube,
            ContainerKind::Well => NodeType::Well,
        }
    }
}

/// Folder- and file-name characters outside `[A-Za-z0-9-_]` collapse to
/// underscores when a name becomes a registration code.
pub fn sanitize_code(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// The scanned user folder; owns the whole discovered hierarchy.
#[derive(Debug, Clone, Serialize)]
pub struct RootNode {
    pub name: String,
    pub path: Utf8PathBuf,
    pub attributes: AttributeMap,
    pub experiments: Vec<ExperimentNode>,
}

impl RootNode {
    pub fn new(path: Utf8PathBuf) -> RootNode {
        let name = path
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| path.to_string());
        RootNode {
            name,
            path,
            attributes: IndexMap::new(),
            experiments: Vec::new(),
        }
    }

    pub fn experiment(&self, name: &str) -> Option<&ExperimentNode> {
        self.experiments
            .iter()
            .find(|experiment| experiment.name == name)
    }

    /// Find or create the experiment with this name, preserving discovery
    /// order.
    pub fn experiment_entry(&mut self, name: &str, relative_path: &str) -> &mut ExperimentNode {
        let index = match self
            .experiments
            .iter()
            .position(|experiment| experiment.name == name)
        {
            Some(index) => index,
            None => {
                self.experiments
                    .push(ExperimentNode::new(name, relative_path));
                self.experiments.len() - 1
            }
        };
        &mut self.experiments[index]
    }

    /// Depth-first pre-order traversal over every node in the tree.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            stack: vec![Descriptor::Root(self)],
        }
    }

    pub fn count(&self, node_type: NodeType) -> usize {
        self.walk()
            .filter(|descriptor| descriptor.node_type() == node_type)
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentNode {
    pub name: String,
    pub code: String,
    pub relative_path: String,
    pub attributes: AttributeMap,
    pub containers: Vec<ContainerNode>,
    pub datasets: Vec<DatasetNode>,
    /// Root-relative paths of documents filed alongside the data.
    pub attachments: Vec<String>,
}

impl ExperimentNode {
    pub fn new(name: &str, relative_path: &str) -> ExperimentNode {
        ExperimentNode {
            name: name.to_string(),
            code: sanitize_code(name),
            relative_path: relative_path.to_string(),
            attributes: IndexMap::new(),
            containers: Vec::new(),
            datasets: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn container_entry(&mut self, name: &str, kind: ContainerKind) -> &mut ContainerNode {
        let index = match self
            .containers
            .iter()
            .position(|container| container.name == name && container.kind == kind)
        {
            Some(index) => index,
            None => {
                self.containers.push(ContainerNode::new(name, kind));
                self.containers.len() - 1
            }
        };
        &mut self.containers[index]
    }

    /// Record an attribute unless an earlier file already set it, so rebuild
    /// order cannot flip values.
    pub fn set_attribute(&mut self, key: &str, value: &str) {
        self.attributes
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerNode {
    pub name: String,
    pub kind: ContainerKind,
    pub geometry: Option<TrayGeometry>,
    pub attributes: AttributeMap,
    pub children: Vec<ContainerNode>,
    pub datasets: Vec<DatasetNode>,
}

impl ContainerNode {
    pub fn new(name: &str, kind: ContainerKind) -> ContainerNode {
        ContainerNode {
            name: name.to_string(),
            kind,
            geometry: None,
            attributes: IndexMap::new(),
            children: Vec::new(),
            datasets: Vec::new(),
        }
    }

    pub fn child_entry(&mut self, name: &str, kind: ContainerKind) -> &mut ContainerNode {
        let index = match self
            .children
            .iter()
            .position(|child| child.name == name && child.kind == kind)
        {
            Some(index) => index,
            None => {
                self.children.push(ContainerNode::new(name, kind));
                self.children.len() - 1
            }
        };
        &mut self.children[index]
    }

    pub fn set_attribute(&mut self, key: &str, value: &str) {
        self.attributes
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }
}

/// One acquisition file, with the metadata its reader extracted.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetNode {
    pub name: String,
    pub path: Utf8PathBuf,
    pub relative_path: String,
    pub format: FormatType,
    pub attributes: AttributeMap,
    pub series: Vec<SeriesInfo>,
}

impl DatasetNode {
    pub fn new(
        path: Utf8PathBuf,
        relative_path: &str,
        format: FormatType,
    ) -> DatasetNode {
        let name = path
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| path.to_string());
        DatasetNode {
            name,
            path,
            relative_path: relative_path.to_string(),
            format,
            attributes: IndexMap::new(),
            series: Vec::new(),
        }
    }

    pub fn set_attribute(&mut self, key: &str, value: &str) {
        self.attributes
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }
}

/// Borrowed view over any node for uniform dispatch by tag.
#[derive(Debug, Clone, Copy)]
pub enum Descriptor<'a> {
    Root(&'a RootNode),
    Experiment(&'a ExperimentNode),
    Container(&'a ContainerNode),
    Dataset(&'a DatasetNode),
}

impl<'a> Descriptor<'a> {
    pub fn node_type(&self) -> NodeType {
        match self {
            Descriptor::Root(_) => NodeType::Root,
            Descriptor::Experiment(_) => NodeType::Experiment,
            Descriptor::Container(container) => container.kind.node_type(),
            Descriptor::Dataset(_) => NodeType::Dataset,
        }
    }

    pub fn name(&self) -> &'a str {
        match self {
            Descriptor::Root(root) => &root.name,
            Descriptor::Experiment(experiment) => &experiment.name,
            Descriptor::Container(container) => &container.name,
            Descriptor::Dataset(dataset) => &dataset.name,
        }
    }

    pub fn attributes(&self) -> &'a AttributeMap {
        match self {
            Descriptor::Root(root) => &root.attributes,
            Descriptor::Experiment(experiment) => &experiment.attributes,
            Descriptor::Container(container) => &container.attributes,
            Descriptor::Dataset(dataset) => &dataset.attributes,
        }
    }
}

pub struct Walk<'a> {
    stack: Vec<Descriptor<'a>>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = Descriptor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let descriptor = self.stack.pop()?;
        match descriptor {
            Descriptor::Root(root) => {
                for experiment in root.experiments.iter().rev() {
                    self.stack.push(Descriptor::Experiment(experiment));
                }
            }
            Descriptor::Experiment(experiment) => {
                for dataset in experiment.datasets.iter().rev() {
                    self.stack.push(Descriptor::Dataset(dataset));
                }
                for container in experiment.containers.iter().rev() {
                    self.stack.push(Descriptor::Container(container));
                }
            }
            Descriptor::Container(container) => {
                for dataset in container.datasets.iter().rev() {
                    self.stack.push(Descriptor::Dataset(dataset));
                }
                for child in container.children.iter().rev() {
                    self.stack.push(Descriptor::Container(child));
                }
            }
            Descriptor::Dataset(_) => {}
        }
        Some(descriptor)
    }
}
