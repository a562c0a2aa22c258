//! Projection of a validated experiment onto registration identifiers.

use serde::Serialize;

use crate::descriptor::{ContainerKind, ContainerNode, ExperimentNode};
use crate::domain::ProjectRef;

/// Identifier pair the registration side consumes for one experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationIds {
    pub experiment: String,
    pub space: String,
}

/// Derives registration identifiers from an experiment subtree and the
/// target project it should land in.
pub struct MetadataMapper<'a> {
    experiment: &'a ExperimentNode,
    project: &'a ProjectRef,
}

impl<'a> MetadataMapper<'a> {
    pub fn new(experiment: &'a ExperimentNode, project: &'a ProjectRef) -> Self {
        Self {
            experiment,
            project,
        }
    }

    /// `<project identifier>/<experiment code>`, uppercased.
    pub fn experiment_identifier(&self) -> String {
        format!("{}/{}", self.project.identifier, self.experiment.code).to_uppercase()
    }

    /// The project identifier truncated at the first `/` past the leading
    /// one, uppercased. A project identifier without that slash yields the
    /// sentinel `INVALID`; callers report it instead of aborting.
    pub fn space_identifier(&self) -> String {
        let identifier = self.project.identifier.as_str();
        match identifier.get(1..).and_then(|rest| rest.find('/')) {
            Some(index) => identifier[..index + 1].to_uppercase(),
            None => "INVALID".to_string(),
        }
    }

    pub fn identifiers(&self) -> RegistrationIds {
        RegistrationIds {
            experiment: self.experiment_identifier(),
            space: self.space_identifier(),
        }
    }

    /// Trays of the mapped experiment, for geometry-dependent registration.
    pub fn trays(&self) -> impl Iterator<Item = &'a ContainerNode> {
        self.experiment
            .containers
            .iter()
            .filter(|container| container.kind == ContainerKind::Tray)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(identifier: &str) -> ProjectRef {
        ProjectRef {
            code: "PROJECT".to_string(),
            identifier: identifier.to_string(),
        }
    }

    #[test]
    fn experiment_identifier_is_uppercased_path() {
        let experiment = ExperimentNode::new("My Exp", "My Exp");
        let project = project("/space/project");
        let mapper = MetadataMapper::new(&experiment, &project);
        assert_eq!(mapper.experiment_identifier(), "/SPACE/PROJECT/MY_EXP");
    }

    #[test]
    fn space_identifier_truncates_at_second_slash() {
        let experiment = ExperimentNode::new("E", "E");
        let project = project("/Space/Project");
        let mapper = MetadataMapper::new(&experiment, &project);
        assert_eq!(mapper.space_identifier(), "/SPACE");
    }

    #[test]
    fn space_identifier_without_second_slash_is_sentinel() {
        let experiment = ExperimentNode::new("E", "E");
        for identifier in ["/SPACE", "", "/"] {
            let project = project(identifier);
            let mapper = MetadataMapper::new(&experiment, &project);
            assert_eq!(mapper.space_identifier(), "INVALID");
        }
    }

    #[test]
    fn identifiers_bundle_both_derivations() {
        let experiment = ExperimentNode::new("Eva Spore Counting 190612", "Eva Spore Counting 190612");
        let project = project("/BIOL/FLOW");
        let mapper = MetadataMapper::new(&experiment, &project);
        assert_eq!(
            mapper.identifiers(),
            RegistrationIds {
                experiment: "/BIOL/FLOW/EVA_SPORE_COUNTING_190612".to_string(),
                space: "/BIOL".to_string(),
            }
        );
    }

    #[test]
    fn trays_filters_out_other_containers() {
        let mut experiment = ExperimentNode::new("E", "E");
        experiment.container_entry("Plate 1", ContainerKind::Tray);
        experiment.container_entry("Specimen_001", ContainerKind::Specimen);
        let project = project("/S/P");
        let mapper = MetadataMapper::new(&experiment, &project);
        let trays: Vec<&str> = mapper.trays().map(|tray| tray.name.as_str()).collect();
        assert_eq!(trays, ["Plate 1"]);
    }
}
