use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{InstrumentFamily, ProjectRef};
use crate::error::ImporterError;

/// Environment variable consulted when no explicit config path is given.
pub const CONFIG_ENV: &str = "LAB_IMPORTER_CONFIG";

/// Highest config schema this build understands.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_root: Option<String>,
    #[serde(default)]
    pub instrument: Option<InstrumentFamily>,
    #[serde(default)]
    pub project: Option<ProjectEntry>,
    #[serde(default)]
    pub parallel: Option<bool>,
    #[serde(default)]
    pub expected_hardware: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ProjectEntry {
    Shorthand(String),
    Detailed(ProjectEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ProjectEntryObject {
    pub code: String,
    pub identifier: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub data_root: Option<Utf8PathBuf>,
    pub instrument: InstrumentFamily,
    pub project: Option<ProjectRef>,
    pub parallel: bool,
    pub expected_hardware: Option<String>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads and validates a config file. An explicit `path` wins over the
    /// `LAB_IMPORTER_CONFIG` environment variable, which wins over the
    /// per-user default location.
    pub fn resolve(path: Option<&Utf8Path>) -> Result<ResolvedConfig, ImporterError> {
        let config_path = match path {
            Some(path) => path.to_owned(),
            None => match std::env::var(CONFIG_ENV) {
                Ok(value) if !value.is_empty() => Utf8PathBuf::from(value),
                _ => default_config_path().ok_or(ImporterError::MissingConfig)?,
            },
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Err(ImporterError::MissingConfig);
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| ImporterError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| ImporterError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, ImporterError> {
        let schema_version = config.schema_version.unwrap_or(SCHEMA_VERSION);
        if schema_version != SCHEMA_VERSION {
            return Err(ImporterError::UnsupportedSchema(schema_version));
        }

        let project = config.project.map(resolve_project).transpose()?;

        Ok(ResolvedConfig {
            schema_version,
            data_root: config.data_root.map(Utf8PathBuf::from),
            instrument: config.instrument.unwrap_or(InstrumentFamily::Flow),
            project,
            parallel: config.parallel.unwrap_or(false),
            expected_hardware: config.expected_hardware.filter(|value| !value.is_empty()),
        })
    }
}

fn resolve_project(entry: ProjectEntry) -> Result<ProjectRef, ImporterError> {
    match entry {
        ProjectEntry::Shorthand(identifier) => identifier.parse(),
        ProjectEntry::Detailed(obj) => {
            if obj.code.is_empty() || !obj.identifier.starts_with('/') {
                return Err(ImporterError::InvalidProject(obj.identifier));
            }
            Ok(ProjectRef {
                code: obj.code,
                identifier: obj.identifier,
            })
        }
    }
}

/// `<user config dir>/lab-importer/config.json`, when the platform has one.
pub fn default_config_path() -> Option<Utf8PathBuf> {
    BaseDirs::new().and_then(|dirs| {
        Utf8PathBuf::from_path_buf(dirs.config_dir().join("lab-importer").join("config.json")).ok()
    })
}
