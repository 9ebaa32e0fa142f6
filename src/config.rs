use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::Deserialize;

use crate::dimensions::{
    DEFAULT_OBJECTIVE_COLUMN, DEFAULT_STRUCTURE_COLUMN, objective_for_column,
    structure_for_column,
};
use crate::error::{EtlError, Result};

pub const DEFAULT_CONNECTION_URI: &str = "sqlite://lol_experiment.db";
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// How `dim_team` rows are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TeamKey {
    /// One team row per source row, id = row position + 1.
    #[default]
    Positional,
    /// One team row per (game id, side).
    Natural,
}

impl TeamKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeamKey::Positional => "positional",
            TeamKey::Natural => "natural",
        }
    }
}

/// Options as they appear in a JSON config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub source_path: Option<PathBuf>,
    pub connection_uri: Option<String>,
    pub batch_size: Option<usize>,
    pub team_key: Option<TeamKey>,
    pub objective_column: Option<String>,
    pub structure_column: Option<String>,
}

impl FileConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Fill unset keys from `other`; keys already set here win.
    pub fn or(self, other: FileConfig) -> FileConfig {
        FileConfig {
            source_path: self.source_path.or(other.source_path),
            connection_uri: self.connection_uri.or(other.connection_uri),
            batch_size: self.batch_size.or(other.batch_size),
            team_key: self.team_key.or(other.team_key),
            objective_column: self.objective_column.or(other.objective_column),
            structure_column: self.structure_column.or(other.structure_column),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtlConfig {
    pub source_path: Option<PathBuf>,
    pub connection_uri: String,
    pub batch_size: usize,
    pub team_key: TeamKey,
    pub objective_column: String,
    pub structure_column: String,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            source_path: None,
            connection_uri: DEFAULT_CONNECTION_URI.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            team_key: TeamKey::default(),
            objective_column: DEFAULT_OBJECTIVE_COLUMN.to_string(),
            structure_column: DEFAULT_STRUCTURE_COLUMN.to_string(),
        }
    }
}

impl EtlConfig {
    /// Builds the effective config from `overrides` (usually CLI flags) on top
    /// of an optional config file, on top of the defaults.
    pub fn resolve(config_file: Option<&Path>, overrides: FileConfig) -> Result<Self> {
        let from_file = match config_file {
            Some(path) => FileConfig::from_path(path)?,
            None => FileConfig::default(),
        };

        let merged = overrides.or(from_file);
        let defaults = EtlConfig::default();

        let config = EtlConfig {
            source_path: merged.source_path,
            connection_uri: merged.connection_uri.unwrap_or(defaults.connection_uri),
            batch_size: merged.batch_size.unwrap_or(defaults.batch_size),
            team_key: merged.team_key.unwrap_or(defaults.team_key),
            objective_column: merged.objective_column.unwrap_or(defaults.objective_column),
            structure_column: merged.structure_column.unwrap_or(defaults.structure_column),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EtlError::config("batch_size must be greater than zero"));
        }

        if self.connection_uri.trim().is_empty() {
            return Err(EtlError::config("connection_uri must not be empty"));
        }

        if objective_for_column(&self.objective_column).is_none() {
            return Err(EtlError::config(format!(
                "unknown objective column '{}'",
                self.objective_column
            )));
        }

        if structure_for_column(&self.structure_column).is_none() {
            return Err(EtlError::config(format!(
                "unknown structure column '{}'",
                self.structure_column
            )));
        }

        Ok(())
    }

    pub fn require_source(&self) -> Result<&Path> {
        self.source_path.as_deref().ok_or_else(|| {
            EtlError::config("source_path is required (use --source or the config file)")
        })
    }
}
