use crate::{error::NoteGraphError, properties::NoteId};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{read_to_string, write},
    path::PathBuf,
};

const CONFIG_TABLE: &str = "notegraph";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoteGraphConfig {
    pub root_note_id: NoteId,
    pub path_separator: char,
    /// Start of the UI-only tab disambiguator appended to path strings.
    pub suffix_delimiter: char,
    /// Upper bound on the number of notes any single parent walk may visit.
    pub max_walk_depth: usize,
    /// Fresh attempts a resolution gets after observing an interleaved cache update.
    pub stale_retries: usize,
}

impl Default for NoteGraphConfig {
    fn default() -> Self {
        NoteGraphConfig {
            root_note_id: NoteId::root(),
            path_separator: '/',
            suffix_delimiter: '-',
            max_walk_depth: 10_000,
            stale_retries: 1,
        }
    }
}

impl NoteGraphConfig {
    pub fn from_toml_str(content: &str) -> Result<NoteGraphConfig, NoteGraphError> {
        // other tools may keep their own tables in the same file
        let mut tables: toml::Table = toml::from_str(content)?;
        match tables.remove(CONFIG_TABLE) {
            Some(value) => Ok(value.try_into()?),
            None => Ok(NoteGraphConfig::default()),
        }
    }

    pub fn to_toml_string(&self) -> Result<String, NoteGraphError> {
        let mut tables = BTreeMap::new();
        tables.insert(CONFIG_TABLE.to_string(), self.clone());
        Ok(toml::to_string(&tables)?)
    }

    pub fn validate(&self) -> Result<(), NoteGraphError> {
        if self.root_note_id.is_empty() {
            return Err(NoteGraphError::InvalidInput(
                "root_note_id must not be empty".to_string(),
            ));
        }
        if self.path_separator == self.suffix_delimiter {
            return Err(NoteGraphError::InvalidInput(format!(
                "path_separator and suffix_delimiter must differ, both are '{}'",
                self.path_separator
            )));
        }
        if self.root_note_id.as_str().contains(self.path_separator)
            || self.root_note_id.as_str().contains(self.suffix_delimiter)
        {
            return Err(NoteGraphError::InvalidInput(format!(
                "root_note_id '{}' contains a reserved path character",
                self.root_note_id
            )));
        }
        if self.max_walk_depth == 0 {
            return Err(NoteGraphError::InvalidInput(
                "max_walk_depth must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

pub trait ConfigProvider: Send + Sync {
    fn get_config(&self) -> Result<NoteGraphConfig, NoteGraphError>;
    fn set_config(&self, config: &NoteGraphConfig) -> Result<(), NoteGraphError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }
}

impl ConfigProvider for TomlConfigProvider {
    fn get_config(&self) -> Result<NoteGraphConfig, NoteGraphError> {
        tracing::debug!("Attempting to read config from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(NoteGraphConfig::default());
        }
        let config = NoteGraphConfig::from_toml_str(&read_to_string(&self.path)?)?;
        config.validate()?;
        Ok(config)
    }

    fn set_config(&self, config: &NoteGraphConfig) -> Result<(), NoteGraphError> {
        tracing::debug!("Attempting to write config to: {:?}", &self.path);
        config.validate()?;
        write(&self.path, config.to_toml_string()?)?;
        Ok(())
    }
}
