use std::collections::BTreeMap;
use std::sync::Arc;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::{BackendConnection, Persona, PersonaParams, ValidationError};

#[cfg(not(test))]
use super::CONFIG;

use super::constants::LOG_FILE_PATH;
use super::defaults::*;

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Configuration {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Persona id -> parameters
    #[serde(default)]
    pub personas: BTreeMap<String, PersonaParams>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct GeneralConfig {
    #[serde(default)]
    pub verbose: bool,

    /// Persona selected at startup, the first one otherwise.
    #[serde(default)]
    pub default_persona: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogConfig {
    #[serde(default = "log_level")]
    pub level: Option<String>,

    #[serde(default)]
    pub filters: Option<Vec<LogFilter>>,

    #[serde(default)]
    pub file: LogFile,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogFilter {
    #[serde(default)]
    pub module: Option<String>,

    #[serde(default)]
    pub level: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogFile {
    #[serde(default = "log_file_path")]
    pub path: String,

    #[serde(default)]
    pub append: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub timeout_secs: Option<u16>,

    #[serde(default)]
    pub connections: Vec<BackendConnection>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub enum StorageConfig {
    #[serde(rename = "sqlite")]
    Sqlite(SqliteStorage),
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct SqliteStorage {
    pub path: Option<String>,
}

impl Configuration {
    #[cfg(not(test))]
    pub fn instance() -> &'static Configuration {
        CONFIG.get().expect("Config not initialized")
    }

    #[cfg(not(test))]
    pub fn init(config: Configuration) -> Result<()> {
        CONFIG
            .set(config)
            .map_err(|_| eyre::eyre!("Config already initialized"))?;
        Ok(())
    }

    #[cfg(test)]
    pub fn instance() -> &'static Configuration {
        use super::TEST_CONFIG;
        TEST_CONFIG.with(|config| *config.borrow())
    }

    #[cfg(test)]
    pub fn init(config: Configuration) -> Result<()> {
        use super::TEST_CONFIG;
        TEST_CONFIG.with(|test_config| {
            *test_config.borrow_mut() = Box::leak(Box::new(config));
        });
        Ok(())
    }

    /// Build the configured personas. Each persona must name an enabled
    /// backend connection; its kind supplies default file capabilities.
    pub fn build_personas(&self) -> Result<Vec<Arc<Persona>>> {
        if self.personas.is_empty() {
            return Err(ValidationError::NoPersonas.into());
        }

        let mut personas = vec![];
        for (id, params) in &self.personas {
            let connection = self
                .backend
                .connections
                .iter()
                .filter(|c| c.enabled())
                .find(|c| c.name() == params.provider);
            if connection.is_none() {
                log::warn!(
                    "Persona {} refers to unknown or disabled connection {}",
                    id,
                    params.provider
                );
            }

            let persona = Persona::from_params(id, params, connection.map(|c| c.kind()))
                .wrap_err(format!("building persona {}", id))?;
            personas.push(Arc::new(persona));
        }
        Ok(personas)
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Some("info".to_string()),
            file: LogFile::default(),
            filters: None,
        }
    }
}

impl Default for LogFile {
    fn default() -> Self {
        Self {
            path: LOG_FILE_PATH.to_string(),
            append: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Sqlite(SqliteStorage::default())
    }
}
