//! `council.toml`: listener, storage, gateway and session defaults.

use std::path::{Path, PathBuf};

use council_core::{Persona, SessionConfig};
use orchestrator::GatewayConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const CONFIG_FILE: &str = "council.toml";
const DATA_DIR_NAME: &str = "council";
const DB_FILE: &str = "council.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to write config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for session logs and the database; platform data dir when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Defaults to `sqlite:<data_dir>/council.db`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

/// Everything the server needs to boot. Missing sections take defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ListenConfig,
    pub storage: StorageConfig,
    pub gateway: GatewayConfig,
    pub defaults: SessionConfig,
    /// Seeded into the persona table at startup
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub personas: Vec<Persona>,
}

impl ServerConfig {
    /// Read `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, toml::to_string_pretty(self)?)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.defaults
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("[defaults] {}", e)))?;

        for persona in &self.personas {
            if persona.id.trim().is_empty() || persona.name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "[[personas]] entries need an id and a name".to_string(),
                ));
            }
        }
        if self.gateway.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "[gateway] base_url must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.storage.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn database_url(&self) -> String {
        self.storage
            .database_url
            .clone()
            .unwrap_or_else(|| format!("sqlite:{}", self.data_dir().join(DB_FILE).display()))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(format!(".{}", DATA_DIR_NAME)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.defaults.worker_count, 3);
    }

    #[test]
    fn test_partial_sections_fill_in() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
[server]
port = 8080

[storage]
data_dir = "/var/lib/council"

[defaults]
worker_count = 4
argument_rounds = 2

[[personas]]
id = "skeptic"
name = "Skeptic"
prompt_template = "Question every assumption."
"#,
        )
        .unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.defaults.worker_count, 4);
        assert_eq!(config.defaults.argument_rounds, 2);
        assert_eq!(config.defaults.refinement_rounds, 2);
        assert_eq!(config.personas.len(), 1);
        assert_eq!(config.personas[0].id, "skeptic");
        assert_eq!(
            config.database_url(),
            "sqlite:/var/lib/council/council.db"
        );
        assert_eq!(config.gateway, GatewayConfig::default());
    }

    #[test]
    fn test_out_of_range_defaults_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[defaults]\nworker_count = 7\n").unwrap();

        assert!(matches!(
            ServerConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let mut config = ServerConfig::default();
        config.gateway.worker_model = "phi3:mini".to_string();
        config.storage.database_url = Some("sqlite::memory:".to_string());

        config.save(&path).unwrap();
        assert!(!path.with_extension("toml.tmp").exists());
        assert_eq!(ServerConfig::load(&path).unwrap(), config);
    }
}
