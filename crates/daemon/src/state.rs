//! On-disk application state: the config directory and its `config.toml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use common::delivery::DEFAULT_MAX_BUFFER_SIZE;

pub const APP_NAME: &str = "quarry";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const PROPS_DB_FILE_NAME: &str = "props.sqlite";

pub const DEFAULT_LISTEN_PORT: u16 = 8080;
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Directory projected as the repository root
    pub root_dir: PathBuf,
    #[serde(default = "default_read_only")]
    pub read_only: bool,
    /// Largest chunk held in memory while serving content
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: usize,
    /// SQLite file for extra properties; `<config dir>/props.sqlite` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props_db: Option<PathBuf>,
    /// Write daily rolling logs here instead of stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

fn default_read_only() -> bool {
    true
}

fn default_max_buffer_size() -> usize {
    DEFAULT_MAX_BUFFER_SIZE
}

fn default_max_upload_size() -> usize {
    DEFAULT_MAX_UPLOAD_SIZE
}

impl AppConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            root_dir: root_dir.into(),
            read_only: true,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            props_db: None,
            log_dir: None,
        }
    }

    pub fn validate(&self) -> Result<(), StateError> {
        if !self.read_only {
            return Err(StateError::InvalidConfig(
                "read_only must be true; writable federation is not supported".to_string(),
            ));
        }
        if self.max_buffer_size == 0 {
            return Err(StateError::InvalidConfig(
                "max_buffer_size must be positive".to_string(),
            ));
        }
        if self.max_upload_size == 0 {
            return Err(StateError::InvalidConfig(
                "max_upload_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub quarry_dir: PathBuf,
    pub config_path: PathBuf,
    pub props_path: PathBuf,
    pub config: AppConfig,
}

impl AppState {
    /// Config directory: `path` if given, else `~/.quarry`.
    pub fn quarry_dir(path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        match path {
            Some(p) => Ok(p),
            None => dirs::home_dir()
                .map(|home| home.join(format!(".{}", APP_NAME)))
                .ok_or(StateError::NoHomeDirectory),
        }
    }

    /// Create the config directory and write `config`. Fails if already initialized.
    pub fn init(path: Option<PathBuf>, config: AppConfig) -> Result<Self, StateError> {
        config.validate()?;
        let quarry_dir = Self::quarry_dir(path)?;
        let config_path = quarry_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Err(StateError::AlreadyInitialized(quarry_dir));
        }

        std::fs::create_dir_all(&quarry_dir)?;
        let raw = toml::to_string_pretty(&config)?;
        std::fs::write(&config_path, raw)?;
        tracing::info!("initialized {} at {}", APP_NAME, quarry_dir.display());

        Ok(Self::assemble(quarry_dir, config_path, config))
    }

    pub fn load(path: Option<PathBuf>) -> Result<Self, StateError> {
        let quarry_dir = Self::quarry_dir(path)?;
        let config_path = quarry_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::NotInitialized(quarry_dir));
        }

        let raw = std::fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&raw)?;
        config.validate()?;

        Ok(Self::assemble(quarry_dir, config_path, config))
    }

    fn assemble(quarry_dir: PathBuf, config_path: PathBuf, config: AppConfig) -> Self {
        let props_path = config
            .props_db
            .clone()
            .unwrap_or_else(|| quarry_dir.join(PROPS_DB_FILE_NAME));
        Self {
            quarry_dir,
            config_path,
            props_path,
            config,
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.config.root_dir
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("could not determine home directory")]
    NoHomeDirectory,
    #[error("{} is not initialized; run `quarry init`", .0.display())]
    NotInitialized(PathBuf),
    #[error("{} is already initialized", .0.display())]
    AlreadyInitialized(PathBuf),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to write config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let quarry_dir = dir.path().join("cfg");
        let mut config = AppConfig::new("/srv/data");
        config.listen_port = 9000;

        let state = AppState::init(Some(quarry_dir.clone()), config.clone()).unwrap();
        assert_eq!(state.config_path, quarry_dir.join(CONFIG_FILE_NAME));
        assert_eq!(state.props_path, quarry_dir.join(PROPS_DB_FILE_NAME));

        let loaded = AppState::load(Some(quarry_dir)).unwrap();
        assert_eq!(loaded.config, config);
    }

    #[test]
    fn test_init_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = Some(dir.path().to_path_buf());
        AppState::init(path.clone(), AppConfig::new("/srv")).unwrap();
        assert!(matches!(
            AppState::init(path, AppConfig::new("/srv")),
            Err(StateError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn test_load_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppState::load(Some(dir.path().to_path_buf())),
            Err(StateError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: AppConfig = toml::from_str("root_dir = \"/srv\"").unwrap();
        assert_eq!(config.listen_port, DEFAULT_LISTEN_PORT);
        assert!(config.read_only);
        assert_eq!(config.max_buffer_size, DEFAULT_MAX_BUFFER_SIZE);
        assert!(config.props_db.is_none());
    }

    #[test]
    fn test_validate_rejects_writable_and_zero_buffer() {
        let mut config = AppConfig::new("/srv");
        config.read_only = false;
        assert!(config.validate().is_err());

        let mut config = AppConfig::new("/srv");
        config.max_buffer_size = 0;
        assert!(config.validate().is_err());
    }
}
