use std::net::SocketAddr;
use std::path::PathBuf;

use common::delivery::DEFAULT_MAX_BUFFER_SIZE;

use crate::state::{AppState, DEFAULT_LISTEN_PORT, DEFAULT_MAX_UPLOAD_SIZE};

/// Everything the running service needs, resolved from [`AppState`] and CLI flags.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub root_dir: PathBuf,
    pub read_only: bool,
    pub max_buffer_size: usize,
    pub max_upload_size: usize,
    /// SQLite file for extra properties; in-memory when unset
    pub props_db: Option<PathBuf>,
    pub log_level: tracing::Level,
}

impl Config {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_LISTEN_PORT)),
            root_dir: root_dir.into(),
            read_only: true,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            props_db: None,
            log_level: tracing::Level::INFO,
        }
    }
}

impl From<&AppState> for Config {
    fn from(state: &AppState) -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], state.config.listen_port)),
            root_dir: state.config.root_dir.clone(),
            read_only: state.config.read_only,
            max_buffer_size: state.config.max_buffer_size,
            max_upload_size: state.config.max_upload_size,
            props_db: Some(state.props_path.clone()),
            log_level: tracing::Level::INFO,
        }
    }
}
