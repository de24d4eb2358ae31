use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;

use common::delivery::DEFAULT_MAX_BUFFER_SIZE;
use quarry_daemon::state::{AppConfig, AppState, DEFAULT_LISTEN_PORT};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Directory to serve as the repository root
    #[arg(long, env = "QUARRY_ROOT_DIR", default_value = ".")]
    pub root_dir: PathBuf,

    /// HTTP listen port
    #[arg(long, default_value_t = DEFAULT_LISTEN_PORT)]
    pub listen_port: u16,

    /// Largest chunk (bytes) held in memory while serving content
    #[arg(long, default_value_t = DEFAULT_MAX_BUFFER_SIZE)]
    pub max_buffer_size: usize,

    /// Write daily rolling logs to this directory instead of stderr
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub struct InitOutput {
    pub quarry_dir: PathBuf,
    pub config_path: PathBuf,
    pub props_path: PathBuf,
    pub root_dir: PathBuf,
    pub listen_port: u16,
    pub max_buffer_size: usize,
}

impl fmt::Display for InitOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} quarry at {}",
            "Initialized".green().bold(),
            self.quarry_dir.display().to_string().bold()
        )?;
        writeln!(f, "  {} {}", "Config:".dimmed(), self.config_path.display())?;
        writeln!(f, "  {} {}", "Properties:".dimmed(), self.props_path.display())?;
        writeln!(f, "  {} {}", "Root:".dimmed(), self.root_dir.display())?;
        writeln!(f, "  {} {}", "Listen port:".dimmed(), self.listen_port)?;
        write!(
            f,
            "  {} {} bytes",
            "Max buffer:".dimmed(),
            self.max_buffer_size
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] quarry_daemon::state::StateError),

    #[error("invalid root directory {}: {}", .0.display(), .1)]
    InvalidRoot(PathBuf, std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = InitOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let root_dir = std::fs::canonicalize(&self.root_dir)
            .map_err(|e| InitError::InvalidRoot(self.root_dir.clone(), e))?;

        let mut config = AppConfig::new(root_dir);
        config.listen_port = self.listen_port;
        config.max_buffer_size = self.max_buffer_size;
        config.log_dir = self.log_dir.clone();

        let state = AppState::init(ctx.config_path.clone(), config)?;

        Ok(InitOutput {
            quarry_dir: state.quarry_dir,
            config_path: state.config_path,
            props_path: state.props_path,
            root_dir: state.config.root_dir,
            listen_port: state.config.listen_port,
            max_buffer_size: state.config.max_buffer_size,
        })
    }
}
