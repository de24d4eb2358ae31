use std::path::PathBuf;

use clap::Args;

use quarry_daemon::state::AppState;
use quarry_daemon::{spawn_service, ServiceConfig};

#[derive(Args, Debug, Clone)]
pub struct Daemon {
    /// Override the configured repository root
    #[arg(long, env = "QUARRY_ROOT_DIR")]
    pub root_dir: Option<PathBuf>,

    /// Override the configured listen port
    #[arg(long, env = "QUARRY_LISTEN_PORT")]
    pub listen_port: Option<u16>,

    /// Override the configured maximum buffer size (bytes)
    #[arg(long)]
    pub max_buffer_size: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("state error: {0}")]
    StateError(#[from] quarry_daemon::state::StateError),

    #[error("daemon failed: {0}")]
    Failed(#[from] quarry_daemon::ServiceError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Daemon {
    type Error = DaemonError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        // Load state from config path (or default ~/.quarry)
        let state = AppState::load(ctx.config_path.clone())?;

        let mut config = ServiceConfig::from(&state);
        if let Some(root_dir) = &self.root_dir {
            config.root_dir = root_dir.clone();
        }
        if let Some(port) = self.listen_port {
            config.listen_addr.set_port(port);
        }
        if let Some(size) = self.max_buffer_size {
            config.max_buffer_size = size;
        }

        spawn_service(&config).await?;
        Ok("daemon ended".to_string())
    }
}
