use std::fmt;
use std::path::PathBuf;

use clap::Args;
use owo_colors::OwoColorize;

use quarry_daemon::http_server::api::client::{ApiClient, ApiError, ApiRequest};
use quarry_daemon::http_server::health::liveness::LivezRequest;
use quarry_daemon::http_server::health::readiness::ReadyzRequest;
use quarry_daemon::state::AppState;

#[derive(Args, Debug, Clone)]
pub struct Health;

#[derive(Debug)]
pub struct ConfigInfo {
    pub directory: PathBuf,
    pub root_dir: PathBuf,
    pub listen_port: u16,
}

#[derive(Debug)]
pub enum EndpointStatus {
    Ok,
    Unhealthy(String),
    NotReachable,
}

#[derive(Debug)]
pub struct DaemonInfo {
    pub url: String,
    pub livez: EndpointStatus,
    pub readyz: EndpointStatus,
}

#[derive(Debug)]
pub struct HealthOutput {
    pub config: Option<ConfigInfo>,
    pub config_error: Option<String>,
    pub daemon: DaemonInfo,
}

impl fmt::Display for HealthOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", "Config".bold())?;
        match &self.config {
            Some(info) => {
                writeln!(
                    f,
                    "  {} {}",
                    "directory:".dimmed(),
                    info.directory.display()
                )?;
                writeln!(f, "  {} {}", "config.toml:".dimmed(), "OK".green())?;
                writeln!(f, "  {} {}", "root_dir:".dimmed(), info.root_dir.display())?;
                writeln!(f, "  {} {}", "listen_port:".dimmed(), info.listen_port)?;
            }
            None => {
                if let Some(err) = &self.config_error {
                    writeln!(f, "  {} {}", "error:".red(), err)?;
                }
            }
        }

        writeln!(f)?;
        writeln!(f, "{} ({}):", "Daemon".bold(), self.daemon.url)?;

        let status_str = |s: &EndpointStatus| -> String {
            match s {
                EndpointStatus::Ok => "OK".green().to_string(),
                EndpointStatus::Unhealthy(code) => format!("{} ({})", "UNHEALTHY".red(), code),
                EndpointStatus::NotReachable => "NOT REACHABLE".red().to_string(),
            }
        };

        writeln!(
            f,
            "  {} {}",
            "livez:".dimmed(),
            status_str(&self.daemon.livez)
        )?;
        write!(
            f,
            "  {} {}",
            "readyz:".dimmed(),
            status_str(&self.daemon.readyz)
        )
    }
}

async fn check_endpoint<R: ApiRequest>(client: &ApiClient, request: R) -> EndpointStatus {
    match client.call(request).await {
        Ok(_) => EndpointStatus::Ok,
        Err(ApiError::HttpStatus(status, _)) => EndpointStatus::Unhealthy(status.to_string()),
        Err(_) => EndpointStatus::NotReachable,
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Health {
    type Error = std::convert::Infallible;
    type Output = HealthOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (config, config_error) = match AppState::load(ctx.config_path.clone()) {
            Ok(state) => (
                Some(ConfigInfo {
                    directory: state.quarry_dir,
                    root_dir: state.config.root_dir,
                    listen_port: state.config.listen_port,
                }),
                None,
            ),
            Err(e) => (None, Some(e.to_string())),
        };

        let livez = check_endpoint(&ctx.client, LivezRequest {}).await;
        let readyz = check_endpoint(&ctx.client, ReadyzRequest {}).await;

        Ok(HealthOutput {
            config,
            config_error,
            daemon: DaemonInfo {
                url: ctx.client.base_url().to_string(),
                livez,
                readyz,
            },
        })
    }
}
