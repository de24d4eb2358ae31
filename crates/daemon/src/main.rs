use std::path::PathBuf;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use url::Url;

use quarry_daemon::state::{AppState, DEFAULT_LISTEN_PORT};

mod cli;

use cli::op::{Op, OpContext};
use cli::ops::{Daemon, Health, Init, Version};

crate::command_enum! {
    (Init, Init),
    (Daemon, Daemon),
    (Health, Health),
    (Version, Version),
}

#[derive(Parser, Debug)]
#[command(name = "quarry", author, version, about = "Serve a directory tree as an HTTP content repository")]
struct Cli {
    /// Config directory (defaults to ~/.quarry)
    #[arg(long, global = true, env = "QUARRY_CONFIG_PATH")]
    config_path: Option<PathBuf>,

    /// Address of a running daemon (defaults to the configured listen port on localhost)
    #[arg(long, global = true, env = "QUARRY_REMOTE")]
    remote: Option<Url>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn remote(&self, state: Option<&AppState>) -> anyhow::Result<Url> {
        if let Some(remote) = &self.remote {
            return Ok(remote.clone());
        }
        let port = state
            .map(|s| s.config.listen_port)
            .unwrap_or(DEFAULT_LISTEN_PORT);
        Ok(Url::parse(&format!("http://localhost:{}", port))?)
    }
}

/// Install the global subscriber. The daemon writes to its configured log directory
/// when it has one; everything else logs to stderr.
fn init_tracing(command: &Command, state: Option<&AppState>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = match command {
        Command::Daemon(_) => state.and_then(|s| s.config.log_dir.clone()),
        _ => None,
    };

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "quarry.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    // Missing state is fine for init, version and health
    let state = AppState::load(args.config_path.clone()).ok();
    let _guard = init_tracing(&args.command, state.as_ref());

    let remote = args.remote(state.as_ref())?;
    let ctx = OpContext::new(args.config_path.clone(), &remote)?;

    match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
