//! Service lifecycle: build state, serve HTTP, shut down on request or Ctrl-C.

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::http_server;
use crate::service_config::Config;
use crate::service_state::{State, StateSetupError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service setup failed: {0}")]
    Setup(#[from] StateSetupError),
    #[error("http server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Signals a running service to stop accepting connections and drain.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(self) {
        let _ = self.tx.send(true);
    }
}

/// Start the service in the background.
///
/// Returns the shared state, a shutdown handle and the server task, which resolves
/// once the server has drained.
pub async fn start_service(
    config: &Config,
) -> Result<(State, ShutdownHandle, JoinHandle<Result<(), ServiceError>>), ServiceError> {
    let state = State::from_config(config).await?;
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    let (tx, mut rx) = watch::channel(false);
    let app = http_server::router(state.clone());
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                while rx.changed().await.is_ok() {
                    if *rx.borrow() {
                        break;
                    }
                }
            })
            .await?;
        tracing::info!("http server stopped");
        Ok::<(), ServiceError>(())
    });

    Ok((state, ShutdownHandle { tx }, task))
}

/// Run the service until Ctrl-C.
pub async fn spawn_service(config: &Config) -> Result<(), ServiceError> {
    let (_state, shutdown, mut task) = start_service(config).await?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("shutdown requested");
            shutdown.shutdown();
        }
        joined = &mut task => return flatten(joined),
    }

    flatten(task.await)
}

fn flatten(
    joined: Result<Result<(), ServiceError>, tokio::task::JoinError>,
) -> Result<(), ServiceError> {
    match joined {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("http server task failed: {}", e);
            Ok(())
        }
    }
}
