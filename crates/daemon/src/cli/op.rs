use std::path::PathBuf;

use url::Url;

use quarry_daemon::http_server::api::client::{ApiClient, ApiError};

/// Shared inputs for every command.
#[derive(Debug, Clone)]
pub struct OpContext {
    /// Config directory override; `~/.quarry` when unset
    pub config_path: Option<PathBuf>,
    /// Client for talking to a running daemon
    pub client: ApiClient,
}

impl OpContext {
    pub fn new(config_path: Option<PathBuf>, remote: &Url) -> Result<Self, ApiError> {
        Ok(Self {
            config_path,
            client: ApiClient::new(remote)?,
        })
    }
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;
    type Output: std::fmt::Display + std::fmt::Debug + Send;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

/// Build a clap `Command` enum over op types, plus `OpError`/`OpOutput` wrappers and
/// an [`Op`] impl that dispatches to the selected variant.
#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $ty:ty)),* $(,)?) => {
        #[derive(clap::Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($ty),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$ty as $crate::cli::op::Op>::Error),
            )*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$ty as $crate::cli::op::Op>::Output),)*
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(OpOutput::$variant(output) => write!(f, "{}", output),)*
                }
            }
        }

        #[async_trait::async_trait]
        impl $crate::cli::op::Op for Command {
            type Error = OpError;
            type Output = OpOutput;

            async fn execute(
                &self,
                ctx: &$crate::cli::op::OpContext,
            ) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => op
                            .execute(ctx)
                            .await
                            .map(OpOutput::$variant)
                            .map_err(OpError::$variant),
                    )*
                }
            }
        }
    };
}
