use std::sync::Arc;

use common::delivery::{RangeError, RangeServer};
use common::digest::DigestCache;
use common::extra_props::ExtraPropertiesStore;
use common::federation::{FederationConfig, FederationError, FileSystemConnector};
use props_store::{DatabaseError, SqliteExtraProperties};

use super::service_config::Config;
use crate::transactions::Transactions;

/// Main service state, shared by every request handler.
#[derive(Debug, Clone)]
pub struct State {
    connector: Arc<FileSystemConnector>,
    ranges: RangeServer,
    transactions: Transactions,
    max_upload_size: usize,
}

impl State {
    pub async fn from_config(config: &Config) -> Result<Self, StateSetupError> {
        // 1. Setup the extra properties store
        let props: Arc<dyn ExtraPropertiesStore> = match &config.props_db {
            Some(path) => {
                tracing::info!("Extra properties database: {}", path.display());
                Arc::new(SqliteExtraProperties::new(path).await?)
            }
            None => {
                tracing::info!("Extra properties database: in-memory");
                Arc::new(SqliteExtraProperties::in_memory().await?)
            }
        };

        Self::with_properties(config, props).await
    }

    /// Build the state around an already constructed properties store.
    pub async fn with_properties(
        config: &Config,
        props: Arc<dyn ExtraPropertiesStore>,
    ) -> Result<Self, StateSetupError> {
        // 2. Setup the connector over the mapped root
        let digests = DigestCache::new(props.clone());
        let federation = FederationConfig {
            root: config.root_dir.clone(),
            read_only: config.read_only,
        };
        let connector = FileSystemConnector::initialize(federation, props, digests).await?;

        // 3. Setup range delivery
        let ranges = RangeServer::new(config.max_buffer_size)?;
        tracing::info!(
            root = %connector.root().display(),
            max_buffer_size = config.max_buffer_size,
            "service state ready"
        );

        Ok(Self {
            connector: Arc::new(connector),
            ranges,
            transactions: Transactions::new(),
            max_upload_size: config.max_upload_size,
        })
    }

    pub fn connector(&self) -> &FileSystemConnector {
        &self.connector
    }

    pub fn ranges(&self) -> &RangeServer {
        &self.ranges
    }

    pub fn transactions(&self) -> &Transactions {
        &self.transactions
    }

    pub fn extra_properties(&self) -> &Arc<dyn ExtraPropertiesStore> {
        self.connector.extra_properties()
    }

    pub fn max_upload_size(&self) -> usize {
        self.max_upload_size
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("Extra properties database error: {0}")]
    PropsStore(#[from] DatabaseError),
    #[error("Federation setup error: {0}")]
    Federation(#[from] FederationError),
    #[error("Invalid range configuration: {0}")]
    Range(#[from] RangeError),
}
