// Service modules (daemon functionality)
pub mod http_server;
pub mod process;
pub mod service_config;
pub mod service_state;
pub mod transactions;
pub mod version;

// App state (configuration, paths)
pub mod state;

pub use process::{spawn_service, start_service, ServiceError, ShutdownHandle};
pub use service_config::Config as ServiceConfig;
pub use service_state::{State as ServiceState, StateSetupError};
pub use state::{AppConfig, AppState, StateError};

/// Name and version of this build, as reported by `/_status/version`.
pub fn build_info() -> version::BuildInfo {
    version::BuildInfo::new()
}
