//! Repository-wide information.

use axum::routing::get;
use axum::Router;

use crate::ServiceState;

mod stats;

pub use stats::{StatsError, StatsRequest, StatsResponse};

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .route("/stats", get(stats::handler))
        .with_state(state)
}
