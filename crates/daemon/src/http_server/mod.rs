//! HTTP surface of the repository.
//!
//! Fixed routes cover health and the JSON API. Every other path is a resource
//! identifier (optionally scoped by a leading `tx:<uuid>` segment) and is dispatched
//! by [`content::handler`].

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::ServiceState;

pub mod api;
pub mod content;
pub mod health;
mod tx;

pub fn router(state: ServiceState) -> Router {
    Router::new()
        .nest("/_status", health::router(state.clone()))
        .nest("/api/v0", api::v0::router(state.clone()))
        .fallback(content::handler)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
