use axum::Router;

use crate::ServiceState;

pub mod repository;

pub fn router(state: ServiceState) -> Router<ServiceState> {
    Router::new()
        .nest("/repository", repository::router(state.clone()))
        .with_state(state)
}
