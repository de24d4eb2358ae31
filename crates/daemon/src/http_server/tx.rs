//! Transaction endpoints: `POST /fcr:tx` and `POST /tx:<id>/fcr:tx/fcr:commit`.

use axum::http::header::LOCATION;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::ServiceState;

pub fn begin(state: &ServiceState) -> Response {
    let tx = state.transactions().begin();
    tracing::info!(tx = %tx, "transaction started");
    (StatusCode::CREATED, [(LOCATION, format!("/tx:{}", tx))]).into_response()
}

pub fn commit(state: &ServiceState, tx: Option<Uuid>) -> Response {
    match tx {
        Some(tx) if state.transactions().commit(&tx) => {
            tracing::info!(tx = %tx, "transaction committed");
            StatusCode::NO_CONTENT.into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}
