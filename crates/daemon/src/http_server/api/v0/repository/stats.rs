use axum::extract::{Json, State};
use axum::response::{IntoResponse, Response};
use common::federation::FederationError;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use crate::http_server::api::client::{endpoint, ApiRequest};
use crate::ServiceState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsRequest {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsResponse {
    /// Total bytes of all files below the root
    pub size: u64,
    /// Entries directly under the root
    pub object_count: u64,
}

#[tracing::instrument(skip(state))]
pub async fn handler(State(state): State<ServiceState>) -> Result<impl IntoResponse, StatsError> {
    let size = state.connector().repository_size().await?;
    let object_count = state.connector().object_count().await?;

    Ok((
        http::StatusCode::OK,
        Json(StatsResponse { size, object_count }),
    )
        .into_response())
}

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("Federation error: {0}")]
    Federation(#[from] FederationError),
}

impl IntoResponse for StatsError {
    fn into_response(self) -> Response {
        tracing::error!("failed to compute repository stats: {}", self);
        (
            http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error: {}", self),
        )
            .into_response()
    }
}

impl ApiRequest for StatsRequest {
    type Response = StatsResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.get(endpoint(base_url, "/api/v0/repository/stats"))
    }
}
