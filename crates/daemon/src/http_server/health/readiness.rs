use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use crate::http_server::api::client::{endpoint, ApiRequest};
use crate::ServiceState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyzRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyzResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<String>,
}

impl ApiRequest for ReadyzRequest {
    type Response = ReadyzResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.get(endpoint(base_url, "/_status/readyz"))
    }
}

/// Ready when the mapped root is still readable and the properties store answers.
#[tracing::instrument(skip(state))]
pub async fn handler(State(state): State<ServiceState>) -> Response {
    let mut problems = Vec::new();

    let root = state.connector().root();
    if let Err(e) = tokio::fs::read_dir(root).await {
        tracing::warn!(root = %root.display(), "root directory unreadable: {}", e);
        problems.push(format!("root directory unreadable: {}", e));
    }
    if let Err(e) = state.extra_properties().ping().await {
        tracing::warn!("extra properties store unavailable: {}", e);
        problems.push(format!("extra properties store unavailable: {}", e));
    }

    if problems.is_empty() {
        let ok = ReadyzResponse {
            status: "ok".to_string(),
            problems,
        };
        (StatusCode::OK, Json(ok)).into_response()
    } else {
        let failed = ReadyzResponse {
            status: "unavailable".to_string(),
            problems,
        };
        (StatusCode::SERVICE_UNAVAILABLE, Json(failed)).into_response()
    }
}
