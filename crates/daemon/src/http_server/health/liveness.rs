use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use crate::http_server::api::client::{endpoint, ApiRequest};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivezRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivezResponse {
    pub status: String,
}

impl ApiRequest for LivezRequest {
    type Response = LivezResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> RequestBuilder {
        client.get(endpoint(base_url, "/_status/livez"))
    }
}

/// Always answers ok while the process can serve requests at all. External
/// supervisors use it to decide whether to restart the service.
///
/// Whether the repository can actually serve content is reported by
/// [`super::readiness::handler`].
#[tracing::instrument]
pub async fn handler() -> Response {
    let msg = serde_json::json!({"status": "ok"});
    (StatusCode::OK, Json(msg)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handler_direct() {
        let response = handler().await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        assert_eq!(&body[..], b"{\"status\":\"ok\"}");
    }
}
