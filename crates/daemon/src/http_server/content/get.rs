use axum::body::Body;
use axum::http::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use common::delivery::{
    ByteRangeSpec, Decision, Preconditions, RangeResolution, RequestKind, Validators,
};
use common::node::{BinaryDescriptor, ResourceNode};

use super::{bare, insert_validators, load, validators_for, ContentError, ContentRequest};
use crate::ServiceState;

/// JSON description of a file or container.
#[derive(Debug, Serialize)]
struct ResourceView<'a> {
    #[serde(flatten)]
    node: &'a ResourceNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    binary: Option<&'a BinaryDescriptor>,
}

pub(super) async fn handle(
    state: &ServiceState,
    request: ContentRequest,
) -> Result<Response, ContentError> {
    let (node, content) = load(state, &request.id)
        .await?
        .ok_or(ContentError::NotFound)?;

    let validators = if request.hides_validators(state, &request.id) {
        Validators::default()
    } else {
        validators_for(&node, content.as_ref())
    };

    let decision = Preconditions::from_headers(&request.headers)
        .evaluate(&validators, RequestKind::Read);
    if decision == Decision::NotModified {
        return Ok(bare(StatusCode::NOT_MODIFIED, &validators));
    }

    match node.binary() {
        Some(descriptor) => serve_binary(state, request, &node, descriptor, &validators).await,
        None => Ok(describe(&request, &node, content.as_ref(), &validators)),
    }
}

async fn serve_binary(
    state: &ServiceState,
    request: ContentRequest,
    node: &ResourceNode,
    descriptor: &BinaryDescriptor,
    validators: &Validators,
) -> Result<Response, ContentError> {
    let total = descriptor.size;
    let head_only = request.method == Method::HEAD;

    let mut headers = HeaderMap::new();
    insert_validators(&mut headers, validators);
    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Ok(mime) = HeaderValue::from_str(&descriptor.mime_type) {
        headers.insert(CONTENT_TYPE, mime);
    }
    let filename = descriptor.filename_or(&node.name).replace('"', "\\\"");
    if let Ok(disposition) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename)) {
        headers.insert(CONTENT_DISPOSITION, disposition);
    }

    let resolution = request
        .header_str(RANGE)
        .and_then(ByteRangeSpec::parse)
        .map(|spec| spec.resolve(total));

    let (status, range) = match resolution {
        Some(RangeResolution::Unsatisfiable(unsatisfiable)) => {
            tracing::debug!(id = %node.id, requested = ?unsatisfiable.requested, total, "range not satisfiable");
            if let Ok(value) = HeaderValue::from_str(&unsatisfiable.content_range()) {
                headers.insert(CONTENT_RANGE, value);
            }
            return Ok((StatusCode::RANGE_NOT_SATISFIABLE, headers).into_response());
        }
        Some(RangeResolution::Satisfiable(range)) => {
            if let Ok(value) = HeaderValue::from_str(&range.content_range(total)) {
                headers.insert(CONTENT_RANGE, value);
            }
            (StatusCode::PARTIAL_CONTENT, Some(range))
        }
        None => (StatusCode::OK, None),
    };

    let length = range.map(|r| r.len()).unwrap_or(total);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    if head_only {
        return Ok((status, headers).into_response());
    }

    let file = tokio::fs::File::open(&descriptor.source).await?;
    let stream = match range {
        Some(range) => state.ranges().open(file, range).await?,
        None => state.ranges().stream(file, total),
    };
    tracing::debug!(id = %node.id, status = %status, length, "serving content");

    Ok((status, headers, Body::from_stream(stream)).into_response())
}

fn describe(
    request: &ContentRequest,
    node: &ResourceNode,
    content: Option<&ResourceNode>,
    validators: &Validators,
) -> Response {
    let mut headers = HeaderMap::new();
    insert_validators(&mut headers, validators);

    if request.method == Method::HEAD {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        return (StatusCode::OK, headers).into_response();
    }

    let view = ResourceView {
        node,
        binary: content.and_then(|c| c.binary()),
    };
    (StatusCode::OK, headers, Json(view)).into_response()
}
