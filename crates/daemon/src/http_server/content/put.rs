use axum::http::header::LOCATION;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use common::delivery::{Decision, Preconditions, RequestKind, Validators};
use common::federation::{Guarded, StoreMode, StoreOutcome, StoreRequest};
use common::node::ResourceId;

use super::{
    bare, insert_validators, load, permits_write, validators_for, ContentError, ContentRequest,
};
use crate::ServiceState;

pub(super) async fn handle(
    state: &ServiceState,
    request: ContentRequest,
) -> Result<Response, ContentError> {
    if request.id.is_content() {
        put_binary(state, request).await
    } else {
        put_container(state, request).await
    }
}

/// Create or replace the bytes of a file.
async fn put_binary(
    state: &ServiceState,
    mut request: ContentRequest,
) -> Result<Response, ContentError> {
    let owner = request.id.owner();
    if owner.is_root() {
        return Err(ContentError::BadRequest(
            "the repository root has no binary content".to_string(),
        ));
    }

    let current = match load(state, &owner).await? {
        Some((node, _)) if node.is_directory() => {
            return Err(ContentError::BadRequest(format!(
                "{} is a container and cannot hold binary content",
                owner
            )));
        }
        Some((node, content)) => validators_for(&node, content.as_ref()),
        None => Validators::default(),
    };

    // Fail early before reading the body; the check is repeated under the writer lock
    let preconditions = Preconditions::from_headers(&request.headers);
    if preconditions.evaluate(&current, RequestKind::Mutate) == Decision::PreconditionFailed {
        tracing::debug!(id = %owner, "precondition failed, content left unchanged");
        return Ok(bare(StatusCode::PRECONDITION_FAILED, &Validators::default()));
    }

    let data = request.take_body(state.max_upload_size()).await?;
    let store = StoreRequest::binary(owner.clone(), data, StoreMode::Upsert)
        .with_mime_type(request.content_type())
        .with_original_name(request.disposition_filename());

    state.connector().ensure_containers(&owner).await?;
    let outcome = match state
        .connector()
        .store_document_if(store, |existing| permits_write(&preconditions, existing))
        .await?
    {
        Guarded::Applied(outcome) => outcome,
        Guarded::Rejected => {
            tracing::debug!(id = %owner, "content changed before write, precondition failed");
            return Ok(bare(StatusCode::PRECONDITION_FAILED, &Validators::default()));
        }
    };
    request.record_write(state, &owner);

    written(state, request, &owner.content(), outcome).await
}

/// Create a container, or accept an existing one.
async fn put_container(
    state: &ServiceState,
    request: ContentRequest,
) -> Result<Response, ContentError> {
    let id = request.id.clone();

    if let Some((node, content)) = load(state, &id).await? {
        if node.is_file() {
            return Err(ContentError::BadRequest(format!(
                "{} is a file, not a container",
                id
            )));
        }
        let current = validators_for(&node, content.as_ref());
        let decision = Preconditions::from_headers(&request.headers)
            .evaluate(&current, RequestKind::Mutate);
        if decision == Decision::PreconditionFailed {
            return Ok(bare(StatusCode::PRECONDITION_FAILED, &Validators::default()));
        }
        let visible = if request.hides_validators(state, &id) {
            Validators::default()
        } else {
            current
        };
        return Ok(bare(StatusCode::NO_CONTENT, &visible));
    }

    state.connector().ensure_containers(&id).await?;
    let outcome = state
        .connector()
        .store_document(StoreRequest::container(id.clone(), StoreMode::Create))
        .await?;
    request.record_write(state, &id);

    written(state, request, &id, outcome).await
}

/// Response for a successful write: 201 with `Location`, or 204 on replace.
pub(super) async fn written(
    state: &ServiceState,
    request: ContentRequest,
    location: &ResourceId,
    outcome: StoreOutcome,
) -> Result<Response, ContentError> {
    let mut headers = HeaderMap::new();
    if !request.hides_validators(state, location) {
        if let Some(node) = state.connector().get_document(location).await? {
            insert_validators(&mut headers, &validators_for(&node, None));
        }
    }

    match outcome {
        StoreOutcome::Created => {
            if let Ok(value) = HeaderValue::from_str(&request.location(location)) {
                headers.insert(LOCATION, value);
            }
            Ok((StatusCode::CREATED, headers).into_response())
        }
        StoreOutcome::Replaced => Ok((StatusCode::NO_CONTENT, headers).into_response()),
    }
}
