use axum::response::Response;
use uuid::Uuid;

use common::federation::{StoreMode, StoreRequest};

use super::put::written;
use super::{ContentError, ContentRequest};
use crate::ServiceState;

const SLUG: &str = "slug";

pub(super) async fn handle(
    state: &ServiceState,
    request: ContentRequest,
) -> Result<Response, ContentError> {
    if request.id.is_content() {
        create_binary_at(state, request).await
    } else {
        create_child(state, request).await
    }
}

/// `POST <id>/fcr:content`: create the file at `<id>`, failing if anything is there.
async fn create_binary_at(
    state: &ServiceState,
    mut request: ContentRequest,
) -> Result<Response, ContentError> {
    let owner = request.id.owner();
    if owner.is_root() {
        return Err(ContentError::BadRequest(
            "the repository root has no binary content".to_string(),
        ));
    }
    if state.connector().exists(&owner).await? {
        return Err(ContentError::Conflict(format!("{} already exists", owner)));
    }

    let data = request.take_body(state.max_upload_size()).await?;
    let store = StoreRequest::binary(owner.clone(), data, StoreMode::Create)
        .with_mime_type(request.content_type())
        .with_original_name(request.disposition_filename());

    state.connector().ensure_containers(&owner).await?;
    let outcome = state.connector().store_document(store).await?;
    request.record_write(state, &owner);

    written(state, request, &owner.content(), outcome).await
}

/// `POST <parent>`: create a child named by `Slug` (or a fresh UUID). A body makes
/// it a file, no body makes it a container.
async fn create_child(
    state: &ServiceState,
    mut request: ContentRequest,
) -> Result<Response, ContentError> {
    let parent = request.id.clone();
    if state.connector().is_file(&parent).await? {
        return Err(ContentError::Conflict(format!(
            "{} is a file and cannot have children",
            parent
        )));
    }

    let slug = request
        .header_str(SLUG)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let child = parent
        .child(&slug)
        .ok_or_else(|| ContentError::BadRequest(format!("invalid slug: {}", slug)))?;

    let data = request.take_body(state.max_upload_size()).await?;
    state.connector().ensure_containers(&child).await?;

    let (store, location) = if data.is_empty() {
        (StoreRequest::container(child.clone(), StoreMode::Create), child.clone())
    } else {
        let store = StoreRequest::binary(child.clone(), data, StoreMode::Create)
            .with_mime_type(request.content_type())
            .with_original_name(request.disposition_filename());
        (store, child.content())
    };

    let outcome = state.connector().store_document(store).await?;
    request.record_write(state, &child);
    tracing::info!(parent = %parent, child = %child, "child created");

    written(state, request, &location, outcome).await
}
