use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use common::delivery::{Decision, Preconditions, RequestKind, Validators};
use common::federation::Guarded;

use super::{bare, load, permits_write, validators_for, ContentError, ContentRequest};
use crate::ServiceState;

pub(super) async fn handle(
    state: &ServiceState,
    request: ContentRequest,
) -> Result<Response, ContentError> {
    if request.id.is_root() {
        return Err(ContentError::BadRequest(
            "the repository root cannot be deleted".to_string(),
        ));
    }

    let (node, content) = load(state, &request.id)
        .await?
        .ok_or(ContentError::NotFound)?;

    let current = validators_for(&node, content.as_ref());
    let preconditions = Preconditions::from_headers(&request.headers);
    if preconditions.evaluate(&current, RequestKind::Mutate) == Decision::PreconditionFailed {
        return Ok(bare(StatusCode::PRECONDITION_FAILED, &Validators::default()));
    }

    let removed = state
        .connector()
        .remove_document_if(&request.id, |existing| {
            permits_write(&preconditions, Some(existing))
        })
        .await?;
    match removed {
        Guarded::Applied(true) => {}
        Guarded::Applied(false) => return Err(ContentError::NotFound),
        Guarded::Rejected => {
            return Ok(bare(StatusCode::PRECONDITION_FAILED, &Validators::default()));
        }
    }
    request.record_write(state, &request.id);

    Ok(StatusCode::NO_CONTENT.into_response())
}
