//! Resource and binary content endpoints.
//!
//! Paths are resource identifiers. A path ending in `fcr:content` addresses the
//! bytes of a file; anything else addresses the file or container itself. A leading
//! `tx:<uuid>` segment scopes the request to an open transaction.

mod delete;
mod get;
mod post;
mod put;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use uuid::Uuid;

use common::delivery::{Decision, Preconditions, RequestKind, Validators};
use common::federation::{Existing, FederationError};
use common::node::{NodeKind, ResourceId, ResourceNode};

use super::tx;
use crate::ServiceState;

const TX_PREFIX: &str = "tx:";
const TX_ENDPOINT: &str = "/fcr:tx";
const TX_COMMIT_ENDPOINT: &str = "/fcr:tx/fcr:commit";

/// Characters escaped when a resource identifier is written into a `Location`.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Entry point for every path not claimed by a fixed route.
pub async fn handler(State(state): State<ServiceState>, request: Request) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match dispatch(&state, request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(%method, %path, "content request failed: {}", e);
            e.into_response()
        }
    }
}

async fn dispatch(state: &ServiceState, request: Request) -> Result<Response, ContentError> {
    let (parts, body) = request.into_parts();
    let target = Target::parse(parts.uri.path())?;

    if target.path == TX_ENDPOINT && parts.method == Method::POST && target.tx.is_none() {
        return Ok(tx::begin(state));
    }
    if target.path == TX_COMMIT_ENDPOINT && parts.method == Method::POST {
        return Ok(tx::commit(state, target.tx));
    }
    if let Some(tx) = &target.tx {
        if !state.transactions().is_open(tx) {
            return Err(ContentError::NotFound);
        }
    }

    let id = ResourceId::parse(&target.path).ok_or(ContentError::NotFound)?;
    let request = ContentRequest {
        method: parts.method,
        id,
        tx: target.tx,
        headers: parts.headers,
        body,
    };

    match request.method.clone() {
        Method::GET | Method::HEAD => get::handle(state, request).await,
        Method::PUT => put::handle(state, request).await,
        Method::POST => post::handle(state, request).await,
        Method::DELETE => delete::handle(state, request).await,
        _ => Err(ContentError::MethodNotAllowed),
    }
}

/// Request path split into its transaction scope and resource path.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    tx: Option<Uuid>,
    path: String,
}

impl Target {
    fn parse(raw: &str) -> Result<Self, ContentError> {
        let decoded = percent_decode_str(raw)
            .decode_utf8()
            .map_err(|_| ContentError::BadRequest("path is not valid UTF-8".to_string()))?;

        let trimmed = decoded.trim_start_matches('/');
        let (first, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));
        match first.strip_prefix(TX_PREFIX) {
            Some(raw_tx) => {
                let tx = raw_tx.parse::<Uuid>().map_err(|_| ContentError::NotFound)?;
                Ok(Self {
                    tx: Some(tx),
                    path: format!("/{}", rest),
                })
            }
            None => Ok(Self {
                tx: None,
                path: decoded.into_owned(),
            }),
        }
    }
}

pub(super) struct ContentRequest {
    pub method: Method,
    pub id: ResourceId,
    pub tx: Option<Uuid>,
    pub headers: HeaderMap,
    pub body: Body,
}

impl ContentRequest {
    /// Validators stay hidden inside a transaction and for anything an open
    /// transaction has written.
    pub fn hides_validators(&self, state: &ServiceState, id: &ResourceId) -> bool {
        self.tx.is_some() || state.transactions().is_provisional(id)
    }

    pub fn record_write(&self, state: &ServiceState, id: &ResourceId) {
        if let Some(tx) = &self.tx {
            state.transactions().record_write(tx, id);
        }
    }

    /// `Location` value for `id`, keeping the transaction scope of this request.
    pub fn location(&self, id: &ResourceId) -> String {
        let encoded = utf8_percent_encode(id.as_str(), PATH_SEGMENT).to_string();
        match &self.tx {
            Some(tx) => format!("/{}{}{}", TX_PREFIX, tx, encoded),
            None => encoded,
        }
    }

    pub fn header_str(&self, name: impl axum::http::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<String> {
        self.header_str(CONTENT_TYPE)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    pub fn disposition_filename(&self) -> Option<String> {
        self.header_str(CONTENT_DISPOSITION)
            .and_then(disposition_filename)
    }

    /// Buffer the request body, refusing anything over `limit` bytes.
    pub async fn take_body(&mut self, limit: usize) -> Result<Bytes, ContentError> {
        let body = std::mem::take(&mut self.body);
        axum::body::to_bytes(body, limit)
            .await
            .map_err(|_| ContentError::PayloadTooLarge(limit))
    }
}

/// `filename` parameter of a `Content-Disposition` value.
fn disposition_filename(value: &str) -> Option<String> {
    value
        .split(';')
        .map(str::trim)
        .find_map(|param| {
            let (key, raw) = param.split_once('=')?;
            if !key.trim().eq_ignore_ascii_case("filename") {
                return None;
            }
            let name = raw.trim().trim_matches('"');
            (!name.is_empty()).then(|| name.to_string())
        })
}

/// Current validators of `node`. Files borrow the digest of their content.
pub(super) fn validators_for(node: &ResourceNode, content: Option<&ResourceNode>) -> Validators {
    let digest = match &node.kind {
        NodeKind::BinaryContent { descriptor, .. } => descriptor.digest,
        NodeKind::File { .. } => content.and_then(|c| c.binary()).and_then(|b| b.digest),
        NodeKind::Directory { .. } => None,
    };
    Validators::new(digest.map(|d| d.to_string()), Some(node.last_modified))
}

/// Whether a mutation may go ahead given the target's state under the writer lock.
pub(super) fn permits_write(preconditions: &Preconditions, existing: Option<Existing<'_>>) -> bool {
    let current = existing
        .map(|e| validators_for(e.node, e.content))
        .unwrap_or_default();
    preconditions.evaluate(&current, RequestKind::Mutate) != Decision::PreconditionFailed
}

/// Load `id` and, for files, their content document.
pub(super) async fn load(
    state: &ServiceState,
    id: &ResourceId,
) -> Result<Option<(ResourceNode, Option<ResourceNode>)>, ContentError> {
    let Some(node) = state.connector().get_document(id).await? else {
        return Ok(None);
    };
    let content = if node.is_file() {
        state.connector().get_document(&id.content()).await?
    } else {
        None
    };
    Ok(Some((node, content)))
}

pub(super) fn insert_validators(headers: &mut HeaderMap, validators: &Validators) {
    if let Some(value) = validators
        .etag_header()
        .and_then(|v| HeaderValue::from_str(&v).ok())
    {
        headers.insert(ETAG, value);
    }
    if let Some(value) = validators
        .last_modified_header()
        .and_then(|v| HeaderValue::from_str(&v).ok())
    {
        headers.insert(LAST_MODIFIED, value);
    }
}

/// Bodyless response carrying only validators (304, 412, 204).
pub(super) fn bare(status: StatusCode, validators: &Validators) -> Response {
    let mut headers = HeaderMap::new();
    insert_validators(&mut headers, validators);
    (status, headers).into_response()
}

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("federation error: {0}")]
    Federation(#[from] FederationError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ContentError {
    fn into_response(self) -> Response {
        let status = match &self {
            ContentError::NotFound => StatusCode::NOT_FOUND,
            ContentError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ContentError::Conflict(_) => StatusCode::CONFLICT,
            ContentError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ContentError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ContentError::Federation(FederationError::Conflict(_))
            | ContentError::Federation(FederationError::InvalidTarget(_)) => StatusCode::CONFLICT,
            ContentError::Federation(_) | ContentError::Io(_) => {
                tracing::error!("content request failed: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}
