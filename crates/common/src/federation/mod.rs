//! Filesystem federation.
//!
//! The [`FileSystemConnector`] maps resource identifiers onto paths below a
//! configured root directory and synthesizes resource documents for what it finds
//! there: directories become containers, regular files become file resources with
//! a `fcr:content` child describing their bytes. Metadata a filesystem cannot hold
//! (digest, original filename, mime type, touch markers) goes to an
//! [`ExtraPropertiesStore`](crate::extra_props::ExtraPropertiesStore).

mod connector;

use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::digest::DigestError;
use crate::extra_props::ExtraPropertiesError;
use crate::node::{ResourceId, ResourceNode};

pub use connector::FileSystemConnector;

/// Prefix of staging files written next to their final location.
pub(crate) const TEMP_PREFIX: &str = ".quarry-tmp-";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Directory projected as the repository root
    pub root: PathBuf,
    /// Must be true; writable federation is not supported
    pub read_only: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum FederationError {
    #[error("connector misconfigured: {0}")]
    Misconfigured(String),
    #[error("resource already exists: {0}")]
    Conflict(ResourceId),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Properties(#[from] ExtraPropertiesError),
}

impl From<DigestError> for FederationError {
    fn from(e: DigestError) -> Self {
        match e {
            DigestError::Io(e) => FederationError::Io(e),
            DigestError::Properties(e) => FederationError::Properties(e),
        }
    }
}

/// How a store should treat an existing backing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Fail with [`FederationError::Conflict`] if the entry already exists
    Create,
    /// Create the entry, or replace it if it exists
    Upsert,
}

#[derive(Debug, Clone)]
pub enum StorePayload {
    Binary {
        data: Bytes,
        mime_type: Option<String>,
        original_name: Option<String>,
    },
    Container,
}

/// A document to write through the connector.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    /// File, content or container identifier; content ids are stored on their owner
    pub id: ResourceId,
    pub payload: StorePayload,
    pub mode: StoreMode,
}

impl StoreRequest {
    pub fn binary(id: ResourceId, data: impl Into<Bytes>, mode: StoreMode) -> Self {
        Self {
            id,
            payload: StorePayload::Binary {
                data: data.into(),
                mime_type: None,
                original_name: None,
            },
            mode,
        }
    }

    pub fn container(id: ResourceId, mode: StoreMode) -> Self {
        Self {
            id,
            payload: StorePayload::Container,
            mode,
        }
    }

    pub fn with_mime_type(mut self, mime: Option<String>) -> Self {
        if let StorePayload::Binary { mime_type, .. } = &mut self.payload {
            *mime_type = mime;
        }
        self
    }

    pub fn with_original_name(mut self, name: Option<String>) -> Self {
        if let StorePayload::Binary { original_name, .. } = &mut self.payload {
            *original_name = name;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Created,
    Replaced,
}

/// Current state of a write target, read under the writer lock.
#[derive(Debug, Clone, Copy)]
pub struct Existing<'a> {
    pub node: &'a ResourceNode,
    /// Content document when `node` is a file
    pub content: Option<&'a ResourceNode>,
}

impl<'a> Existing<'a> {
    fn from_pair(pair: &'a (ResourceNode, Option<ResourceNode>)) -> Self {
        Self {
            node: &pair.0,
            content: pair.1.as_ref(),
        }
    }
}

/// Outcome of a write that first checked its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guarded<T> {
    Applied(T),
    /// The check refused; nothing was written
    Rejected,
}
