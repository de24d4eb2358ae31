//! Core of the quarry content repository.
//!
//! This crate projects a directory on disk into a tree of resource documents and
//! serves their bytes under HTTP range and conditional-request rules.
//!
//! # Components
//!
//! - **[`digest`]**: SHA-1 content digests and the trust-the-cache [`digest::DigestCache`]
//! - **[`extra_props`]**: sidecar key/value metadata keyed by resource identifier
//! - **[`federation`]**: the read-only filesystem connector that builds resource documents
//! - **[`delivery`]**: precondition evaluation and bounded-memory byte-range streaming
//!
//! The HTTP server lives in the daemon crate; everything here is transport agnostic
//! apart from header parsing.

pub mod delivery;
pub mod digest;
pub mod extra_props;
pub mod federation;
pub mod node;

pub mod prelude {
    pub use crate::delivery::{
        ByteRange, ByteRangeSpec, ByteStream, Decision, Precondition, Preconditions,
        RangeResolution, RangeServer, RequestKind, UnsatisfiableRange, Validators,
    };
    pub use crate::digest::{ContentDigest, DigestCache};
    pub use crate::extra_props::{ExtraPropertiesError, ExtraPropertiesStore, MemoryExtraProperties};
    pub use crate::federation::{
        FederationConfig, FederationError, FileSystemConnector, StoreMode, StoreOutcome,
        StorePayload, StoreRequest,
    };
    pub use crate::node::{BinaryDescriptor, NodeKind, ResourceId, ResourceNode, CONTENT_SUFFIX};
}
