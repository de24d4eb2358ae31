//! Content delivery rules shared by every read and write path.
//!
//! [`Preconditions`] turns `If-*` headers into a [`Decision`]; [`RangeServer`]
//! resolves a `Range` header and streams the selected bytes without holding more
//! than its configured buffer size in memory.

mod conditional;
mod range;

pub use conditional::{
    format_http_date, parse_http_date, Decision, EntityTagMatch, Precondition, Preconditions,
    RequestKind, Validators,
};
pub use range::{
    ByteRange, ByteRangeSpec, ByteStream, RangeError, RangeResolution, RangeServer,
    UnsatisfiableRange,
};

/// Default cap on bytes held in memory per request while serving content.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 10 * 1024 * 1024;
