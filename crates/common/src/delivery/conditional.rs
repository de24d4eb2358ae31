//! Conditional request evaluation (`If-Match` and friends).
//!
//! Outcomes are plain values; the HTTP layer maps them to 304 and 412.

use std::time::SystemTime;

use chrono::{DateTime, Utc};
use http::header::{IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_UNMODIFIED_SINCE};
use http::{HeaderMap, Method};

/// The validators a resource currently exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    /// Opaque entity tag, without surrounding quotes
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Validators {
    pub fn new(etag: Option<String>, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            etag,
            last_modified,
        }
    }

    /// `ETag` header value (quoted), if there is a tag.
    pub fn etag_header(&self) -> Option<String> {
        self.etag.as_ref().map(|tag| format!("\"{}\"", tag))
    }

    /// `Last-Modified` header value in IMF-fixdate form.
    pub fn last_modified_header(&self) -> Option<String> {
        self.last_modified.map(format_http_date)
    }
}

pub fn format_http_date(t: DateTime<Utc>) -> String {
    httpdate::fmt_http_date(SystemTime::from(t))
}

pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    httpdate::parse_http_date(value.trim())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// An `If-Match` / `If-None-Match` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityTagMatch {
    Any,
    Tags(Vec<String>),
}

impl EntityTagMatch {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value == "*" {
            return Some(Self::Any);
        }
        let tags: Vec<String> = value
            .split(',')
            .map(|t| t.trim())
            .map(|t| t.strip_prefix("W/").unwrap_or(t))
            .map(|t| t.trim_matches('"').to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if tags.is_empty() {
            None
        } else {
            Some(Self::Tags(tags))
        }
    }

    /// A missing current tag never matches, not even `*`.
    pub fn matches(&self, current: Option<&str>) -> bool {
        match (self, current) {
            (_, None) => false,
            (Self::Any, Some(_)) => true,
            (Self::Tags(tags), Some(current)) => tags.iter().any(|t| t == current),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    IfMatch(EntityTagMatch),
    IfNoneMatch(EntityTagMatch),
    IfModifiedSince(DateTime<Utc>),
    IfUnmodifiedSince(DateTime<Utc>),
}

/// Whether the request reads or mutates; decides which preconditions apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Mutate,
}

impl From<&Method> for RequestKind {
    fn from(method: &Method) -> Self {
        if method == Method::GET
            || method == Method::HEAD
            || method == Method::OPTIONS
            || method == Method::TRACE
        {
            RequestKind::Read
        } else {
            RequestKind::Mutate
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    NotModified,
    PreconditionFailed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preconditions(Vec<Precondition>);

impl Preconditions {
    pub fn new(preconditions: Vec<Precondition>) -> Self {
        Self(preconditions)
    }

    /// Collect preconditions from request headers. Unparsable values are ignored.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name| headers.get(name).and_then(|v| v.to_str().ok());
        let mut out = Vec::new();

        if let Some(m) = text(IF_MATCH).and_then(EntityTagMatch::parse) {
            out.push(Precondition::IfMatch(m));
        }
        if let Some(m) = text(IF_NONE_MATCH).and_then(EntityTagMatch::parse) {
            out.push(Precondition::IfNoneMatch(m));
        }
        if let Some(t) = text(IF_MODIFIED_SINCE).and_then(parse_http_date) {
            out.push(Precondition::IfModifiedSince(t));
        }
        if let Some(t) = text(IF_UNMODIFIED_SINCE).and_then(parse_http_date) {
            out.push(Precondition::IfUnmodifiedSince(t));
        }
        Self(out)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Precondition> {
        self.0.iter()
    }

    /// Decide how to answer a request given the resource's current validators.
    ///
    /// Reads short-circuit to [`Decision::NotModified`] when any `If-None-Match` tag
    /// equals the current ETag or `If-Modified-Since` is not before Last-Modified.
    /// Mutations fail with [`Decision::PreconditionFailed`] when `If-Match` does not
    /// match or Last-Modified is after `If-Unmodified-Since`. Dates compare at
    /// one-second resolution, the precision of HTTP dates.
    pub fn evaluate(&self, current: &Validators, kind: RequestKind) -> Decision {
        let etag = current.etag.as_deref();
        let last_modified = current.last_modified.map(|t| t.timestamp());

        match kind {
            RequestKind::Read => {
                let not_modified = self.0.iter().any(|p| match p {
                    Precondition::IfNoneMatch(m) => m.matches(etag),
                    Precondition::IfModifiedSince(since) => {
                        last_modified.is_some_and(|lm| since.timestamp() >= lm)
                    }
                    Precondition::IfMatch(_) | Precondition::IfUnmodifiedSince(_) => false,
                });
                if not_modified {
                    Decision::NotModified
                } else {
                    Decision::Proceed
                }
            }
            RequestKind::Mutate => {
                let failed = self.0.iter().any(|p| match p {
                    Precondition::IfMatch(m) => !m.matches(etag),
                    Precondition::IfUnmodifiedSince(since) => {
                        last_modified.is_some_and(|lm| since.timestamp() < lm)
                    }
                    Precondition::IfNoneMatch(_) | Precondition::IfModifiedSince(_) => false,
                });
                if failed {
                    Decision::PreconditionFailed
                } else {
                    Decision::Proceed
                }
            }
        }
    }
}
