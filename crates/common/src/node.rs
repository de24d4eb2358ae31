//! Resource identifiers and the documents the federation connector synthesizes.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::digest::ContentDigest;

/// Final path segment that addresses the bytes of a file rather than the file
/// resource itself.
pub const CONTENT_SUFFIX: &str = "fcr:content";

/// A hierarchical resource identifier such as `/objects/report.pdf`.
///
/// Identifiers are always absolute, never end in `/` (except the root), and never
/// contain `.`, `..` or empty segments, so they cannot name anything outside the
/// mapped root. The content suffix may only appear as the last segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parse and normalize a raw identifier. Returns `None` for empty or unsafe input.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        let trimmed = raw.trim_start_matches('/').trim_end_matches('/');
        if trimmed.is_empty() {
            return Some(Self::root());
        }

        let segments: Vec<&str> = trimmed.split('/').collect();
        let last = segments.len() - 1;
        for (i, segment) in segments.iter().enumerate() {
            if !is_valid_segment(segment) {
                return None;
            }
            if *segment == CONTENT_SUFFIX && i != last {
                return None;
            }
        }

        Some(Self(format!("/{}", segments.join("/"))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Whether this identifier addresses the binary content of a file.
    pub fn is_content(&self) -> bool {
        self.segments().last() == Some(CONTENT_SUFFIX)
    }

    /// The file or directory this identifier belongs to (strips the content suffix).
    pub fn owner(&self) -> ResourceId {
        if !self.is_content() {
            return self.clone();
        }
        let owner = &self.0[..self.0.len() - CONTENT_SUFFIX.len() - 1];
        if owner.is_empty() {
            Self::root()
        } else {
            Self(owner.to_string())
        }
    }

    /// The content identifier of the owning file.
    pub fn content(&self) -> ResourceId {
        let owner = self.owner();
        if owner.is_root() {
            Self(format!("/{}", CONTENT_SUFFIX))
        } else {
            Self(format!("{}/{}", owner.0, CONTENT_SUFFIX))
        }
    }

    /// Parent of the owning resource. The root has no parent.
    pub fn parent(&self) -> Option<ResourceId> {
        let owner = self.owner();
        if owner.is_root() {
            return None;
        }
        match owner.0.rfind('/') {
            Some(0) | None => Some(Self::root()),
            Some(pos) => Some(Self(owner.0[..pos].to_string())),
        }
    }

    /// Last segment of the owning resource; empty for the root.
    pub fn name(&self) -> String {
        let owner = self.owner();
        owner.segments().last().unwrap_or("").to_string()
    }

    pub fn child(&self, name: &str) -> Option<ResourceId> {
        if !is_valid_segment(name) || name.contains('/') || name == CONTENT_SUFFIX {
            return None;
        }
        let owner = self.owner();
        if owner.is_root() {
            Some(Self(format!("/{}", name)))
        } else {
            Some(Self(format!("{}/{}", owner.0, name)))
        }
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Every proper ancestor of the owning resource, root first.
    pub fn ancestors(&self) -> Vec<ResourceId> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(id) = current {
            current = id.parent();
            out.push(id);
        }
        out.reverse();
        out
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains('\\')
        && !segment.contains('\0')
        && !segment.starts_with(crate::federation::TEMP_PREFIX)
}

/// Describes the bytes behind a [`NodeKind::BinaryContent`] document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinaryDescriptor {
    pub size: u64,
    pub mime_type: String,
    /// May be stale if the file changed behind the connector's back.
    pub digest: Option<ContentDigest>,
    /// Filename supplied at creation time, if any.
    pub original_name: Option<String>,
    #[serde(skip)]
    pub source: PathBuf,
}

impl BinaryDescriptor {
    /// Name to advertise in `Content-Disposition`, falling back to `fallback`.
    pub fn filename_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.original_name.as_deref().unwrap_or(fallback)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Directory { children: Vec<ResourceId> },
    File { content: ResourceId },
    BinaryContent {
        owner: ResourceId,
        descriptor: BinaryDescriptor,
    },
}

/// A virtual document in the resource tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceNode {
    pub id: ResourceId,
    pub name: String,
    pub last_modified: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl ResourceNode {
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File { .. })
    }

    pub fn binary(&self) -> Option<&BinaryDescriptor> {
        match &self.kind {
            NodeKind::BinaryContent { descriptor, .. } => Some(descriptor),
            NodeKind::Directory { .. } | NodeKind::File { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes() {
        assert_eq!(ResourceId::parse("a/b/").unwrap().as_str(), "/a/b");
        assert_eq!(ResourceId::parse("/").unwrap(), ResourceId::root());
        assert_eq!(ResourceId::parse("///").unwrap(), ResourceId::root());
        assert!(ResourceId::parse("").is_none());
        assert!(ResourceId::parse("   ").is_none());
    }

    #[test]
    fn test_parse_rejects_escapes() {
        assert!(ResourceId::parse("/a/../b").is_none());
        assert!(ResourceId::parse("/a/./b").is_none());
        assert!(ResourceId::parse("/a//b").is_none());
        assert!(ResourceId::parse("/a/fcr:content/b").is_none());
    }

    #[test]
    fn test_content_and_owner() {
        let file = ResourceId::parse("/obj/ds1").unwrap();
        let content = file.content();
        assert_eq!(content.as_str(), "/obj/ds1/fcr:content");
        assert!(content.is_content());
        assert!(!file.is_content());
        assert_eq!(content.owner(), file);
        assert_eq!(content.content(), content);
    }

    #[test]
    fn test_parent_and_name() {
        let content = ResourceId::parse("/obj/ds1/fcr:content").unwrap();
        assert_eq!(content.parent().unwrap().as_str(), "/obj");
        assert_eq!(content.name(), "ds1");

        let top = ResourceId::parse("/obj").unwrap();
        assert_eq!(top.parent().unwrap(), ResourceId::root());
        assert!(ResourceId::root().parent().is_none());
        assert_eq!(ResourceId::root().name(), "");
    }

    #[test]
    fn test_ancestors_root_first() {
        let id = ResourceId::parse("/a/b/c").unwrap();
        let ancestors: Vec<String> = id.ancestors().iter().map(|a| a.to_string()).collect();
        assert_eq!(ancestors, vec!["/", "/a", "/a/b"]);
    }

    #[test]
    fn test_child_validation() {
        let dir = ResourceId::parse("/a").unwrap();
        assert_eq!(dir.child("b").unwrap().as_str(), "/a/b");
        assert_eq!(ResourceId::root().child("x").unwrap().as_str(), "/x");
        assert!(dir.child("..").is_none());
        assert!(dir.child(CONTENT_SUFFIX).is_none());
        assert!(dir.child("b/c").is_none());
    }

    #[test]
    fn test_staging_names_are_not_addressable() {
        let dir = ResourceId::parse("/a").unwrap();
        assert!(dir.child(".quarry-tmp-x").is_none());
        assert!(ResourceId::parse("/.quarry-tmp-x").is_none());
        assert!(ResourceId::parse("/a/.quarry-tmp-x/fcr:content").is_none());
        assert_eq!(dir.child(".quarry").unwrap().as_str(), "/a/.quarry");
    }
}
