//! Collection and document path addressing
//!
//! A path is an ordered list of non-empty segments alternating collection id
//! and document id. Collection paths have an odd number of segments, document
//! paths an even (non-zero) number.

use crate::error::{invalid_path, FirebaseError, FirestoreError};
use std::fmt;
use std::sync::Arc;

/// Immutable slash-separated resource path
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath {
    segments: Arc<[String]>,
}

impl ResourcePath {
    /// The empty root path
    pub fn root() -> Self {
        Self {
            segments: Arc::from(Vec::new()),
        }
    }

    /// Parse a slash-separated path
    ///
    /// Every segment must be non-empty, so leading, trailing and doubled
    /// slashes are rejected.
    pub fn parse(path: &str) -> Result<Self, FirebaseError> {
        if path.is_empty() {
            return Ok(Self::root());
        }
        let segments: Vec<String> = path.split('/').map(str::to_string).collect();
        Self::from_segments(segments)
    }

    /// Build a path from already split segments
    pub fn from_segments(segments: Vec<String>) -> Result<Self, FirebaseError> {
        if let Some(pos) = segments.iter().position(|s| s.is_empty()) {
            return Err(invalid_path(format!(
                "empty segment at position {} in '{}'",
                pos,
                segments.join("/")
            )));
        }
        Ok(Self {
            segments: Arc::from(segments),
        })
    }

    /// Path segments
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True for the root path
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Odd segment count
    pub fn is_collection_path(&self) -> bool {
        self.len() % 2 == 1
    }

    /// Even, non-zero segment count
    pub fn is_document_path(&self) -> bool {
        !self.is_empty() && self.len() % 2 == 0
    }

    /// Last segment, if any
    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Canonical slash-joined form
    pub fn canonical_string(&self) -> String {
        self.segments.join("/")
    }

    /// Append a relative path, validating its segments
    pub fn child(&self, relative: &str) -> Result<Self, FirebaseError> {
        let relative = Self::parse(relative)?;
        if relative.is_empty() {
            return Err(invalid_path("relative path must not be empty"));
        }
        let mut segments = self.segments.to_vec();
        segments.extend(relative.segments.iter().cloned());
        Ok(Self {
            segments: Arc::from(segments),
        })
    }

    /// Path with the last segment removed
    pub fn parent(&self) -> Result<Self, FirebaseError> {
        if self.is_empty() {
            return Err(FirestoreError::NoParent(self.canonical_string()).into());
        }
        let segments = self.segments[..self.len() - 1].to_vec();
        Ok(Self {
            segments: Arc::from(segments),
        })
    }

    /// True if `self` is `other` or one of its ancestors
    pub fn is_prefix_of(&self, other: &ResourcePath) -> bool {
        self.len() <= other.len() && self.segments[..] == other.segments[..self.len()]
    }

    /// True if `other` is a document directly inside the collection `self`
    pub fn is_immediate_parent_of(&self, other: &ResourcePath) -> bool {
        self.len() + 1 == other.len() && self.is_prefix_of(other)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

impl fmt::Debug for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourcePath({})", self.canonical_string())
    }
}

/// Resolve `collection_path` relative to `base` and require a collection path
pub fn resolve_collection(
    base: &ResourcePath,
    collection_path: &str,
) -> Result<ResourcePath, FirebaseError> {
    let path = base.child(collection_path)?;
    if !path.is_collection_path() {
        return Err(invalid_path(format!(
            "'{}' is not a collection path (segment count must be odd, got {})",
            path,
            path.len()
        )));
    }
    Ok(path)
}

/// Resolve `document_path` relative to `base` and require a document path
pub fn resolve_document(
    base: &ResourcePath,
    document_path: &str,
) -> Result<ResourcePath, FirebaseError> {
    let path = base.child(document_path)?;
    if !path.is_document_path() {
        return Err(invalid_path(format!(
            "'{}' is not a document path (segment count must be even, got {})",
            path,
            path.len()
        )));
    }
    Ok(path)
}
