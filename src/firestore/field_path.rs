//! Field paths addressing (possibly nested) fields inside a document

use crate::error::{invalid_argument, FirebaseError};
use std::fmt;

const DOCUMENT_ID_FIELD: &str = "__name__";
const RESERVED_CHARS: &[char] = &['~', '*', '/', '[', ']'];

/// Structured address of a field, e.g. `["address", "city"]`
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Build from explicit segments; segments may contain any character
    pub fn new<I, S>(segments: I) -> Result<Self, FirebaseError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(invalid_argument("field path must have at least one segment"));
        }
        if segments.iter().any(String::is_empty) {
            return Err(invalid_argument("field path segments must not be empty"));
        }
        Ok(Self { segments })
    }

    /// Parse a dotted path such as `address.city`
    pub fn from_dotted(path: &str) -> Result<Self, FirebaseError> {
        if path.is_empty() {
            return Err(invalid_argument("field path must not be empty"));
        }
        if path.contains(RESERVED_CHARS) {
            return Err(invalid_argument(format!(
                "invalid field path '{}': paths must not contain '~', '*', '/', '[' or ']'",
                path
            )));
        }
        if path.starts_with('.') || path.ends_with('.') || path.contains("..") {
            return Err(invalid_argument(format!(
                "invalid field path '{}': paths must not start or end with '.' or contain '..'",
                path
            )));
        }
        Self::new(path.split('.'))
    }

    pub(crate) fn unchecked(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Special path that sorts/filters by document name
    pub fn document_id() -> Self {
        Self {
            segments: vec![DOCUMENT_ID_FIELD.to_string()],
        }
    }

    /// True for [`FieldPath::document_id`]
    pub fn is_document_id(&self) -> bool {
        self.segments.len() == 1 && self.segments[0] == DOCUMENT_ID_FIELD
    }

    /// Segments of the path
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Dotted form
    pub fn canonical_string(&self) -> String {
        self.segments.join(".")
    }

    /// True if `self` equals `other` or is one of its ancestors
    pub fn is_prefix_of(&self, other: &FieldPath) -> bool {
        self.segments.len() <= other.segments.len()
            && self.segments[..] == other.segments[..self.segments.len()]
    }

    /// Append one segment
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldPath({})", self.canonical_string())
    }
}

/// Anything that can name a field: a dotted `&str`/`String` or a `FieldPath`
pub trait IntoFieldPath {
    /// Convert into a validated field path
    fn into_field_path(self) -> Result<FieldPath, FirebaseError>;
}

impl IntoFieldPath for FieldPath {
    fn into_field_path(self) -> Result<FieldPath, FirebaseError> {
        Ok(self)
    }
}

impl IntoFieldPath for &FieldPath {
    fn into_field_path(self) -> Result<FieldPath, FirebaseError> {
        Ok(self.clone())
    }
}

impl IntoFieldPath for &str {
    fn into_field_path(self) -> Result<FieldPath, FirebaseError> {
        FieldPath::from_dotted(self)
    }
}

impl IntoFieldPath for String {
    fn into_field_path(self) -> Result<FieldPath, FirebaseError> {
        FieldPath::from_dotted(&self)
    }
}

impl IntoFieldPath for &String {
    fn into_field_path(self) -> Result<FieldPath, FirebaseError> {
        FieldPath::from_dotted(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dotted_parsing() {
        let path = FieldPath::from_dotted("address.city").unwrap();
        assert_eq!(path.segments(), &["address".to_string(), "city".to_string()]);
        assert_eq!(path.to_string(), "address.city");
    }

    #[test]
    fn test_invalid_dotted_paths() {
        for bad in ["", ".a", "a.", "a..b", "a/b", "a[0]", "*"] {
            assert!(FieldPath::from_dotted(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_structured_segments_allow_dots() {
        let path = FieldPath::new(["a.b", "c"]).unwrap();
        assert_eq!(path.segments().len(), 2);
        assert!(FieldPath::new(Vec::<String>::new()).is_err());
        assert!(FieldPath::new(["a", ""]).is_err());
    }

    #[test]
    fn test_prefix() {
        let a = FieldPath::from_dotted("a").unwrap();
        let ab = FieldPath::from_dotted("a.b").unwrap();
        assert!(a.is_prefix_of(&ab));
        assert!(!ab.is_prefix_of(&a));
        assert_eq!(a.child("b"), ab);
    }

    #[test]
    fn test_document_id() {
        assert!(FieldPath::document_id().is_document_id());
        assert!(!FieldPath::from_dotted("name").unwrap().is_document_id());
    }
}
