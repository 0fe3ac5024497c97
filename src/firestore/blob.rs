//! Binary blob values

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::field_value::Value;
use crate::error::{invalid_argument, FirebaseError};

/// Immutable sequence of bytes stored in a document field
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Blob(#[serde(with = "serde_bytes")] Vec<u8>);

impl Blob {
    /// Wrap raw bytes
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Decode a standard base64 string
    pub fn from_base64(encoded: &str) -> Result<Self, FirebaseError> {
        STANDARD
            .decode(encoded)
            .map(Self)
            .map_err(|e| invalid_argument(format!("invalid base64 blob: {}", e)))
    }

    /// Standard base64 encoding
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when there are no bytes
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Wrap as a document value
    pub fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Blob({})", self.to_base64())
    }
}

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Blob {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}
