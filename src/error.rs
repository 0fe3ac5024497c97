//! Firebase error types
//!
//! Provides a unified error type hierarchy for all SDK operations.
//!
//! # Design
//! Uses thiserror for ergonomic error definitions. All errors implement
//! std::error::Error and can be converted to FirebaseError via From trait.
//! Local validation errors (`InvalidPath`, `InvalidArgument`) are returned
//! synchronously; everything else is the `Err` of the async operation.

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type FirebaseResult<T> = Result<T, FirebaseError>;

/// Top-level Firebase error type
///
/// Wraps module-specific errors into a unified type.
///
/// # Example
/// ```
/// use firestore_rust_sdk::{FirebaseError, FirestoreError};
///
/// let err: FirebaseError = FirestoreError::NotFound("users/alice".into()).into();
/// assert_eq!(err.code(), "not-found");
/// ```
#[derive(Debug, Error)]
pub enum FirebaseError {
    /// Firestore-related errors
    #[error("Firestore error: {0}")]
    Firestore(#[from] FirestoreError),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// API key not configured
    #[error("API key not configured")]
    ApiKeyNotConfigured,

    /// App with the given name was never created
    #[error("Firebase App '{0}' not found. Call App::create() first.")]
    AppNotFound(String),

    /// Operation cancelled (e.g. attaching to a cancelled snapshot listener)
    #[error("Operation cancelled")]
    Cancelled,
}

/// Why enabling local persistence failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceFailure {
    /// Another live client already holds persistence for this database
    AlreadyOpen,
    /// The configured datastore cannot persist a local cache
    Unsupported,
}

impl std::fmt::Display for PersistenceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyOpen => f.write_str("persistence is already open in another client"),
            Self::Unsupported => f.write_str("persistence is not supported in this environment"),
        }
    }
}

/// Firestore errors
///
/// Each variant is one error kind callers can branch on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FirestoreError {
    /// Malformed path or wrong segment parity
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Tried to take the parent of a root path
    #[error("Path '{0}' has no parent")]
    NoParent(String),

    /// Invalid, missing or mutually exclusive arguments
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Document not found
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Neither the server nor the local cache could answer
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The datastore rejected a commit for a reason other than contention
    #[error("Operation aborted: {0}")]
    Aborted(String),

    /// A document read by a transaction changed before commit
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    /// Transaction retry budget exhausted
    #[error("Transaction failed after {attempts} attempts")]
    TransactionFailed {
        /// Number of attempts performed
        attempts: usize,
    },

    /// Enabling local persistence failed
    #[error("Persistence error: {0}")]
    Persistence(PersistenceFailure),

    /// The client is not in a state that allows the operation
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FirebaseError {
    /// Create an internal error from a string
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable, machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Firestore(e) => e.code(),
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
            Self::ApiKeyNotConfigured => "invalid-api-key",
            Self::AppNotFound(_) => "no-app",
            Self::Cancelled => "cancelled",
        }
    }

    /// The Firestore error kind, if this is a Firestore error
    pub fn firestore(&self) -> Option<&FirestoreError> {
        match self {
            Self::Firestore(e) => Some(e),
            _ => None,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Firestore(FirestoreError::Unavailable(_))
                | Self::Firestore(FirestoreError::Conflict(_))
        )
    }
}

impl FirestoreError {
    /// Stable, machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPath(_) => "invalid-path",
            Self::NoParent(_) => "no-parent",
            Self::InvalidArgument(_) => "invalid-argument",
            Self::NotFound(_) => "not-found",
            Self::Unavailable(_) => "unavailable",
            Self::Aborted(_) => "aborted",
            Self::Conflict(_) => "conflict",
            Self::TransactionFailed { .. } => "transaction-failed",
            Self::Persistence(_) => "persistence",
            Self::FailedPrecondition(_) => "failed-precondition",
            Self::PermissionDenied(_) => "permission-denied",
            Self::Internal(_) => "internal",
        }
    }
}

pub(crate) fn invalid_argument(msg: impl Into<String>) -> FirebaseError {
    FirestoreError::InvalidArgument(msg.into()).into()
}

pub(crate) fn invalid_path(msg: impl Into<String>) -> FirebaseError {
    FirestoreError::InvalidPath(msg.into()).into()
}

pub(crate) fn failed_precondition(msg: impl Into<String>) -> FirebaseError {
    FirestoreError::FailedPrecondition(msg.into()).into()
}

pub(crate) fn unavailable(msg: impl Into<String>) -> FirebaseError {
    FirestoreError::Unavailable(msg.into()).into()
}
