//! Firestore Settings and Source types

use crate::error::{invalid_argument, FirebaseError};

/// Settings for configuring Firestore behavior
///
/// Settings are fixed once the client has started (its first read, write or
/// listener); see [`Firestore::set_settings`](super::Firestore::set_settings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Host of the Firestore backend to connect to
    ///
    /// Default: "firestore.googleapis.com"
    pub host: String,

    /// Whether to use SSL for communication
    ///
    /// Default: true
    pub ssl_enabled: bool,

    /// Whether to acquire local persistence when the client starts
    ///
    /// When persistence is held, the local document cache outlives the client
    /// and is handed to the next client opened for the same database. Failure
    /// to acquire it at start is logged and the client falls back to a private
    /// memory cache.
    ///
    /// Default: false
    pub persistence_enabled: bool,

    /// Cache size threshold for cached documents in bytes
    ///
    /// When the cache grows beyond this size the least recently written
    /// entries are evicted. Set to [`Settings::CACHE_SIZE_UNLIMITED`] to
    /// disable eviction.
    ///
    /// Default: 100 MB (104857600 bytes)
    pub cache_size_bytes: i64,

    /// Attempts a transaction makes before failing on contention
    ///
    /// Default: 5
    pub max_transaction_attempts: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "firestore.googleapis.com".to_string(),
            ssl_enabled: true,
            persistence_enabled: false,
            cache_size_bytes: 100 * 1024 * 1024, // 100 MB
            max_transaction_attempts: Self::DEFAULT_MAX_TRANSACTION_ATTEMPTS,
        }
    }
}

impl Settings {
    /// Constant to use with cache_size_bytes to disable garbage collection
    pub const CACHE_SIZE_UNLIMITED: i64 = -1;

    /// Smallest accepted cache size
    pub const MINIMUM_CACHE_SIZE_BYTES: i64 = 1024 * 1024;

    /// Default transaction retry budget
    pub const DEFAULT_MAX_TRANSACTION_ATTEMPTS: usize = 5;

    /// Creates default settings
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn validate(&self) -> Result<(), FirebaseError> {
        if self.host.is_empty() {
            return Err(invalid_argument("host must not be empty"));
        }
        if self.cache_size_bytes != Self::CACHE_SIZE_UNLIMITED
            && self.cache_size_bytes < Self::MINIMUM_CACHE_SIZE_BYTES
        {
            return Err(invalid_argument(format!(
                "cache_size_bytes must be at least {} or CACHE_SIZE_UNLIMITED, got {}",
                Self::MINIMUM_CACHE_SIZE_BYTES,
                self.cache_size_bytes
            )));
        }
        if self.max_transaction_attempts == 0 {
            return Err(invalid_argument("max_transaction_attempts must be at least 1"));
        }
        Ok(())
    }

    /// Cache limit in bytes, `None` when unlimited
    pub(crate) fn cache_limit(&self) -> Option<usize> {
        if self.cache_size_bytes == Self::CACHE_SIZE_UNLIMITED {
            None
        } else {
            Some(self.cache_size_bytes.max(0) as usize)
        }
    }
}

/// Source options for Firestore reads
///
/// Configures where Firestore should fetch data from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Source {
    /// Try server first, fall back to cache if the server is unreachable
    #[default]
    Default,

    /// Only fetch from server, fail if offline
    Server,

    /// Only read the local cache, fail if not cached
    Cache,
}
