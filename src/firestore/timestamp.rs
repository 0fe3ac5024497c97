//! Firestore Timestamp type
//!
//! Nanosecond-precision point in time, independent of any time zone.

use crate::error::FirestoreError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::field_value::Value;

/// Firestore timestamp
///
/// Ordered by seconds, then nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since Unix epoch
    pub seconds: i64,

    /// Nanoseconds component (0-999,999,999)
    pub nanoseconds: i32,
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(seconds: i64, nanoseconds: i32) -> Result<Self, FirestoreError> {
        if nanoseconds < 0 || nanoseconds >= 1_000_000_000 {
            return Err(FirestoreError::InvalidArgument(format!(
                "nanoseconds must be in range [0, 999999999], got {}",
                nanoseconds
            )));
        }

        Ok(Self {
            seconds,
            nanoseconds,
        })
    }

    /// Get current timestamp
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Convert from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self {
            seconds: dt.timestamp(),
            nanoseconds: dt.timestamp_subsec_nanos() as i32,
        }
    }

    /// Convert to DateTime
    pub fn to_datetime(&self) -> DateTime<Utc> {
        let Some(dt) = DateTime::from_timestamp(self.seconds, self.nanoseconds as u32) else {
            return Utc::now();
        };
        dt
    }

    /// RFC 3339 form with nanosecond precision, used for JSON output
    pub fn to_rfc3339(&self) -> String {
        self.to_datetime()
            .to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    /// Wrap as a document value
    pub fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_datetime(dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_creation() {
        let ts = Timestamp::new(1234567890, 123456789).unwrap();
        assert_eq!(ts.seconds, 1234567890);
        assert_eq!(ts.nanoseconds, 123456789);
    }

    #[test]
    fn test_timestamp_invalid_nanoseconds_negative() {
        assert!(Timestamp::new(0, -1).is_err());
    }

    #[test]
    fn test_timestamp_invalid_nanoseconds_too_large() {
        assert!(Timestamp::new(0, 1_000_000_000).is_err());
    }

    #[test]
    fn test_timestamp_valid_nanoseconds_boundary() {
        assert!(Timestamp::new(0, 0).is_ok());
        assert!(Timestamp::new(0, 999_999_999).is_ok());
    }

    #[test]
    fn test_timestamp_datetime_conversion() {
        let now = Utc::now();
        let ts = Timestamp::from_datetime(now);
        let dt = ts.to_datetime();

        // Should be approximately equal (within 1 second)
        assert!((dt.timestamp() - now.timestamp()).abs() <= 1);
    }

    #[test]
    fn test_timestamp_epoch() {
        let epoch = Timestamp::new(0, 0).unwrap();
        let dt = epoch.to_datetime();
        assert_eq!(dt.timestamp(), 0);
    }

    #[test]
    fn test_timestamp_to_value() {
        let ts = Timestamp::new(1234567890, 123456789).unwrap();
        assert_eq!(ts.to_value(), Value::Timestamp(ts));
    }

    #[test]
    fn test_timestamp_ordering() {
        let a = Timestamp::new(10, 5).unwrap();
        let b = Timestamp::new(10, 6).unwrap();
        let c = Timestamp::new(11, 0).unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_timestamp_rfc3339() {
        let ts = Timestamp::new(0, 500_000_000).unwrap();
        assert_eq!(ts.to_rfc3339(), "1970-01-01T00:00:00.500Z");
    }

    #[test]
    fn test_timestamp_negative_seconds() {
        // Unix timestamps can be negative (before epoch)
        let ts = Timestamp::new(-1000, 0).unwrap();
        assert_eq!(ts.seconds, -1000);
    }

    #[test]
    fn test_timestamp_large_values() {
        // Test with large timestamp values (year 2100+)
        let ts = Timestamp::new(4102444800, 999999999).unwrap();
        assert_eq!(ts.seconds, 4102444800);
        assert_eq!(ts.nanoseconds, 999999999);
    }
}
