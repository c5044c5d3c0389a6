//! Logical time of a batch update
//!
//! A batch is created with one `Timestamp` and stamps it on every entry it
//! writes: metadata commits, change messages, attention-set updates, patch
//! sets. Entries written by one batch therefore compare equal on time.
//!
//! ```
//! use refbatch_core::Timestamp;
//!
//! let when = Timestamp::from_secs(1_700_000_000);
//! assert!(Timestamp::now() > when);
//! assert_eq!(when.to_string(), "1700000000.000000");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

const MICROS_PER_SEC: u64 = 1_000_000;

/// Microseconds since the Unix epoch
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch; also the creation time of a change with no history
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Wall-clock time, or the epoch if the clock reads earlier than 1970
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(u64::try_from(since_epoch.as_micros()).unwrap_or(u64::MAX))
    }

    /// Whole seconds since the epoch
    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs.saturating_mul(MICROS_PER_SEC))
    }

    /// Microseconds since the epoch
    pub const fn from_micros(micros: u64) -> Self {
        Timestamp(micros)
    }

    /// Raw microsecond value
    pub const fn as_micros(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0 / MICROS_PER_SEC, self.0 % MICROS_PER_SEC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_are_scaled() {
        assert_eq!(Timestamp::from_secs(3).as_micros(), 3_000_000);
        assert_eq!(Timestamp::from_secs(u64::MAX).as_micros(), u64::MAX);
        assert!(Timestamp::from_secs(1) > Timestamp::from_micros(999_999));
    }

    #[test]
    fn test_default_is_epoch() {
        assert_eq!(Timestamp::default(), Timestamp::EPOCH);
        assert_eq!(Timestamp::EPOCH.to_string(), "0.000000");
        assert_eq!(Timestamp::from_micros(12_000_345).to_string(), "12.000345");
    }

    #[test]
    fn test_serializes_as_plain_number() {
        let when = Timestamp::from_micros(42);
        assert_eq!(serde_json::to_string(&when).unwrap(), "42");
        let restored: Timestamp = serde_json::from_str("42").unwrap();
        assert_eq!(restored, when);
    }
}
