//! Timestamp utilities

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use std::sync::{Arc, Mutex};

/// Get current UTC timestamp, truncated to microseconds
///
/// Stored timestamps use microsecond precision so that a value read back
/// from the database compares equal to the one that was written.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Format a timestamp the way it is stored (RFC 3339, microseconds, `Z`)
pub fn to_storage(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored RFC 3339 timestamp
pub fn from_storage(s: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::Error::Internal(format!("Failed to parse timestamp '{}': {}", s, e)))
}

/// Source of "now" for components with time-based rules (TTL expiry)
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        now()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start.trunc_subsecs(6))),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut current) = self.current.lock() {
            *current += by;
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut current) = self.current.lock() {
            *current = to.trunc_subsecs(6);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.current.lock() {
            Ok(current) => *current,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01
        assert!(timestamp.timestamp() < 4_102_444_800); // 2100-01-01
    }

    #[test]
    fn test_now_has_microsecond_precision() {
        let timestamp = now();
        assert_eq!(timestamp.timestamp_subsec_nanos() % 1000, 0);
    }

    #[test]
    fn test_storage_roundtrip_preserves_value() {
        let ts = now();
        let stored = to_storage(&ts);
        assert!(stored.ends_with('Z'));
        assert_eq!(from_storage(&stored).unwrap(), ts);
    }

    #[test]
    fn test_from_storage_rejects_garbage() {
        assert!(from_storage("yesterday").is_err());
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = now();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::hours(25));
        assert_eq!(clock.now() - start, chrono::Duration::hours(25));
    }
}
