//! Timestamp and monotonic-clock utilities

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Milliseconds remaining until `deadline`, saturating at zero
pub fn millis_until(deadline: Instant, now: Instant) -> u64 {
    deadline.saturating_duration_since(now).as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
    }

    #[tokio::test]
    async fn test_millis_until_saturates() {
        let now = Instant::now();
        let later = now + Duration::from_millis(750);
        assert_eq!(millis_until(later, now), 750);
        assert_eq!(millis_until(now, later), 0);
    }
}
