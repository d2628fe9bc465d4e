//! No-data watchdog check.

use std::time::Duration;

use tokio::time::Instant;

/// Whether the feed has been silent for at least `nodata_timeout`.
///
/// A feed that never delivered anything is infinitely stale, so this
/// reports silence right away instead of waiting for a first reading.
pub fn is_silent(now: Instant, last_observed_at: Option<Instant>, nodata_timeout: Duration) -> bool {
    match last_observed_at {
        Some(last) => now.saturating_duration_since(last) >= nodata_timeout,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(300);

    #[tokio::test(start_paused = true)]
    async fn never_received_is_silent() {
        assert!(is_silent(Instant::now(), None, TIMEOUT));
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_reading_is_not_silent() {
        let now = Instant::now();
        assert!(!is_silent(now, Some(now), TIMEOUT));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_exactly_at_timeout() {
        let last = Instant::now();
        assert!(!is_silent(last + Duration::from_secs(299), Some(last), TIMEOUT));
        assert!(is_silent(last + TIMEOUT, Some(last), TIMEOUT));
    }

    #[tokio::test(start_paused = true)]
    async fn reading_from_the_future_is_not_silent() {
        // Clock skew between the two event paths must not underflow.
        let now = Instant::now();
        assert!(!is_silent(now, Some(now + Duration::from_secs(1)), TIMEOUT));
    }
}
