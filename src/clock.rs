//! Wall-clock access and interval-boundary arithmetic.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Source of Unix-epoch milliseconds used for boundary alignment and time-left reporting.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;

    /// The same instant as a [`SystemTime`].
    fn now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.now_ms())
    }
}

/// Clock backed by the operating system's real-time clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Clock that starts at a fixed epoch offset and advances with tokio's monotonic clock.
///
/// Under a paused tokio runtime it follows virtual time, which keeps boundary
/// computations and timer sleeps on the same timeline.
#[derive(Debug, Clone, Copy)]
pub struct InstantClock {
    origin_ms: u64,
    origin: Instant,
}

impl InstantClock {
    /// Start the clock at `origin_ms` milliseconds after the Unix epoch.
    pub fn starting_at(origin_ms: u64) -> Self {
        Self {
            origin_ms,
            origin: Instant::now(),
        }
    }
}

impl Clock for InstantClock {
    fn now_ms(&self) -> u64 {
        self.origin_ms + self.origin.elapsed().as_millis() as u64
    }
}

/// Time remaining until the next multiple of `interval_ms` since the epoch.
///
/// Exactly on a boundary this returns a full interval, so a caller that re-arms right after
/// handling boundary `B` waits for `B + interval` rather than firing `B` twice.
pub fn until_next_boundary_ms(now_ms: u64, interval_ms: u64) -> u64 {
    if interval_ms == 0 {
        return 0;
    }
    interval_ms - now_ms % interval_ms
}

/// Converts milliseconds to fractional seconds for client payloads.
pub fn ms_to_secs(ms: u64) -> f64 {
    ms as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_delay_is_aligned_to_epoch_multiples() {
        assert_eq!(until_next_boundary_ms(0, 40_000), 40_000);
        assert_eq!(until_next_boundary_ms(1_000, 40_000), 39_000);
        assert_eq!(until_next_boundary_ms(39_999, 40_000), 1);
        assert_eq!(until_next_boundary_ms(80_000, 40_000), 40_000);
        assert_eq!(until_next_boundary_ms(1_700_000_012_345, 40_000), 27_655);
    }

    #[tokio::test(start_paused = true)]
    async fn instant_clock_follows_virtual_time() {
        let clock = InstantClock::starting_at(40_000);
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(clock.now_ms(), 42_500);
        assert_eq!(
            clock.now(),
            UNIX_EPOCH + Duration::from_millis(42_500)
        );
    }

    #[test]
    fn seconds_conversion_keeps_fractions() {
        assert_eq!(ms_to_secs(30_000), 30.0);
        assert_eq!(ms_to_secs(1_500), 1.5);
    }
}
