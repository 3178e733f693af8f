//! Delay compensation between capture and seek
//!
//! The photo is taken at `captured_at`, but by the time the digits are read
//! the on-screen clock has moved on. The elapsed time (never less than a
//! configured floor) is added back so the seek lands where the user is now.

use std::time::Duration;
use tokio::time::Instant;

/// A recognized time with the capture delay folded in. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTimeline {
    /// Seek target: raw seconds plus the delay rounded up to whole seconds
    pub total_seconds: u64,
    /// Seconds read from the capture, before compensation
    pub raw_seconds: u64,
    pub captured_at: Instant,
    pub resolved_at: Instant,
    /// `resolved_at - captured_at`, floored at the minimum delay
    pub delay: Duration,
}

impl ResolvedTimeline {
    pub fn delay_seconds(&self) -> f64 {
        self.delay.as_secs_f64()
    }
}

/// Fold the capture-to-resolution delay into a raw elapsed time.
pub fn compensate(
    captured_at: Instant,
    resolved_at: Instant,
    raw_total_seconds: u64,
    minimum_delay: Duration,
) -> ResolvedTimeline {
    let elapsed = resolved_at.saturating_duration_since(captured_at);
    let delay = elapsed.max(minimum_delay);

    ResolvedTimeline {
        total_seconds: raw_total_seconds.saturating_add(ceil_secs(delay)),
        raw_seconds: raw_total_seconds,
        captured_at,
        resolved_at,
        delay,
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOOR: Duration = Duration::from_millis(2500);

    #[test]
    fn test_zero_elapsed_uses_floor_exactly() {
        let t = Instant::now();
        let resolved = compensate(t, t, 100, FLOOR);
        assert_eq!(resolved.delay, FLOOR);
        assert_eq!(resolved.delay_seconds(), 2.5);
        assert_eq!(resolved.total_seconds, 103);
    }

    #[test]
    fn test_slow_resolution_adds_ceiled_delay() {
        let captured = Instant::now();
        let resolved_at = captured + Duration::from_millis(3100);
        let resolved = compensate(captured, resolved_at, 5025, FLOOR);
        assert_eq!(resolved.delay, Duration::from_millis(3100));
        assert_eq!(resolved.total_seconds, 5029);
        assert_eq!(resolved.raw_seconds, 5025);
    }

    #[test]
    fn test_whole_second_delay_is_not_rounded_up() {
        let captured = Instant::now();
        let resolved = compensate(captured, captured + Duration::from_secs(4), 10, FLOOR);
        assert_eq!(resolved.total_seconds, 14);
    }

    #[test]
    fn test_clock_going_backwards_is_treated_as_zero_elapsed() {
        let resolved_at = Instant::now();
        let captured = resolved_at + Duration::from_secs(1);
        let resolved = compensate(captured, resolved_at, 0, FLOOR);
        assert_eq!(resolved.delay, FLOOR);
        assert_eq!(resolved.total_seconds, 3);
    }
}
