//! Exponential retry backoff with jitter

use rand::Rng;
use std::time::Duration;

/// Delay before an entry with `retry_count` recorded failures becomes
/// eligible again: `min(base * 2^(retry_count - 1), cap)`.
#[must_use]
pub fn backoff_delay(retry_count: u32, base: Duration, cap: Duration) -> Duration {
    if retry_count == 0 {
        return Duration::ZERO;
    }
    let exponent = (retry_count - 1).min(31);
    let factor = 2u32.saturating_pow(exponent);
    base.saturating_mul(factor).min(cap)
}

/// Random jitter in `[0, max)`; zero when `max` is zero
#[must_use]
pub fn jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(1);
    const CAP: Duration = Duration::from_secs(300);

    #[test]
    fn test_first_retry_uses_base_delay() {
        assert_eq!(backoff_delay(1, BASE, CAP), BASE);
    }

    #[test]
    fn test_delay_doubles() {
        assert_eq!(backoff_delay(2, BASE, CAP), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, BASE, CAP), Duration::from_secs(4));
        assert_eq!(backoff_delay(4, BASE, CAP), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_is_capped() {
        assert_eq!(backoff_delay(10, BASE, CAP), CAP);
        // Huge retry counts must not overflow
        assert_eq!(backoff_delay(u32::MAX, BASE, CAP), CAP);
    }

    #[test]
    fn test_zero_retries_zero_delay() {
        assert_eq!(backoff_delay(0, BASE, CAP), Duration::ZERO);
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            let j = jitter(Duration::from_millis(1000));
            assert!(j < Duration::from_millis(1000));
        }
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }
}
