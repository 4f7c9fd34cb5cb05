use std::time::Duration;

/// Delay before the first retry.
/// 8 seconds keeps a flapping network from hammering the API.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(8);

/// Ceiling for the retry delay.
/// Kept under a minute so a recovered network is noticed quickly.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Exponential retry schedule: `initial * 2^(attempt - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Delay before the retry that follows failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let backoff = Backoff::default();
        let delays: Vec<u64> = (1..=6).map(|a| backoff.delay(a).as_secs()).collect();
        assert_eq!(delays, vec![8, 16, 32, 32, 32, 32]);
    }

    #[test]
    fn test_delay_never_decreases_and_stays_capped() {
        let backoff = Backoff::new(Duration::from_millis(750), Duration::from_secs(45));
        let mut previous = Duration::ZERO;
        for attempt in 0..200 {
            let delay = backoff.delay(attempt);
            assert!(delay >= previous);
            assert!(delay <= Duration::from_secs(45));
            previous = delay;
        }
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(45));
    }

    #[test]
    fn test_max_below_initial_is_raised() {
        let backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(backoff.max(), Duration::from_secs(10));
        assert_eq!(backoff.delay(3), Duration::from_secs(10));
    }
}
