//! Exponential backoff between retransmissions.
//!
//! Deterministic on purpose: retransmit timing must stay predictable against a vehicle that
//! executes one command at a time.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        let max = max.max(base);
        Self {
            base,
            max,
            current: None,
        }
    }

    /// The delay to wait before the next attempt: `base` first, then doubling up to `max`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => self.base,
            Some(current) => current.saturating_mul(2).min(self.max),
        };
        self.current = Some(delay);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_from_base() {
        let mut backoff = Backoff::new(Duration::from_millis(300), Duration::from_secs(2));

        assert_eq!(backoff.next_delay(), Duration::from_millis(300));
        assert_eq!(backoff.next_delay(), Duration::from_millis(600));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1200));
    }

    #[test]
    fn test_saturates_at_max() {
        let mut backoff = Backoff::new(Duration::from_millis(300), Duration::from_secs(2));

        for _ in 0..3 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_max_below_base_is_raised() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
