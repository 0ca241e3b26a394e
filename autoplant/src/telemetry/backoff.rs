//! Exponential reconnect backoff.

use std::time::Duration;

/// Doubling backoff with up to one second of random jitter.
///
/// The un-jittered delay starts at `floor` and doubles after every delay
/// handed out. Once it exceeds `ceiling` the caller should stop retrying:
/// [`Backoff::next_delay`] returns `None` from then on until [`Backoff::reset`].
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    ceiling: Duration,
    current: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(floor: Duration, ceiling: Duration) -> Self {
        let floor = floor.max(Duration::from_millis(1));
        Self {
            floor,
            ceiling,
            current: floor,
            jitter: true,
        }
    }

    /// Enable or disable the random jitter component.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// The un-jittered delay the next call to `next_delay` will use.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn is_exhausted(&self) -> bool {
        self.current > self.ceiling
    }

    /// Delay to wait before the next attempt, or `None` to give up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }

        let base = self.current;
        self.current = self.current.saturating_mul(2);

        if self.jitter {
            Some(base + Duration::from_secs_f64(rand::random::<f64>()))
        } else {
            Some(base)
        }
    }

    /// Back to the floor after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_doubles_until_ceiling_then_gives_up() {
        let mut backoff = Backoff::new(secs(1), secs(128)).with_jitter(false);

        let mut delays = Vec::new();
        while let Some(delay) = backoff.next_delay() {
            delays.push(delay.as_secs());
        }

        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 64, 128]);
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_deterministic_component_is_monotonic() {
        let mut backoff = Backoff::new(Duration::from_millis(250), secs(30));
        let mut previous = Duration::ZERO;
        while !backoff.is_exhausted() {
            let base = backoff.current();
            assert!(base >= previous);
            previous = base;
            backoff.next_delay();
        }
    }

    #[test]
    fn test_jitter_stays_below_one_second() {
        let mut backoff = Backoff::new(secs(4), secs(128));
        for _ in 0..3 {
            let base = backoff.current();
            let delay = backoff.next_delay().unwrap();
            assert!(delay >= base);
            assert!(delay < base + secs(1));
        }
    }

    #[test]
    fn test_reset_returns_to_floor() {
        let mut backoff = Backoff::new(secs(1), secs(8)).with_jitter(false);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.current(), secs(4));

        backoff.reset();
        assert_eq!(backoff.current(), secs(1));
        assert_eq!(backoff.next_delay(), Some(secs(1)));
    }

    #[test]
    fn test_floor_above_ceiling_gives_up_immediately() {
        let mut backoff = Backoff::new(secs(10), secs(5));
        assert_eq!(backoff.next_delay(), None);
    }
}
