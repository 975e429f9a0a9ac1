//! Bounded exponential backoff for erase confirmation polls.

use std::time::Duration;

/// How often, and how patiently, to poll for an erase to take effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmPolicy {
    /// Maximum number of confirmation polls.
    pub attempts: u32,
    /// Delay after the first unsuccessful poll; doubles each time.
    pub base_delay: Duration,
}

impl Default for ConfirmPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base_delay: Duration::from_millis(100),
        }
    }
}

/// Attempt counter for one confirmation run.
///
/// Pure state: it never sleeps, it only says how long to wait, so the
/// schedule can be tested without a clock.
#[derive(Debug, Clone)]
pub struct ConfirmBackoff {
    policy: ConfirmPolicy,
    polls: u32,
}

impl ConfirmBackoff {
    pub fn new(policy: ConfirmPolicy) -> Self {
        Self { policy, polls: 0 }
    }

    /// Record an unsuccessful poll.
    ///
    /// Returns the delay before polling again, or `None` once every attempt
    /// has been used.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.polls += 1;
        if self.polls >= self.policy.attempts {
            return None;
        }
        let factor = 1u32.checked_shl(self.polls - 1).unwrap_or(u32::MAX);
        Some(self.policy.base_delay.saturating_mul(factor))
    }

    /// Polls recorded so far.
    pub fn polls(&self) -> u32 {
        self.polls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_doubles_from_100ms() {
        let mut backoff = ConfirmBackoff::new(ConfirmPolicy::default());
        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
        assert_eq!(backoff.polls(), 5);
    }

    #[test]
    fn test_single_attempt_never_waits() {
        let mut backoff = ConfirmBackoff::new(ConfirmPolicy {
            attempts: 1,
            base_delay: Duration::from_secs(1),
        });
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_large_attempt_counts_saturate() {
        let mut backoff = ConfirmBackoff::new(ConfirmPolicy {
            attempts: 100,
            base_delay: Duration::from_secs(1),
        });
        let last = std::iter::from_fn(|| backoff.next_delay()).last().unwrap();
        assert!(last >= Duration::from_secs(1));
    }
}
