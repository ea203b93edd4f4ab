use crate::config::RetryConfig;
use std::time::Duration;

/// Decision returned by the retry policy after a transient poll failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Poll again after `delay` (includes the 1-based attempt number).
    Retry { attempt: u32, delay: Duration },
    /// Too many consecutive failures; escalate to fatal.
    GiveUp { attempts: u32 },
}

/// Backoff policy for transient broker errors.
///
/// Tracks consecutive failures; a successful poll resets the count.
pub struct RetryPolicy {
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    max_consecutive_errors: u32,
    consecutive: u32,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            max_consecutive_errors: config.max_consecutive_errors,
            consecutive: 0,
        }
    }

    /// Record a transient failure and decide what to do next.
    pub fn evaluate(&mut self) -> RetryDecision {
        self.consecutive = self.consecutive.saturating_add(1);

        if self.max_consecutive_errors != 0 && self.consecutive > self.max_consecutive_errors {
            return RetryDecision::GiveUp {
                attempts: self.consecutive,
            };
        }

        RetryDecision::Retry {
            attempt: self.consecutive,
            delay: Duration::from_millis(backoff_delay(
                self.initial_backoff_ms,
                self.consecutive - 1,
                self.max_backoff_ms,
            )),
        }
    }

    /// Reset after a successful poll.
    pub fn reset(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive
    }
}

/// Exponential backoff: `initial * 2^consecutive_count`, capped at `max`.
pub fn backoff_delay(initial_ms: u64, consecutive_count: u32, max_ms: u64) -> u64 {
    let shift = 1u64.checked_shl(consecutive_count).unwrap_or(u64::MAX);
    let delay = initial_ms.saturating_mul(shift);
    delay.min(max_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(initial: u64, max: u64, limit: u32) -> RetryPolicy {
        RetryPolicy::new(&RetryConfig {
            initial_backoff_ms: initial,
            max_backoff_ms: max,
            max_consecutive_errors: limit,
        })
    }

    #[test]
    fn test_first_retry_uses_initial_backoff() {
        let mut policy = policy(100, 10_000, 0);
        assert_eq!(
            policy.evaluate(),
            RetryDecision::Retry {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut policy = policy(100, 500, 0);
        let delays: Vec<_> = (0..5)
            .map(|_| match policy.evaluate() {
                RetryDecision::Retry { delay, .. } => delay.as_millis(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn test_give_up_after_limit() {
        let mut policy = policy(10, 100, 2);
        assert!(matches!(policy.evaluate(), RetryDecision::Retry { attempt: 1, .. }));
        assert!(matches!(policy.evaluate(), RetryDecision::Retry { attempt: 2, .. }));
        assert_eq!(policy.evaluate(), RetryDecision::GiveUp { attempts: 3 });
    }

    #[test]
    fn test_zero_limit_retries_forever() {
        let mut policy = policy(1, 1, 0);
        for _ in 0..1000 {
            assert!(matches!(policy.evaluate(), RetryDecision::Retry { .. }));
        }
    }

    #[test]
    fn test_reset_clears_consecutive_count() {
        let mut policy = policy(100, 10_000, 2);
        policy.evaluate();
        policy.evaluate();
        assert_eq!(policy.consecutive_errors(), 2);
        policy.reset();
        assert_eq!(policy.consecutive_errors(), 0);
        assert!(matches!(policy.evaluate(), RetryDecision::Retry { attempt: 1, .. }));
    }

    #[test]
    fn test_backoff_delay_huge_exponent_saturates() {
        assert_eq!(backoff_delay(2, 200, 600), 600);
        assert_eq!(backoff_delay(0, 5, 600), 0);
    }
}
