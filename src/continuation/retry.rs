use crate::config::RetrySettings;
use std::time::Duration;

/// Backoff for re-running a window whose enrichment call failed.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after the first failed attempt.
    pub max_retries: u32,
    pub initial_backoff_secs: u64,
    /// Cap for exponential growth.
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_backoff_secs: settings.initial_backoff_secs,
            max_backoff_secs: settings.max_backoff_secs,
            backoff_multiplier: settings.backoff_multiplier,
        }
    }

    /// `initial_backoff * multiplier^attempt`, capped at `max_backoff_secs`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let backoff = self.initial_backoff_secs as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_secs(backoff.min(self.max_backoff_secs as f64) as u64)
    }

    /// Whether a continuation that failed on `attempt` gets another one.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetrySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_backoff_secs: 60,
            max_backoff_secs: 600,
            backoff_multiplier: 2.5,
        }
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = policy();
        assert_eq!(policy.backoff(0), Duration::from_secs(60));
        assert_eq!(policy.backoff(1), Duration::from_secs(150));
        assert_eq!(policy.backoff(2), Duration::from_secs(375));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = policy();
        assert_eq!(policy.backoff(3), Duration::from_secs(600));
        assert_eq!(policy.backoff(40), Duration::from_secs(600));
    }

    #[test]
    fn test_should_retry_until_max() {
        let policy = policy();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
