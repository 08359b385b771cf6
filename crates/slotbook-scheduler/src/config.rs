//! Scheduler tuning.

use std::time::Duration;

/// How often the loop looks for due jobs.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Deadline for a single execution attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts before a failing job is given up on.
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// First step of the exponential backoff.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(100);

/// Deadline for each success/failure observer.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Timing and retry policy for a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub attempt_timeout: Duration,
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub callback_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: DEFAULT_BASE_BACKOFF,
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }
}

impl SchedulerConfig {
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    pub fn with_callback_timeout(mut self, callback_timeout: Duration) -> Self {
        self.callback_timeout = callback_timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.attempt_timeout, Duration::from_secs(10));
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_backoff, Duration::from_millis(100));
    }

    #[test]
    fn test_builders_override_one_field() {
        let config = SchedulerConfig::default().with_max_attempts(3);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.tick_interval, DEFAULT_TICK_INTERVAL);
    }
}
