//! Configuration types for the queue and the process runner.

use serde::{Deserialize, Serialize};

/// Automatic-retry policy for one armed run of the queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Whether failed jobs are automatically re-queued.
    pub enabled: bool,
    /// Ceiling on recorded failures per input/output pair.
    pub max_retries_per_job: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries_per_job: 2,
        }
    }
}

impl RetryPolicy {
    /// Enable automatic retries with the given per-pair ceiling.
    pub fn enabled(max_retries_per_job: u32) -> Self {
        Self {
            enabled: true,
            max_retries_per_job,
        }
    }
}

/// Options applied when arming the queue.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StartOptions {
    /// Retry policy for this run.
    pub retry: RetryPolicy,
}

impl StartOptions {
    /// Arm with the given retry policy.
    pub fn with_retry(retry: RetryPolicy) -> Self {
        Self { retry }
    }
}

/// Queue-level tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
        }
    }
}

/// Tunables for the ffmpeg process runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Binary to invoke.
    pub binary_path: String,
    /// Number of trailing diagnostic lines kept for failure reporting.
    pub tail_lines: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            tail_lines: 12,
        }
    }
}

impl RunnerConfig {
    /// Use a specific binary path.
    pub fn with_binary_path(mut self, path: impl Into<String>) -> Self {
        self.binary_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_defaults_to_disabled() {
        let policy = RetryPolicy::default();
        assert!(!policy.enabled);
        assert_eq!(policy.max_retries_per_job, 2);
    }

    #[test]
    fn enabled_policy_keeps_ceiling() {
        let policy = RetryPolicy::enabled(5);
        assert!(policy.enabled);
        assert_eq!(policy.max_retries_per_job, 5);
    }

    #[test]
    fn runner_config_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.binary_path, "ffmpeg");
        assert_eq!(config.tail_lines, 12);
    }
}
