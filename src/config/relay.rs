//! Relay pipeline and lifecycle configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Consumer, producer and subscriber tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Upper bound on one consumer poll; also bounds how quickly it observes a stop.
    pub poll_timeout_ms: u64,
    /// Frames buffered per subscriber before it is considered too slow and dropped.
    pub subscriber_buffer: usize,
    /// How long an ingestion request waits for the delivery report.
    pub confirm_timeout_ms: u64,
    /// Commit consumed offsets so a restart resumes instead of replaying.
    pub commit_offsets: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100,
            subscriber_buffer: 256,
            confirm_timeout_ms: 5000,
            commit_offsets: true,
        }
    }
}

impl RelayConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

/// Startup and shutdown configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Total time allowed for draining before components are abandoned.
    pub grace_period_secs: u64,
    /// Optional watchdog; the relay drains once this much time has passed.
    pub max_run_time_secs: Option<u64>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 10,
            max_run_time_secs: None,
        }
    }
}

impl LifecycleConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn max_run_time(&self) -> Option<Duration> {
        self.max_run_time_secs.map(Duration::from_secs)
    }
}
