//! Retry policy configuration for jobs.
//!
//! Fixed-delay retry with a bounded number of attempts. Whether a given
//! failure is retriable at all is decided by the executor; the policy only
//! bounds how many retries a retriable failure gets.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts, not including the initial attempt
    /// (0 = no retries). `max_attempts = 2` means up to 3 executions per
    /// trigger cycle: the original plus two retries.
    pub max_attempts: u32,

    /// Fixed delay before a retry becomes due again.
    #[serde(with = "serde_duration")]
    pub delay: Duration,
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            delay: Duration::ZERO,
        }
    }

    /// Create a policy with fixed-delay retries.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Check if retries are enabled.
    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// Whether another retry may follow a failure of the given 0-indexed
    /// attempt. Attempt 0 is the original execution.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    /// Default policy: no retries.
    fn default() -> Self {
        Self::none()
    }
}

/// Serde helper serializing Duration as whole seconds (matching the YAML
/// job-file format).
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
