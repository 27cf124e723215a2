//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-session transport settings.
///
/// The same values apply to every session a server creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Depth of the bounded outbound queue. A `send` that finds it full
    /// disconnects the session.
    pub queue_capacity: usize,

    /// Deadline for each socket flush. Missing it is a transport failure.
    #[serde(rename = "write_timeout_ms", with = "duration_ms")]
    pub write_timeout: Duration,

    /// Upper bound on bytes coalesced into one socket write.
    pub max_batch_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 512,
            write_timeout: Duration::from_secs(10),
            max_batch_bytes: 64 * 1024,
        }
    }
}

impl SessionConfig {
    /// Returns configuration problems, if any. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.queue_capacity == 0 {
            errors.push("session queue_capacity must be greater than 0".to_string());
        } else if self.queue_capacity > 1_000_000 {
            errors.push(format!(
                "session queue_capacity ({}) is unreasonably large",
                self.queue_capacity
            ));
        }
        if self.write_timeout.is_zero() {
            errors.push("session write_timeout_ms must be greater than 0".to_string());
        }
        if self.max_batch_bytes == 0 {
            errors.push("session max_batch_bytes must be greater than 0".to_string());
        }
        errors
    }
}

/// Serializes a [`Duration`] as whole milliseconds.
pub mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Writes the duration as a millisecond count.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        millis.serialize(serializer)
    }

    /// Reads a millisecond count.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
