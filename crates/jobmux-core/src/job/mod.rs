//! Job identity, lifecycle state and payloads.

mod payload;

pub use payload::{JobBatch, Payload};

use serde_json::Value;
use std::fmt;

use crate::error::Error;

/// Job identifier, unique within one channel's queued/running/finished sets.
///
/// `Named("5")` and `Auto(5)` are different ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobId {
    /// Caller-supplied name.
    Named(String),
    /// Automatically assigned, monotonically increasing per channel.
    Auto(u64),
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobId::Named(name) => write!(f, "{}", name),
            JobId::Auto(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId::Named(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        JobId::Named(s)
    }
}

impl From<u64> for JobId {
    fn from(n: u64) -> Self {
        JobId::Auto(n)
    }
}

impl TryFrom<Value> for JobId {
    type Error = Error;

    /// Strings become `Named`, non-negative integers `Auto`; anything else is rejected.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => Ok(JobId::Named(s)),
            Value::Number(n) => n
                .as_u64()
                .map(JobId::Auto)
                .ok_or_else(|| Error::InvalidJobName(n.to_string())),
            other => Err(Error::InvalidJobName(other.to_string())),
        }
    }
}

/// Caller-visible lifecycle state. A retrieved job has no state (it is gone).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Finished,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Finished => "finished",
        }
    }
}

/// Opaque caller context carried from `add_job` to the response.
pub type JobContext = Value;
