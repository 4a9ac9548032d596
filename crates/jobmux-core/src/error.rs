//! Error types for the job multiplexer.
//!
//! Caller misuse (`InvalidJobData`, `InvalidJobName`, `JobNotFound`, ...) and
//! fatal transport failures are errors. Per-job application failures (HTTP
//! 4xx/5xx, connect timeouts) are not: they arrive as a [`crate::Response`].

use crate::job::JobId;

/// Library result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error raised by the shared transport itself (multi handle add/remove/perform).
/// Always fatal: the multiplexer is in an unreliable state once this is seen.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("curl multi: {0}")]
    Multi(#[from] curl::MultiError),

    #[error("curl easy setup: {0}")]
    Easy(#[from] curl::Error),

    #[error("unknown operation handle {0}")]
    UnknownHandle(u64),

    #[error("transport: {0}")]
    Other(String),
}

/// Top-level error type for channel, manager and multi-channel operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid job data: {0}")]
    InvalidJobData(String),

    #[error("invalid job name: {0}")]
    InvalidJobName(String),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("job {0} already exists in this channel")]
    DuplicateJob(JobId),

    #[error("invalid request template: {0}")]
    InvalidTemplate(String),

    #[error("channel is not registered with a manager")]
    Unregistered,

    #[error("channel is already registered with a manager")]
    AlreadyRegistered,

    #[error("channel {0} still has running jobs")]
    ChannelBusy(u64),

    #[error("unknown channel {0}")]
    UnknownChannel(String),

    #[error("duplicate channel name {0}")]
    DuplicateChannel(String),

    #[error("no progress possible for job {0}: channel stopped, paused or out of capacity")]
    Stalled(JobId),

    #[error("timed out waiting for results")]
    Timeout,

    #[error("wait cancelled")]
    Cancelled,

    #[error("fatal transport error: {0}")]
    Transport(#[from] TransportError),
}

impl Error {
    /// True for errors that leave the shared transport unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}
