//! Transport: the shared multiplexer that executes prepared requests.
//!
//! One transport instance is owned by a [`crate::ChannelManager`] and shared by
//! every channel registered with it. The manager registers operations, drives
//! them with `advance`/`poll` and drains completions; channels never touch the
//! transport directly.
//!
//! Errors returned from these methods are fatal ([`TransportError`]). Failures
//! of a single operation (timeout, refused connection) are reported inside its
//! [`RawResult`] instead.

mod multi;
mod memory;
#[cfg(test)]
pub(crate) mod stub;

pub use multi::{CurlOptions, CurlTransport};
pub use memory::{CompletionOrder, MemoryStats, MemoryTransport};

use std::fmt;
use std::time::Duration;

use crate::error::TransportError;
use crate::request::PreparedRequest;

/// Handle for one registered operation, minted by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationHandle(pub u64);

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Why a single operation failed below the HTTP layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connect or transfer timeout.
    Timeout,
    /// DNS, refused/reset connection, empty reply, send/recv failure.
    Connection,
    /// Response rejected by the transport (e.g. body over the size cap).
    Aborted,
    /// The request could not be built from the channel's template.
    Invalid,
    Other,
}

/// Per-operation failure carried as data inside a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// What the transport reports for one finished operation.
#[derive(Debug, Clone, Default)]
pub struct RawResult {
    /// HTTP status, or 0 if none was received.
    pub status: u32,
    /// Header lines of the final response, without line terminators.
    pub header_lines: Vec<String>,
    pub body: Vec<u8>,
    pub effective_url: Option<String>,
    pub failure: Option<TransportFailure>,
}

impl RawResult {
    pub fn status(status: u32) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn failed(failure: TransportFailure) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }
}

/// A drained completion.
#[derive(Debug)]
pub struct Completion {
    pub handle: OperationHandle,
    pub raw: RawResult,
}

/// Contract between the manager and the multiplexing backend.
pub trait Transport {
    /// Add a prepared request as a new in-flight operation.
    fn register(&mut self, request: &PreparedRequest) -> Result<OperationHandle, TransportError>;

    /// Release an operation. Aborts it if it has not completed yet.
    fn deregister(&mut self, handle: OperationHandle) -> Result<(), TransportError>;

    /// Drive in-flight operations forward; returns how many are still active.
    fn advance(&mut self) -> Result<usize, TransportError>;

    /// Wait up to `timeout` for activity; returns the number of completions ready to drain.
    fn poll(&mut self, timeout: Duration) -> Result<usize, TransportError>;

    /// Take every completion observed so far.
    fn drain_completions(&mut self) -> Vec<Completion>;
}
