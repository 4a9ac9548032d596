//! Misbehaving transports for scheduler tests.

use std::time::Duration;

use crate::error::TransportError;
use crate::request::PreparedRequest;
use crate::transport::{Completion, OperationHandle, Transport};

/// Accepts operations and never completes them.
#[derive(Default)]
pub(crate) struct Blackhole {
    next: u64,
    live: usize,
}

impl Transport for Blackhole {
    fn register(&mut self, _: &PreparedRequest) -> Result<OperationHandle, TransportError> {
        self.next += 1;
        self.live += 1;
        Ok(OperationHandle(self.next))
    }

    fn deregister(&mut self, _: OperationHandle) -> Result<(), TransportError> {
        self.live = self.live.saturating_sub(1);
        Ok(())
    }

    fn advance(&mut self) -> Result<usize, TransportError> {
        Ok(self.live)
    }

    fn poll(&mut self, timeout: Duration) -> Result<usize, TransportError> {
        std::thread::sleep(timeout);
        Ok(0)
    }

    fn drain_completions(&mut self) -> Vec<Completion> {
        Vec::new()
    }
}

/// Registers fine, then fails every time it is driven.
#[derive(Default)]
pub(crate) struct Broken {
    next: u64,
}

impl Transport for Broken {
    fn register(&mut self, _: &PreparedRequest) -> Result<OperationHandle, TransportError> {
        self.next += 1;
        Ok(OperationHandle(self.next))
    }

    fn deregister(&mut self, handle: OperationHandle) -> Result<(), TransportError> {
        Err(TransportError::UnknownHandle(handle.0))
    }

    fn advance(&mut self) -> Result<usize, TransportError> {
        Err(TransportError::Other("multi handle is gone".into()))
    }

    fn poll(&mut self, _: Duration) -> Result<usize, TransportError> {
        Err(TransportError::Other("multi handle is gone".into()))
    }

    fn drain_completions(&mut self) -> Vec<Completion> {
        Vec::new()
    }
}

/// Rejects every new operation.
#[derive(Default)]
pub(crate) struct Refusing;

impl Transport for Refusing {
    fn register(&mut self, _: &PreparedRequest) -> Result<OperationHandle, TransportError> {
        Err(TransportError::Other("too many open handles".into()))
    }

    fn deregister(&mut self, handle: OperationHandle) -> Result<(), TransportError> {
        Err(TransportError::UnknownHandle(handle.0))
    }

    fn advance(&mut self) -> Result<usize, TransportError> {
        Ok(0)
    }

    fn poll(&mut self, _: Duration) -> Result<usize, TransportError> {
        Ok(0)
    }

    fn drain_completions(&mut self) -> Vec<Completion> {
        Vec::new()
    }
}
