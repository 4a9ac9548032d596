//! In-process transport: answers requests through a responder closure.
//!
//! Nothing touches the network. Each `advance` completes up to `batch`
//! registered operations in FIFO or LIFO order, which makes completion order
//! and concurrency fully deterministic for tests and dry runs.

use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use crate::error::TransportError;
use crate::request::PreparedRequest;
use crate::transport::{Completion, OperationHandle, RawResult, Transport};

/// Order in which registered operations complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionOrder {
    #[default]
    Fifo,
    Lifo,
}

#[derive(Debug, Default)]
struct StatsInner {
    registered: Cell<usize>,
    active: Cell<usize>,
    peak_active: Cell<usize>,
    urls: RefCell<Vec<String>>,
}

/// Shared view of what a [`MemoryTransport`] has seen.
#[derive(Debug, Clone, Default)]
pub struct MemoryStats(Rc<StatsInner>);

impl MemoryStats {
    /// Total operations ever registered.
    pub fn registered(&self) -> usize {
        self.0.registered.get()
    }

    /// Operations registered and not yet deregistered.
    pub fn active(&self) -> usize {
        self.0.active.get()
    }

    /// Highest simultaneous `active` value observed.
    pub fn peak_active(&self) -> usize {
        self.0.peak_active.get()
    }

    /// URLs in registration order.
    pub fn urls(&self) -> Vec<String> {
        self.0.urls.borrow().clone()
    }
}

type Responder = Box<dyn FnMut(&PreparedRequest) -> RawResult>;

pub struct MemoryTransport {
    responder: Responder,
    next_id: u64,
    pending: VecDeque<(OperationHandle, PreparedRequest)>,
    live: HashSet<u64>,
    completed: Vec<Completion>,
    batch: Option<usize>,
    order: CompletionOrder,
    stats: MemoryStats,
}

impl MemoryTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&PreparedRequest) -> RawResult + 'static,
    {
        Self {
            responder: Box::new(responder),
            next_id: 0,
            pending: VecDeque::new(),
            live: HashSet::new(),
            completed: Vec::new(),
            batch: None,
            order: CompletionOrder::Fifo,
            stats: MemoryStats::default(),
        }
    }

    /// Every request answers `200` with the request URL as body.
    pub fn echo() -> Self {
        Self::new(|req| RawResult {
            status: 200,
            body: req.url.clone().into_bytes(),
            ..RawResult::default()
        })
    }

    /// Complete at most `n` operations per `advance`.
    pub fn with_batch(mut self, n: usize) -> Self {
        self.batch = Some(n.max(1));
        self
    }

    pub fn with_order(mut self, order: CompletionOrder) -> Self {
        self.order = order;
        self
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats.clone()
    }
}

impl Transport for MemoryTransport {
    fn register(&mut self, request: &PreparedRequest) -> Result<OperationHandle, TransportError> {
        let handle = OperationHandle(self.next_id);
        self.next_id += 1;
        self.pending.push_back((handle, request.clone()));
        self.live.insert(handle.0);

        let s = &self.stats.0;
        s.registered.set(s.registered.get() + 1);
        s.active.set(s.active.get() + 1);
        s.peak_active.set(s.peak_active.get().max(s.active.get()));
        s.urls.borrow_mut().push(request.url.clone());
        Ok(handle)
    }

    fn deregister(&mut self, handle: OperationHandle) -> Result<(), TransportError> {
        if !self.live.remove(&handle.0) {
            return Err(TransportError::UnknownHandle(handle.0));
        }
        self.pending.retain(|(h, _)| *h != handle);
        let s = &self.stats.0;
        s.active.set(s.active.get().saturating_sub(1));
        Ok(())
    }

    fn advance(&mut self) -> Result<usize, TransportError> {
        let n = self.batch.unwrap_or(self.pending.len()).min(self.pending.len());
        for _ in 0..n {
            let next = match self.order {
                CompletionOrder::Fifo => self.pending.pop_front(),
                CompletionOrder::Lifo => self.pending.pop_back(),
            };
            if let Some((handle, request)) = next {
                let raw = (self.responder)(&request);
                self.completed.push(Completion { handle, raw });
            }
        }
        Ok(self.pending.len())
    }

    fn poll(&mut self, _timeout: Duration) -> Result<usize, TransportError> {
        Ok(self.completed.len())
    }

    fn drain_completions(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.completed)
    }
}
