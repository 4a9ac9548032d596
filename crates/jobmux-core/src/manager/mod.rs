//! Channel manager: global admission control over one shared transport.
//!
//! The manager owns the transport and the global concurrency cap. Registered
//! channels queue jobs; on every scheduling pass the manager picks, across all
//! channels, the one with the best weighted-fair score
//! (`priority / sum_priorities - running / global_cap`) and asks it to start
//! its next job, until the global cap is reached or no channel is eligible.
//!
//! Scheduling is single-threaded and cooperative: nothing runs unless a caller
//! drives [`ChannelManager::read`] (directly, or through a blocking
//! `fetch`/`finish`).

mod select;
pub(crate) mod state;


use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::channel::state::Registration;
use crate::channel::Channel;
use crate::config::MuxConfig;
use crate::control::{deadline_after, CancelToken};
use crate::error::{Error, Result};
use crate::job::JobId;
use crate::transport::{CurlTransport, Transport};

use state::ManagerState;

/// Handle minted when a channel is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub(crate) u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

/// Manager settings.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Global cap on in-flight operations.
    pub total_thread_limit: usize,
    /// Default deadline for blocking calls; `None` waits without bound.
    pub wait_timeout: Option<Duration>,
    /// Longest single transport poll inside the wait loop.
    pub poll_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        MuxConfig::default().into()
    }
}

impl From<&MuxConfig> for ManagerConfig {
    fn from(cfg: &MuxConfig) -> Self {
        Self {
            total_thread_limit: cfg.total_thread_limit,
            wait_timeout: cfg.wait_timeout(),
            poll_interval: cfg.poll_interval(),
        }
    }
}

impl From<MuxConfig> for ManagerConfig {
    fn from(cfg: MuxConfig) -> Self {
        (&cfg).into()
    }
}

/// Shared handle to a manager. Clones refer to the same manager.
#[derive(Clone)]
pub struct ChannelManager {
    pub(crate) inner: Rc<RefCell<ManagerState>>,
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(st) => f
                .debug_struct("ChannelManager")
                .field("channels", &st.channels.len())
                .field("inflight", &st.inflight.len())
                .field("global_cap", &st.global_cap)
                .finish(),
            Err(_) => f.write_str("ChannelManager { <busy> }"),
        }
    }
}

impl ChannelManager {
    pub fn new<T: Transport + 'static>(transport: T, config: ManagerConfig) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ManagerState::new(Box::new(transport), &config))),
        }
    }

    /// Manager over a curl multi transport configured from `cfg`.
    pub fn with_curl(cfg: &MuxConfig) -> Self {
        Self::new(CurlTransport::new(cfg.curl_options()), cfg.into())
    }

    /// Register a channel and run an admission pass.
    pub fn add_channel(&self, channel: &Channel) -> Result<ChannelId> {
        let id = {
            let mut st = self.inner.borrow_mut();
            let id = ChannelId(st.next_channel_id);
            {
                let mut cs = channel.inner.borrow_mut();
                if cs.registration.is_some() {
                    return Err(Error::AlreadyRegistered);
                }
                cs.registration = Some(Registration {
                    id,
                    manager: Rc::downgrade(&self.inner),
                });
            }
            st.next_channel_id += 1;
            st.channels.insert(id, channel.clone());
            st.recompute_priorities();
            tracing::info!(channel = %id, url = channel.inner.borrow().template.url(), "channel registered");
            id
        };
        self.start_jobs()?;
        Ok(id)
    }

    /// Unregister an idle channel. Queued jobs stay in the channel.
    pub fn remove_channel(&self, id: ChannelId) -> Result<Channel> {
        let mut st = self.inner.borrow_mut();
        let channel = st.channels.get(&id).cloned().ok_or(Error::Unregistered)?;
        if channel.inner.borrow().running_len() > 0 {
            return Err(Error::ChannelBusy(id.0));
        }
        st.channels.remove(&id);
        channel.inner.borrow_mut().registration = None;
        st.recompute_priorities();
        tracing::info!(channel = %id, "channel removed");
        Ok(channel)
    }

    /// Change the global cap. Lowering it never aborts running operations.
    pub fn set_total_thread_limit(&self, limit: usize) -> Result<()> {
        self.inner.borrow_mut().global_cap = limit;
        self.start_jobs()?;
        Ok(())
    }

    pub fn total_thread_limit(&self) -> usize {
        self.inner.borrow().global_cap
    }

    pub fn channel_count(&self) -> usize {
        self.inner.borrow().channels.len()
    }

    pub fn channel(&self, id: ChannelId) -> Option<Channel> {
        self.inner.borrow().channels.get(&id).cloned()
    }

    pub fn inflight_len(&self) -> usize {
        self.inner.borrow().inflight.len()
    }

    pub fn sum_priorities(&self) -> f64 {
        self.inner.borrow().sum_priorities
    }

    /// Any operation in flight.
    pub fn has_outstanding_work(&self) -> bool {
        !self.inner.borrow().inflight.is_empty()
    }

    /// Clone of the manager's cancel token; cancelling it aborts blocking waits.
    pub fn cancel_token(&self) -> CancelToken {
        self.inner.borrow().cancel.clone()
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.borrow().poll_interval
    }

    /// Deadline for a blocking call starting now, from the configured wait timeout.
    pub fn default_deadline(&self) -> Option<Instant> {
        self.inner.borrow().wait_timeout.and_then(deadline_after)
    }

    pub(crate) fn refresh_priorities(&self) {
        self.inner.borrow_mut().recompute_priorities();
    }

    /// The channel the next admission would go to, if any.
    pub fn select_channel(&self) -> Option<ChannelId> {
        self.inner.borrow_mut().select_channel()
    }

    /// Admission pass: start jobs until caps or queues are exhausted.
    /// Returns the number of jobs started.
    pub fn start_jobs(&self) -> Result<usize> {
        let result = self.inner.borrow_mut().start_jobs();
        self.run_deferred();
        result
    }

    pub(crate) fn start_on(
        &self,
        id: ChannelId,
        job: Option<&JobId>,
    ) -> Result<Option<JobId>> {
        let result = self.inner.borrow_mut().start_on(id, job);
        self.run_deferred();
        result
    }

    /// Run handler calls queued up while the manager was borrowed.
    fn run_deferred(&self) {
        loop {
            let deferred = std::mem::take(&mut self.inner.borrow_mut().deferred);
            if deferred.is_empty() {
                return;
            }
            for (channel, dispatch) in deferred {
                dispatch.invoke(&channel);
            }
        }
    }

    /// Block until at least one operation completes (default deadline).
    pub fn wait_for_result(&self) -> Result<()> {
        let deadline = self.default_deadline();
        self.inner.borrow_mut().wait_for_result(deadline)
    }

    /// Route every ready completion to its channel, run handlers, then backfill
    /// freed slots. Returns the number of completions processed.
    pub fn read_results(&self) -> Result<usize> {
        let (count, dispatches) = self.inner.borrow_mut().harvest()?;
        for (channel, dispatch) in dispatches {
            dispatch.invoke(&channel);
        }
        self.start_jobs()?;
        Ok(count)
    }

    /// One scheduling cycle with the default deadline.
    pub fn read(&self) -> Result<usize> {
        let deadline = self.default_deadline();
        self.read_until(deadline)
    }

    /// One scheduling cycle: wait for a completion, then harvest.
    /// Returns immediately when nothing is in flight.
    pub fn read_until(&self, deadline: Option<Instant>) -> Result<usize> {
        self.inner.borrow_mut().wait_for_result(deadline)?;
        self.read_results()
    }

    /// Cycle until no operation is in flight.
    pub fn run_until_idle(&self) -> Result<()> {
        let deadline = self.default_deadline();
        loop {
            self.start_jobs()?;
            if !self.has_outstanding_work() {
                return Ok(());
            }
            self.read_until(deadline)?;
            if deadline.is_some_and(|d| Instant::now() >= d) && self.has_outstanding_work() {
                return Err(Error::Timeout);
            }
        }
    }
}
