//! Manager internals: admission control, wait loop and completion harvesting.
//!
//! Runs with the manager borrowed. Channel states are borrowed one at a time
//! inside these methods; handlers are never called from here but returned as
//! [`Dispatch`] values so the caller can run them with nothing borrowed.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use crate::channel::handlers::Dispatch;
use crate::channel::state::StartOutcome;
use crate::channel::Channel;
use crate::control::CancelToken;
use crate::error::{Error, Result};
use crate::job::JobId;
use crate::request::PreparedRequest;
use crate::transport::{OperationHandle, Transport};

use super::select::admission_score;
use super::{ChannelId, ManagerConfig};

/// Where an in-flight operation came from.
pub(crate) struct Inflight {
    pub(crate) channel: ChannelId,
    pub(crate) job: JobId,
    pub(crate) request: PreparedRequest,
}

pub(crate) struct ManagerState {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) global_cap: usize,
    pub(crate) channels: BTreeMap<ChannelId, Channel>,
    pub(crate) sum_priorities: f64,
    pub(crate) inflight: HashMap<OperationHandle, Inflight>,
    pub(crate) next_channel_id: u64,
    pub(crate) wait_timeout: Option<Duration>,
    pub(crate) poll_interval: Duration,
    pub(crate) cancel: CancelToken,
    /// Handler calls for jobs rejected during admission, run once the
    /// manager is no longer borrowed.
    pub(crate) deferred: Vec<(Channel, Dispatch)>,
}

impl ManagerState {
    pub(crate) fn new(transport: Box<dyn Transport>, config: &ManagerConfig) -> Self {
        Self {
            transport,
            global_cap: config.total_thread_limit,
            channels: BTreeMap::new(),
            sum_priorities: 0.0,
            inflight: HashMap::new(),
            next_channel_id: 0,
            wait_timeout: config.wait_timeout,
            poll_interval: config.poll_interval,
            cancel: CancelToken::new(),
            deferred: Vec::new(),
        }
    }

    pub(crate) fn recompute_priorities(&mut self) {
        self.sum_priorities = self
            .channels
            .values()
            .map(|ch| ch.inner.borrow().priority)
            .sum();
    }

    /// Record a newly registered operation.
    pub(crate) fn job_started(
        &mut self,
        handle: OperationHandle,
        channel: ChannelId,
        job: JobId,
        request: PreparedRequest,
    ) {
        self.inflight.insert(
            handle,
            Inflight {
                channel,
                job,
                request,
            },
        );
    }

    pub(crate) fn has_global_capacity(&self) -> bool {
        self.inflight.len() < self.global_cap
    }

    /// The eligible channel with the best admission score; first wins ties.
    pub(crate) fn select_channel(&mut self) -> Option<ChannelId> {
        if !self.has_global_capacity() {
            return None;
        }
        let mut best: Option<(ChannelId, f64)> = None;
        for (id, channel) in &self.channels {
            let mut st = channel.inner.borrow_mut();
            if !st.can_start_job() {
                continue;
            }
            let score = admission_score(
                st.priority,
                self.sum_priorities,
                st.running_len(),
                self.global_cap,
            );
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((*id, score)),
            }
        }
        best.map(|(id, _)| id)
    }

    /// Admit jobs until no channel is selectable, then advance the transport once.
    ///
    /// Returns how many jobs left their queues: started, or finished at once
    /// because their request could not be built. Only transport errors end
    /// the pass early.
    pub(crate) fn start_jobs(&mut self) -> Result<usize> {
        let mut started = 0usize;
        let mut rejected = 0usize;
        while let Some(id) = self.select_channel() {
            let Some(channel) = self.channels.get(&id).cloned() else {
                break;
            };
            let outcome = channel.inner.borrow_mut().start_job(None, id, self)?;
            match outcome {
                StartOutcome::Idle => break,
                StartOutcome::Started(_) => started += 1,
                StartOutcome::Rejected(_, dispatch) => {
                    rejected += 1;
                    if let Some(d) = dispatch {
                        self.deferred.push((channel, d));
                    }
                }
            }
        }
        if !self.inflight.is_empty() {
            self.transport.advance()?;
        }
        if started + rejected > 0 {
            tracing::debug!(started, rejected, inflight = self.inflight.len(), "admission pass");
        }
        Ok(started + rejected)
    }

    /// Start one job of one channel right away, within both caps.
    /// `Some` when the job left the queue (started or rejected).
    pub(crate) fn start_on(
        &mut self,
        id: ChannelId,
        job: Option<&JobId>,
    ) -> Result<Option<JobId>> {
        let channel = self.channels.get(&id).cloned().ok_or(Error::Unregistered)?;
        if !self.has_global_capacity() {
            return Ok(None);
        }
        let outcome = channel.inner.borrow_mut().start_job(job, id, self)?;
        match outcome {
            StartOutcome::Idle => Ok(None),
            StartOutcome::Started(job) => {
                self.transport.advance()?;
                Ok(Some(job))
            }
            StartOutcome::Rejected(job, dispatch) => {
                if let Some(d) = dispatch {
                    self.deferred.push((channel, d));
                }
                Ok(Some(job))
            }
        }
    }

    /// Block on the transport until a completion is ready, the transport is
    /// idle, or nothing is in flight.
    pub(crate) fn wait_for_result(&mut self, deadline: Option<Instant>) -> Result<()> {
        loop {
            if self.inflight.is_empty() {
                return Ok(());
            }
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let active = self.transport.advance()?;
            let step = match deadline {
                Some(d) => d
                    .saturating_duration_since(Instant::now())
                    .min(self.poll_interval),
                None => self.poll_interval,
            };
            let ready = self.transport.poll(step)?;
            if ready > 0 || active == 0 {
                return Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(Error::Timeout);
            }
        }
    }

    /// Drain completions and route each to its channel.
    /// Returns the number harvested and the handler calls still to make.
    pub(crate) fn harvest(&mut self) -> Result<(usize, Vec<(Channel, Dispatch)>)> {
        let completions = self.transport.drain_completions();
        let count = completions.len();
        let mut dispatches = Vec::new();
        for completion in completions {
            let Some(inflight) = self.inflight.remove(&completion.handle) else {
                tracing::warn!(op = %completion.handle, "completion for unknown operation");
                continue;
            };
            self.transport.deregister(completion.handle)?;
            let Some(channel) = self.channels.get(&inflight.channel).cloned() else {
                tracing::warn!(channel = %inflight.channel, job = %inflight.job, "completion for removed channel");
                continue;
            };
            let dispatch = channel.inner.borrow_mut().job_finished(
                inflight.job,
                completion.raw,
                &inflight.request,
            );
            if let Some(d) = dispatch {
                dispatches.push((channel, d));
            }
        }
        Ok((count, dispatches))
    }
}
