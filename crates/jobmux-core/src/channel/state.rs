//! Per-channel queues and job lifecycle.
//!
//! A job id lives in exactly one of `queued`, `running`, `finished` at a time,
//! or in none once retrieved. Queued and finished jobs carry a sequence
//! number; `order` and `finished_order` map sequence numbers back to ids, so
//! the oldest job is the first entry and a job put back after a failed start
//! keeps its place.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};
use std::time::Instant;

use crate::error::{Error, Result};
use crate::job::{JobContext, JobId, JobState, Payload};
use crate::manager::state::ManagerState;
use crate::manager::ChannelId;
use crate::request::{PreparedRequest, RequestTemplate};
use crate::response::{HttpResponseBuilder, Response, ResponseBuilder};
use crate::transport::{FailureKind, RawResult, TransportFailure};

use super::handlers::{Dispatch, Handlers};
use super::pause::Pause;

pub(crate) struct PendingJob {
    seq: u64,
    pub(crate) payload: Payload,
    pub(crate) context: Option<JobContext>,
}

/// What one start attempt did.
pub(crate) enum StartOutcome {
    /// Nothing could be started.
    Idle,
    Started(JobId),
    /// The request could not be built. The job finished at once with a
    /// failed response; the handler call, if any, is still to be made.
    Rejected(JobId, Option<Dispatch>),
}

/// Link back to the manager a channel is registered with.
#[derive(Clone)]
pub(crate) struct Registration {
    pub(crate) id: ChannelId,
    pub(crate) manager: Weak<RefCell<ManagerState>>,
}

pub(crate) struct ChannelState {
    pub(crate) template: RequestTemplate,
    pub(crate) priority: f64,
    pub(crate) thread_limit: usize,
    next_auto_id: u64,
    next_seq: u64,
    pub(crate) stopped: bool,
    pub(crate) pause: Pause,
    /// Start each added job right away instead of asking for global admission.
    pub(crate) force_start: bool,
    order: BTreeMap<u64, JobId>,
    queued: HashMap<JobId, PendingJob>,
    running: HashMap<JobId, PendingJob>,
    finished_order: BTreeMap<u64, JobId>,
    finished: HashMap<JobId, (u64, Response)>,
    pub(crate) handlers: Handlers,
    pub(crate) builder: Rc<dyn ResponseBuilder>,
    pub(crate) registration: Option<Registration>,
}

impl ChannelState {
    pub(crate) fn new(template: RequestTemplate, priority: f64, thread_limit: usize) -> Self {
        Self {
            template,
            priority: sanitize_priority(priority),
            thread_limit,
            next_auto_id: 0,
            next_seq: 0,
            stopped: false,
            pause: Pause::Off,
            force_start: false,
            order: BTreeMap::new(),
            queued: HashMap::new(),
            running: HashMap::new(),
            finished_order: BTreeMap::new(),
            finished: HashMap::new(),
            handlers: Handlers::default(),
            builder: Rc::new(HttpResponseBuilder),
            registration: None,
        }
    }

    pub(crate) fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub(crate) fn running_len(&self) -> usize {
        self.running.len()
    }

    pub(crate) fn finished_len(&self) -> usize {
        self.finished.len()
    }

    pub(crate) fn state_of(&self, id: &JobId) -> Option<JobState> {
        if self.queued.contains_key(id) {
            Some(JobState::Queued)
        } else if self.running.contains_key(id) {
            Some(JobState::Running)
        } else if self.finished.contains_key(id) {
            Some(JobState::Finished)
        } else {
            None
        }
    }

    pub(crate) fn first_queued(&self) -> Option<JobId> {
        self.order.values().next().cloned()
    }

    #[cfg(test)]
    pub(crate) fn queued_ids(&self) -> Vec<JobId> {
        self.order.values().cloned().collect()
    }

    /// An explicit name must be non-empty and not held by any current job.
    pub(crate) fn check_name(&self, id: &JobId) -> Result<()> {
        if let JobId::Named(s) = id {
            if s.is_empty() {
                return Err(Error::InvalidJobName("empty job name".into()));
            }
        }
        if self.state_of(id).is_some() {
            return Err(Error::DuplicateJob(id.clone()));
        }
        Ok(())
    }

    /// Check an explicit name, or mint the next automatic one.
    pub(crate) fn resolve_name(&mut self, name: Option<JobId>) -> Result<JobId> {
        match name {
            Some(id) => {
                self.check_name(&id)?;
                Ok(id)
            }
            None => {
                let mut id = JobId::Auto(self.next_auto_id);
                self.next_auto_id += 1;
                // Explicit Auto ids may already occupy the next slot.
                while self.state_of(&id).is_some() {
                    id = JobId::Auto(self.next_auto_id);
                    self.next_auto_id += 1;
                }
                Ok(id)
            }
        }
    }

    /// Queue a job under an already resolved name.
    pub(crate) fn enqueue(&mut self, id: JobId, payload: Payload, context: Option<JobContext>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, id.clone());
        self.queued.insert(
            id,
            PendingJob {
                seq,
                payload,
                context,
            },
        );
    }

    fn take_queued(&mut self, id: &JobId) -> Option<PendingJob> {
        let job = self.queued.remove(id)?;
        self.order.remove(&job.seq);
        Some(job)
    }

    /// Put a job back under its original sequence number.
    fn requeue(&mut self, id: JobId, job: PendingJob) {
        self.order.insert(job.seq, id.clone());
        self.queued.insert(id, job);
    }

    /// Drop a job that has not started yet. False if it is not queued.
    pub(crate) fn cancel_queued(&mut self, id: &JobId) -> bool {
        self.take_queued(id).is_some()
    }

    pub(crate) fn is_paused(&mut self) -> bool {
        self.pause.check(Instant::now())
    }

    pub(crate) fn can_start_job(&mut self) -> bool {
        !self.queued.is_empty()
            && !self.stopped
            && !self.is_paused()
            && self.running.len() < self.thread_limit
    }

    /// Start `id`, or the oldest queued job.
    ///
    /// A job whose request cannot be built is finished with a failed response
    /// instead of being started; only transport errors are returned as `Err`,
    /// and then the job stays queued in its place.
    pub(crate) fn start_job(
        &mut self,
        id: Option<&JobId>,
        channel: ChannelId,
        mgr: &mut ManagerState,
    ) -> Result<StartOutcome> {
        if !self.can_start_job() {
            return Ok(StartOutcome::Idle);
        }
        let id = match id {
            Some(id) if self.queued.contains_key(id) => id.clone(),
            Some(_) => return Ok(StartOutcome::Idle),
            None => match self.first_queued() {
                Some(id) => id,
                None => return Ok(StartOutcome::Idle),
            },
        };
        let Some(job) = self.take_queued(&id) else {
            return Ok(StartOutcome::Idle);
        };

        let prepared = match self.prepare(&id, &job) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(channel = %channel, job = %id, error = %e, "request could not be built");
                let response = Response::new(id.clone(), 0)
                    .with_failure(TransportFailure::new(FailureKind::Invalid, e.to_string()))
                    .with_context(job.context);
                let dispatch = self.settle(id.clone(), response);
                return Ok(StartOutcome::Rejected(id, dispatch));
            }
        };
        let handle = match mgr.transport.register(&prepared) {
            Ok(h) => h,
            Err(e) => {
                self.requeue(id, job);
                return Err(e.into());
            }
        };
        self.running.insert(id.clone(), job);
        tracing::debug!(channel = %channel, job = %id, op = %handle, "job started");
        mgr.job_started(handle, channel, id.clone(), prepared);
        Ok(StartOutcome::Started(id))
    }

    fn prepare(&mut self, id: &JobId, job: &PendingJob) -> Result<PreparedRequest> {
        if !self.template.is_initialized() {
            self.template.initialize()?;
            tracing::debug!(url = self.template.url(), "request template initialized");
        }
        self.template.bind(id, &job.payload, job.context.as_ref())
    }

    /// Move a completed job out of `running`. Returns the handler call to make,
    /// or None when the response was stored for `fetch`.
    pub(crate) fn job_finished(
        &mut self,
        id: JobId,
        raw: RawResult,
        request: &PreparedRequest,
    ) -> Option<Dispatch> {
        if self.running.remove(&id).is_none() {
            tracing::warn!(job = %id, "completion for a job that is not running");
        }
        let response = self.builder.build(raw, request, &id);
        tracing::debug!(job = %id, status = response.status(), "job finished");
        self.settle(id, response)
    }

    /// Hand a response to the matching handler, or store it for `fetch`.
    fn settle(&mut self, id: JobId, response: Response) -> Option<Dispatch> {
        match self.handlers.select(&response) {
            Some(handler) => Some(Dispatch {
                handler,
                response,
                job: id,
            }),
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.finished_order.insert(seq, id.clone());
                self.finished.insert(id, (seq, response));
                None
            }
        }
    }

    /// Pop a named finished response, or the oldest one.
    pub(crate) fn take_finished(&mut self, id: Option<&JobId>) -> Option<Response> {
        let id = match id {
            Some(id) => id.clone(),
            None => self.finished_order.values().next()?.clone(),
        };
        let (seq, response) = self.finished.remove(&id)?;
        self.finished_order.remove(&seq);
        Some(response)
    }

    /// No queued or running work; unretrieved results do not count.
    pub(crate) fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.running.is_empty()
    }
}

/// Priorities are non-negative; NaN counts as zero.
pub(crate) fn sanitize_priority(priority: f64) -> f64 {
    if priority.is_nan() {
        0.0
    } else {
        priority.max(0.0)
    }
}
