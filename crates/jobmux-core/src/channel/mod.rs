//! Channel: a job queue bound to one request template.
//!
//! A channel keeps its own queued/running/finished sets and its own
//! concurrency cap. Admission goes through the [`ChannelManager`] it is
//! registered with; results come back either through a registered handler or
//! through blocking [`Channel::fetch`].
//!
//! `Channel` is a cheap handle: clones share the same queues. No internal
//! borrow is held while a handler runs or while the manager is driven, so
//! handlers may call back into the channel (including blocking `fetch`).

pub(crate) mod handlers;
mod pause;
pub(crate) mod state;


use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::config::MuxConfig;
use crate::control::deadline_after;
use crate::error::{Error, Result};
use crate::job::{JobBatch, JobContext, JobId, JobState, Payload};
use crate::manager::{ChannelId, ChannelManager};
use crate::request::RequestTemplate;
use crate::response::{Response, ResponseBuilder};

pub use handlers::ResponseHandler;

use pause::Pause;
use state::{sanitize_priority, ChannelState};

pub const DEFAULT_PRIORITY: f64 = 1.0;
pub const DEFAULT_THREAD_LIMIT: usize = 10;

#[derive(Clone)]
pub struct Channel {
    pub(crate) inner: Rc<RefCell<ChannelState>>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(st) => f
                .debug_struct("Channel")
                .field("url", &st.template.url())
                .field("priority", &st.priority)
                .field("thread_limit", &st.thread_limit)
                .field("queued", &st.queued_len())
                .field("running", &st.running_len())
                .field("finished", &st.finished_len())
                .finish(),
            Err(_) => f.write_str("Channel { <busy> }"),
        }
    }
}

impl Channel {
    pub fn new(template: RequestTemplate) -> Self {
        Self::with_limits(template, DEFAULT_PRIORITY, DEFAULT_THREAD_LIMIT)
    }

    pub fn with_limits(template: RequestTemplate, priority: f64, thread_limit: usize) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ChannelState::new(
                template,
                priority,
                thread_limit,
            ))),
        }
    }

    /// Channel using the priority and thread limit from the config file.
    pub fn from_config(template: RequestTemplate, cfg: &MuxConfig) -> Self {
        Self::with_limits(template, cfg.priority, cfg.thread_limit)
    }

    /// In force-start mode each added job is started on its own right away
    /// (within both caps) instead of through a full admission pass.
    pub fn force_start(self, on: bool) -> Self {
        self.inner.borrow_mut().force_start = on;
        self
    }

    /// Registration handle, if the channel belongs to a manager.
    pub fn id(&self) -> Option<ChannelId> {
        self.inner.borrow().registration.as_ref().map(|r| r.id)
    }

    /// The manager this channel is registered with, while it is alive.
    pub fn manager(&self) -> Option<ChannelManager> {
        self.registered().map(|(_, mgr)| mgr)
    }

    pub fn url(&self) -> String {
        self.inner.borrow().template.url().to_string()
    }

    fn registered(&self) -> Option<(ChannelId, ChannelManager)> {
        let reg = self.inner.borrow().registration.clone()?;
        let inner = reg.manager.upgrade()?;
        Some((reg.id, ChannelManager { inner }))
    }

    fn require_manager(&self) -> Result<(ChannelId, ChannelManager)> {
        self.registered().ok_or(Error::Unregistered)
    }

    // ---- adding jobs ----

    /// Queue one job. Returns its id (`name`, or the next automatic id).
    ///
    /// On error the job is not left behind in the queue.
    pub fn add_job(
        &self,
        payload: impl Into<Payload>,
        context: Option<JobContext>,
        name: Option<JobId>,
    ) -> Result<JobId> {
        let id = self.enqueue(payload.into(), context, name)?;
        tracing::trace!(job = %id, "job queued");
        if let Err(e) = self.admit(std::slice::from_ref(&id)) {
            self.cancel_queued(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Queue without running admission.
    pub(crate) fn enqueue(
        &self,
        payload: Payload,
        context: Option<JobContext>,
        name: Option<JobId>,
    ) -> Result<JobId> {
        let mut st = self.inner.borrow_mut();
        let id = st.resolve_name(name)?;
        st.enqueue(id.clone(), payload, context);
        Ok(id)
    }

    /// Remove a job that has not started yet. False if it is not queued.
    pub(crate) fn cancel_queued(&self, id: &JobId) -> bool {
        self.inner.borrow_mut().cancel_queued(id)
    }

    /// Admission for freshly queued jobs: each on its own in force-start
    /// mode, otherwise one global pass. No-op while unregistered.
    pub(crate) fn admit(&self, ids: &[JobId]) -> Result<()> {
        let Some((cid, mgr)) = self.registered() else {
            return Ok(());
        };
        let force = self.inner.borrow().force_start;
        if force {
            for id in ids {
                mgr.start_on(cid, Some(id))?;
            }
        } else {
            mgr.start_jobs()?;
        }
        Ok(())
    }

    /// Queue one job from loosely typed values.
    ///
    /// The payload must be a scalar or a flat object; the name, if given, a
    /// string or a non-negative integer.
    pub fn add_job_value(
        &self,
        payload: Value,
        context: Option<JobContext>,
        name: Option<Value>,
    ) -> Result<JobId> {
        let payload = Payload::try_from(payload)?;
        let name = name.map(JobId::try_from).transpose()?;
        self.add_job(payload, context, name)
    }

    /// Queue a batch of jobs sharing one context.
    ///
    /// All names are checked before anything is queued, so a bad batch leaves
    /// the channel unchanged.
    pub fn add_jobs(&self, batch: JobBatch, context: Option<JobContext>) -> Result<Vec<JobId>> {
        let entries = batch.into_entries();
        let ids = {
            let mut st = self.inner.borrow_mut();
            {
                let mut seen = std::collections::HashSet::new();
                for name in entries.iter().filter_map(|(n, _)| n.as_ref()) {
                    st.check_name(name)?;
                    if !seen.insert(name) {
                        return Err(Error::DuplicateJob(name.clone()));
                    }
                }
            }
            let mut ids = Vec::with_capacity(entries.len());
            for (name, payload) in entries {
                let id = st.resolve_name(name)?;
                st.enqueue(id.clone(), payload, context.clone());
                ids.push(id);
            }
            ids
        };
        tracing::debug!(count = ids.len(), "job batch queued");
        if let Err(e) = self.admit(&ids) {
            for id in &ids {
                self.cancel_queued(id);
            }
            return Err(e);
        }
        Ok(ids)
    }

    /// Queue one job and start it right away if both caps allow; otherwise it
    /// waits in the queue like any other job.
    pub fn run_job(
        &self,
        payload: impl Into<Payload>,
        context: Option<JobContext>,
        name: Option<JobId>,
    ) -> Result<JobId> {
        let (cid, mgr) = self.require_manager()?;
        let id = self.enqueue(payload.into(), context, name)?;
        if let Err(e) = mgr.start_on(cid, Some(&id)) {
            self.cancel_queued(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Run one job and block until its response arrives.
    ///
    /// `None` when a registered handler consumed the response.
    pub fn fetch_job(
        &self,
        payload: impl Into<Payload>,
        context: Option<JobContext>,
    ) -> Result<Option<Response>> {
        let id = self.run_job(payload, context, None)?;
        self.fetch(Some(&id))
    }

    // ---- retrieval ----

    /// Blocking fetch with the manager's default deadline.
    ///
    /// With a name: the response of that job, starting it first if it is
    /// still queued. Fails with [`Error::JobNotFound`] when the job is in
    /// none of the queued/running/finished sets. Returns `None` if a handler
    /// consumed the response while waiting.
    ///
    /// Without a name: the oldest finished response, waiting for one if
    /// needed. Returns `None` when the channel holds no work at all.
    pub fn fetch(&self, name: Option<&JobId>) -> Result<Option<Response>> {
        let deadline = self.default_deadline();
        self.fetch_until(name, deadline)
    }

    /// [`Channel::fetch`] with an explicit timeout.
    pub fn fetch_within(&self, name: Option<&JobId>, timeout: Duration) -> Result<Option<Response>> {
        self.fetch_until(name, deadline_after(timeout))
    }

    pub(crate) fn fetch_until(
        &self,
        name: Option<&JobId>,
        deadline: Option<Instant>,
    ) -> Result<Option<Response>> {
        match name {
            Some(id) => self.fetch_named(id, deadline),
            None => self.fetch_oldest(deadline),
        }
    }

    fn fetch_named(&self, id: &JobId, deadline: Option<Instant>) -> Result<Option<Response>> {
        let state = self.inner.borrow().state_of(id);
        match state {
            None => return Err(Error::JobNotFound(id.clone())),
            Some(JobState::Finished) => return Ok(self.inner.borrow_mut().take_finished(Some(id))),
            Some(JobState::Queued | JobState::Running) => {}
        }
        let (cid, mgr) = self.require_manager()?;
        loop {
            let state = self.inner.borrow().state_of(id);
            match state {
                Some(JobState::Finished) => {
                    return Ok(self.inner.borrow_mut().take_finished(Some(id)));
                }
                // Consumed by a handler.
                None => return Ok(None),
                Some(JobState::Queued) => {
                    if mgr.start_on(cid, Some(id))?.is_some() {
                        continue;
                    }
                }
                Some(JobState::Running) => {}
            }
            check_deadline(deadline)?;
            if !self.wait_step(&mgr, deadline)? {
                return Err(Error::Stalled(id.clone()));
            }
        }
    }

    fn fetch_oldest(&self, deadline: Option<Instant>) -> Result<Option<Response>> {
        loop {
            let (found, queued, running) = {
                let mut st = self.inner.borrow_mut();
                (st.take_finished(None), st.queued_len(), st.running_len())
            };
            if found.is_some() {
                return Ok(found);
            }
            if queued == 0 && running == 0 {
                return Ok(None);
            }
            let (cid, mgr) = self.require_manager()?;
            if running == 0 && mgr.start_on(cid, None)?.is_some() {
                continue;
            }
            check_deadline(deadline)?;
            if !self.wait_step(&mgr, deadline)? {
                let first = self.inner.borrow().first_queued();
                return match first {
                    Some(id) => Err(Error::Stalled(id)),
                    None => Ok(None),
                };
            }
        }
    }

    /// One blocking step of the fetch/finish loops. False when nothing is in
    /// flight and nothing can be admitted.
    fn wait_step(&self, mgr: &ChannelManager, deadline: Option<Instant>) -> Result<bool> {
        if !mgr.has_outstanding_work() && mgr.start_jobs()? > 0 {
            return Ok(true);
        }
        if mgr.has_outstanding_work() {
            mgr.read_until(deadline)?;
            return Ok(true);
        }
        match self.pause_until() {
            Some(until) => {
                let wake = deadline.map_or(until, |d| d.min(until));
                std::thread::sleep(wake.saturating_duration_since(Instant::now()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Make one step of progress on this channel's manager.
    pub(crate) fn drive_until(&self, deadline: Option<Instant>) -> Result<bool> {
        let (_, mgr) = self.require_manager()?;
        self.wait_step(&mgr, deadline)
    }

    /// End of a timed pause that is the only thing holding this channel back.
    fn pause_until(&self) -> Option<Instant> {
        let mut st = self.inner.borrow_mut();
        if st.stopped || !st.is_paused() {
            return None;
        }
        st.pause.until()
    }

    pub(crate) fn default_deadline(&self) -> Option<Instant> {
        self.manager().and_then(|mgr| mgr.default_deadline())
    }

    /// Without a name: nothing queued or running (unretrieved results may
    /// remain). With a name: that job has a stored response.
    pub fn is_finished(&self, name: Option<&JobId>) -> bool {
        let st = self.inner.borrow();
        match name {
            Some(id) => st.state_of(id) == Some(JobState::Finished),
            None => st.is_idle(),
        }
    }

    /// Block until nothing is queued or running (default deadline).
    pub fn finish(&self) -> Result<()> {
        let deadline = self.default_deadline();
        self.finish_until(deadline)
    }

    pub fn finish_within(&self, timeout: Duration) -> Result<()> {
        self.finish_until(deadline_after(timeout))
    }

    pub(crate) fn finish_until(&self, deadline: Option<Instant>) -> Result<()> {
        loop {
            if self.inner.borrow().is_idle() {
                return Ok(());
            }
            let (_, mgr) = self.require_manager()?;
            check_deadline(deadline)?;
            if !self.wait_step(&mgr, deadline)? {
                let first = self.inner.borrow().first_queued();
                return match first {
                    Some(id) => Err(Error::Stalled(id)),
                    None => Ok(()),
                };
            }
        }
    }

    /// One manager cycle, driven from this channel.
    pub fn read(&self) -> Result<usize> {
        let (_, mgr) = self.require_manager()?;
        mgr.read()
    }

    // ---- admission ----

    pub fn can_start_job(&self) -> bool {
        self.inner.borrow_mut().can_start_job()
    }

    /// Start `id` (or the oldest queued job) now, within both caps.
    /// `None` when nothing could be started. A job whose request cannot be
    /// built counts as started: it finishes at once with a failed response.
    pub fn start_job(&self, id: Option<&JobId>) -> Result<Option<JobId>> {
        let (cid, mgr) = self.require_manager()?;
        mgr.start_on(cid, id)
    }

    /// Stop admitting jobs. Running jobs complete normally.
    pub fn stop(&self) {
        self.inner.borrow_mut().stopped = true;
    }

    /// Clear both the stopped flag and any pause, then run an admission pass.
    pub fn resume(&self) -> Result<()> {
        {
            let mut st = self.inner.borrow_mut();
            st.stopped = false;
            st.pause = Pause::Off;
        }
        self.kick()
    }

    /// Pause admission for `duration`; zero pauses until [`Channel::resume`].
    pub fn pause(&self, duration: Duration) {
        self.inner.borrow_mut().pause = Pause::for_duration(duration, Instant::now());
    }

    pub fn is_paused(&self) -> bool {
        self.inner.borrow_mut().is_paused()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.borrow().stopped
    }

    /// Negative and NaN priorities are clamped to zero.
    pub fn set_priority(&self, priority: f64) -> Result<()> {
        self.inner.borrow_mut().priority = sanitize_priority(priority);
        if let Some((_, mgr)) = self.registered() {
            mgr.refresh_priorities();
            mgr.start_jobs()?;
        }
        Ok(())
    }

    pub fn priority(&self) -> f64 {
        self.inner.borrow().priority
    }

    /// Change the per-channel cap. Lowering it never aborts running jobs.
    pub fn set_thread_limit(&self, limit: usize) -> Result<()> {
        self.inner.borrow_mut().thread_limit = limit;
        self.kick()
    }

    pub fn thread_limit(&self) -> usize {
        self.inner.borrow().thread_limit
    }

    pub(crate) fn kick(&self) -> Result<()> {
        if let Some((_, mgr)) = self.registered() {
            mgr.start_jobs()?;
        }
        Ok(())
    }

    // ---- handlers ----

    pub fn set_response_handler<F>(&self, handler: F)
    where
        F: Fn(Response, &Channel, &JobId) + 'static,
    {
        self.inner.borrow_mut().handlers.response = Some(Rc::new(handler));
    }

    pub fn set_redirect_handler<F>(&self, handler: F)
    where
        F: Fn(Response, &Channel, &JobId) + 'static,
    {
        self.inner.borrow_mut().handlers.redirect = Some(Rc::new(handler));
    }

    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(Response, &Channel, &JobId) + 'static,
    {
        self.inner.borrow_mut().handlers.error = Some(Rc::new(handler));
    }

    pub fn clear_handlers(&self) {
        self.inner.borrow_mut().handlers = Default::default();
    }

    pub fn has_handlers(&self) -> bool {
        !self.inner.borrow().handlers.is_empty()
    }

    pub fn set_response_builder<B: ResponseBuilder + 'static>(&self, builder: B) {
        self.inner.borrow_mut().builder = Rc::new(builder);
    }

    // ---- introspection ----

    pub fn queued_len(&self) -> usize {
        self.inner.borrow().queued_len()
    }

    pub fn running_len(&self) -> usize {
        self.inner.borrow().running_len()
    }

    pub fn finished_len(&self) -> usize {
        self.inner.borrow().finished_len()
    }

    /// Where a job currently is; `None` once retrieved or never added.
    pub fn job_state(&self, id: &JobId) -> Option<JobState> {
        self.inner.borrow().state_of(id)
    }

    /// Queued or running work remains.
    pub fn has_outstanding_work(&self) -> bool {
        !self.inner.borrow().is_idle()
    }
}

fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    match deadline {
        Some(d) if Instant::now() >= d => Err(Error::Timeout),
        _ => Ok(()),
    }
}
