//! Scatter/gather over a fixed set of named channels.
//!
//! A logical job is split by the dispatch function into one sub-job per
//! target channel. Each channel's catch-all handler is taken over to route
//! sub-job responses back here; the logical job completes once every target
//! channel has answered, and its `{channel name: Response}` map then goes to
//! the multi-channel handlers or into the finished set for `fetch`.

mod dispatch;

#[cfg(test)]
mod tests;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use crate::channel::handlers::select_slot;
use crate::channel::Channel;
use crate::control::deadline_after;
use crate::error::{Error, Result};
use crate::job::{JobBatch, JobContext, JobId, Payload};
use crate::response::Response;

pub use dispatch::{default_dispatch, DispatchFn, MultiPayload};

/// Responses of one logical job, keyed by channel name.
pub type ResponseMap = BTreeMap<String, Response>;

pub type MultiHandler = Rc<dyn Fn(ResponseMap, &MultiChannel, &JobId)>;

#[derive(Clone, Default)]
struct MultiHandlers {
    response: Option<MultiHandler>,
    redirect: Option<MultiHandler>,
    error: Option<MultiHandler>,
}

impl MultiHandlers {
    /// Error if any part failed, redirect if any part redirected.
    fn select(&self, parts: &ResponseMap) -> Option<MultiHandler> {
        let is_error = parts.values().any(Response::is_error);
        let is_redirect = parts.values().any(Response::is_redirect);
        select_slot(
            &self.error,
            &self.redirect,
            &self.response,
            is_error,
            is_redirect,
        )
    }
}

struct MultiState {
    names: Vec<String>,
    channels: Vec<Channel>,
    dispatch: DispatchFn,
    next_auto_id: u64,
    /// (channel name, sub-job id) -> logical id.
    sub_jobs: HashMap<(String, JobId), JobId>,
    /// Logical id -> sub-jobs still outstanding, by channel name.
    pending: BTreeMap<JobId, BTreeMap<String, JobId>>,
    aggregated: HashMap<JobId, ResponseMap>,
    next_seq: u64,
    finished_order: BTreeMap<u64, JobId>,
    finished: HashMap<JobId, (u64, ResponseMap)>,
    /// Sub-jobs started by `fetch_job`, answered outside the aggregate index.
    direct: HashSet<(String, JobId)>,
    direct_results: HashMap<(String, JobId), Response>,
    handlers: MultiHandlers,
    cursor: usize,
}

impl MultiState {
    fn occupied(&self, id: &JobId) -> bool {
        self.pending.contains_key(id) || self.finished.contains_key(id)
    }

    fn resolve_name(&mut self, name: Option<JobId>) -> Result<JobId> {
        match name {
            Some(JobId::Named(ref s)) if s.is_empty() => {
                Err(Error::InvalidJobName("empty job name".into()))
            }
            Some(id) if self.occupied(&id) => Err(Error::DuplicateJob(id)),
            Some(id) => Ok(id),
            None => loop {
                let id = JobId::Auto(self.next_auto_id);
                self.next_auto_id += 1;
                if !self.occupied(&id) {
                    break Ok(id);
                }
            },
        }
    }

    /// Drop every trace of a logical job whose fan-out failed half way.
    fn abandon(&mut self, logical: &JobId) {
        self.pending.remove(logical);
        self.aggregated.remove(logical);
        self.sub_jobs.retain(|_, owner| owner != logical);
    }

    fn take_finished(&mut self, id: Option<&JobId>) -> Option<ResponseMap> {
        let id = match id {
            Some(id) => id.clone(),
            None => self.finished_order.values().next()?.clone(),
        };
        let (seq, parts) = self.finished.remove(&id)?;
        self.finished_order.remove(&seq);
        Some(parts)
    }
}

/// Shared handle to a scatter/gather coordinator.
#[derive(Clone)]
pub struct MultiChannel {
    inner: Rc<RefCell<MultiState>>,
}

impl fmt::Debug for MultiChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(st) => f
                .debug_struct("MultiChannel")
                .field("channels", &st.names)
                .field("pending", &st.pending.len())
                .field("finished", &st.finished.len())
                .finish(),
            Err(_) => f.write_str("MultiChannel { <busy> }"),
        }
    }
}

impl MultiChannel {
    /// Take over the given channels. Names must be unique.
    ///
    /// Each channel's handlers are replaced by a router into this
    /// coordinator, so results of its own jobs no longer reach `fetch` on the
    /// channel itself.
    pub fn new<S: Into<String>>(channels: Vec<(S, Channel)>) -> Result<Self> {
        let mut names = Vec::with_capacity(channels.len());
        let mut chans = Vec::with_capacity(channels.len());
        for (name, ch) in channels {
            let name = name.into();
            if names.contains(&name) {
                return Err(Error::DuplicateChannel(name));
            }
            names.push(name);
            chans.push(ch);
        }

        let inner = Rc::new(RefCell::new(MultiState {
            names: names.clone(),
            channels: chans.clone(),
            dispatch: Rc::new(default_dispatch),
            next_auto_id: 0,
            sub_jobs: HashMap::new(),
            pending: BTreeMap::new(),
            aggregated: HashMap::new(),
            next_seq: 0,
            finished_order: BTreeMap::new(),
            finished: HashMap::new(),
            direct: HashSet::new(),
            direct_results: HashMap::new(),
            handlers: MultiHandlers::default(),
            cursor: 0,
        }));

        for (name, ch) in names.into_iter().zip(chans) {
            let weak: Weak<RefCell<MultiState>> = Rc::downgrade(&inner);
            ch.clear_handlers();
            ch.set_response_handler(move |resp, _, sub| {
                if let Some(inner) = weak.upgrade() {
                    MultiChannel { inner }.sub_job_finished(&name, sub, resp);
                }
            });
        }
        Ok(Self { inner })
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.inner.borrow().names.clone()
    }

    pub fn channel(&self, name: &str) -> Option<Channel> {
        let st = self.inner.borrow();
        let idx = st.names.iter().position(|n| n == name)?;
        st.channels.get(idx).cloned()
    }

    fn channels(&self) -> Vec<Channel> {
        self.inner.borrow().channels.clone()
    }

    /// Logical jobs still waiting on at least one channel.
    pub fn pending_len(&self) -> usize {
        self.inner.borrow().pending.len()
    }

    pub fn finished_len(&self) -> usize {
        self.inner.borrow().finished.len()
    }

    pub fn set_dispatch_function<F>(&self, dispatch: F)
    where
        F: Fn(&MultiPayload, &[String]) -> Result<BTreeMap<String, Payload>> + 'static,
    {
        self.inner.borrow_mut().dispatch = Rc::new(dispatch);
    }

    pub fn set_response_handler<F>(&self, handler: F)
    where
        F: Fn(ResponseMap, &MultiChannel, &JobId) + 'static,
    {
        self.inner.borrow_mut().handlers.response = Some(Rc::new(handler));
    }

    pub fn set_redirect_handler<F>(&self, handler: F)
    where
        F: Fn(ResponseMap, &MultiChannel, &JobId) + 'static,
    {
        self.inner.borrow_mut().handlers.redirect = Some(Rc::new(handler));
    }

    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(ResponseMap, &MultiChannel, &JobId) + 'static,
    {
        self.inner.borrow_mut().handlers.error = Some(Rc::new(handler));
    }

    pub fn clear_handlers(&self) {
        self.inner.borrow_mut().handlers = MultiHandlers::default();
    }

    /// Split `payload` over the channels and queue one sub-job on each target.
    ///
    /// Every sub-job is queued and indexed before any of them is admitted, so
    /// a part that finishes at once is still routed to its aggregate. On error
    /// the sub-jobs that have not started are withdrawn again.
    pub fn add_job(
        &self,
        payload: impl Into<MultiPayload>,
        context: Option<JobContext>,
        name: Option<JobId>,
    ) -> Result<JobId> {
        let payload = payload.into();
        let (logical, dispatch, names) = {
            let mut st = self.inner.borrow_mut();
            let logical = st.resolve_name(name)?;
            (logical, st.dispatch.clone(), st.names.clone())
        };
        let split = dispatch(&payload, &names)?;
        dispatch::check_split(&split, &names)?;

        self.inner
            .borrow_mut()
            .pending
            .insert(logical.clone(), BTreeMap::new());
        let mut queued: Vec<(Channel, JobId)> = Vec::with_capacity(split.len());
        for (name, sub_payload) in split {
            let enqueued = match self.channel(&name) {
                Some(ch) => ch
                    .enqueue(sub_payload, context.clone(), None)
                    .map(|sub| (ch, sub)),
                None => Err(Error::UnknownChannel(name.clone())),
            };
            let (ch, sub) = match enqueued {
                Ok(pair) => pair,
                Err(e) => {
                    self.withdraw(&logical, &queued);
                    return Err(e);
                }
            };
            {
                let mut st = self.inner.borrow_mut();
                st.sub_jobs.insert((name.clone(), sub.clone()), logical.clone());
                if let Some(parts) = st.pending.get_mut(&logical) {
                    parts.insert(name, sub.clone());
                }
            }
            queued.push((ch, sub));
        }
        for (ch, sub) in &queued {
            if let Err(e) = ch.admit(std::slice::from_ref(sub)) {
                self.withdraw(&logical, &queued);
                return Err(e);
            }
        }
        tracing::debug!(job = %logical, parts = queued.len(), "logical job dispatched");
        Ok(logical)
    }

    /// Undo a half-dispatched logical job. Sub-jobs already running finish
    /// unobserved.
    fn withdraw(&self, logical: &JobId, queued: &[(Channel, JobId)]) {
        for (ch, sub) in queued {
            ch.cancel_queued(sub);
        }
        self.inner.borrow_mut().abandon(logical);
        tracing::debug!(job = %logical, "logical job withdrawn");
    }

    /// Broadcast every payload of `batch` as its own logical job.
    pub fn add_jobs(&self, batch: JobBatch, context: Option<JobContext>) -> Result<Vec<JobId>> {
        let entries = batch.into_entries();
        {
            let st = self.inner.borrow();
            let mut seen = HashSet::new();
            for name in entries.iter().filter_map(|(n, _)| n.as_ref()) {
                if st.occupied(name) || !seen.insert(name.clone()) {
                    return Err(Error::DuplicateJob(name.clone()));
                }
            }
        }
        entries
            .into_iter()
            .map(|(name, payload)| {
                self.add_job(MultiPayload::Broadcast(payload), context.clone(), name)
            })
            .collect()
    }

    /// Route one sub-job response into its aggregate; completes the logical
    /// job when it was the last part outstanding.
    fn sub_job_finished(&self, channel: &str, sub: &JobId, response: Response) {
        let key = (channel.to_string(), sub.clone());
        let ready = {
            let mut st = self.inner.borrow_mut();
            if st.direct.remove(&key) {
                st.direct_results.insert(key, response);
                return;
            }
            let Some(logical) = st.sub_jobs.remove(&key) else {
                tracing::warn!(channel, job = %sub, "response for an unknown sub-job");
                return;
            };
            st.aggregated
                .entry(logical.clone())
                .or_default()
                .insert(channel.to_string(), response);
            let complete = match st.pending.get_mut(&logical) {
                Some(parts) => {
                    parts.remove(channel);
                    parts.is_empty()
                }
                None => false,
            };
            if !complete {
                return;
            }
            st.pending.remove(&logical);
            let parts = st.aggregated.remove(&logical).unwrap_or_default();
            tracing::debug!(job = %logical, parts = parts.len(), "logical job complete");
            let handler = st.handlers.select(&parts);
            match handler {
                Some(handler) => (handler, parts, logical),
                None => {
                    let seq = st.next_seq;
                    st.next_seq += 1;
                    st.finished_order.insert(seq, logical.clone());
                    st.finished.insert(logical, (seq, parts));
                    return;
                }
            }
        };
        let (handler, parts, logical) = ready;
        handler(parts, self, &logical);
    }

    /// Blocking fetch of one aggregate (default deadline of the first channel's
    /// manager).
    ///
    /// Named: drives the owning channels of its outstanding sub-jobs until the
    /// aggregate is complete. Unnamed: drives the channels round-robin until
    /// some aggregate completes; `None` when nothing is pending.
    pub fn fetch(&self, name: Option<&JobId>) -> Result<Option<ResponseMap>> {
        let deadline = self.default_deadline();
        self.fetch_until(name, deadline)
    }

    pub fn fetch_within(
        &self,
        name: Option<&JobId>,
        timeout: Duration,
    ) -> Result<Option<ResponseMap>> {
        self.fetch_until(name, deadline_after(timeout))
    }

    fn fetch_until(
        &self,
        name: Option<&JobId>,
        deadline: Option<Instant>,
    ) -> Result<Option<ResponseMap>> {
        match name {
            Some(id) => self.fetch_named(id, deadline),
            None => self.fetch_oldest(deadline),
        }
    }

    fn fetch_named(&self, id: &JobId, deadline: Option<Instant>) -> Result<Option<ResponseMap>> {
        if !self.inner.borrow().occupied(id) {
            return Err(Error::JobNotFound(id.clone()));
        }
        loop {
            let next = {
                let mut st = self.inner.borrow_mut();
                if let Some(parts) = st.take_finished(Some(id)) {
                    return Ok(Some(parts));
                }
                match st.pending.get(id) {
                    // Consumed by a handler.
                    None => return Ok(None),
                    Some(parts) => parts
                        .iter()
                        .next()
                        .map(|(name, sub)| (name.clone(), sub.clone())),
                }
            };
            let Some((name, sub)) = next else {
                return Ok(None);
            };
            let ch = self
                .channel(&name)
                .ok_or_else(|| Error::UnknownChannel(name.clone()))?;
            match ch.fetch_until(Some(&sub), deadline)? {
                // The channel's handlers were changed behind our back.
                Some(resp) => self.sub_job_finished(&name, &sub, resp),
                None => {
                    let lost = self
                        .inner
                        .borrow()
                        .sub_jobs
                        .contains_key(&(name.clone(), sub.clone()));
                    if lost {
                        tracing::warn!(job = %id, channel = %name, "sub-job response was diverted");
                        self.inner.borrow_mut().abandon(id);
                        return Ok(None);
                    }
                }
            }
        }
    }

    fn fetch_oldest(&self, deadline: Option<Instant>) -> Result<Option<ResponseMap>> {
        loop {
            let first_pending = {
                let mut st = self.inner.borrow_mut();
                if let Some(parts) = st.take_finished(None) {
                    return Ok(Some(parts));
                }
                match st.pending.keys().next() {
                    Some(id) => id.clone(),
                    None => return Ok(None),
                }
            };
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(Error::Timeout);
            }
            if !self.drive_round_robin(deadline)? {
                return Err(Error::Stalled(first_pending));
            }
        }
    }

    /// One step on the next channel (in rotation) that still has work.
    fn drive_round_robin(&self, deadline: Option<Instant>) -> Result<bool> {
        let (channels, start) = {
            let st = self.inner.borrow();
            (st.channels.clone(), st.cursor)
        };
        let n = channels.len();
        for offset in 0..n {
            let idx = (start + offset) % n;
            let ch = &channels[idx];
            if !ch.has_outstanding_work() {
                continue;
            }
            self.inner.borrow_mut().cursor = (idx + 1) % n;
            if ch.drive_until(deadline)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Dispatch `payload`, force-start every sub-job and block until each
    /// channel has answered. The result bypasses the aggregate index and the
    /// multi-channel handlers.
    pub fn fetch_job(
        &self,
        payload: impl Into<MultiPayload>,
        context: Option<JobContext>,
    ) -> Result<ResponseMap> {
        let payload = payload.into();
        let (dispatch, names) = {
            let st = self.inner.borrow();
            (st.dispatch.clone(), st.names.clone())
        };
        let split = dispatch(&payload, &names)?;
        dispatch::check_split(&split, &names)?;

        let mut targets = Vec::with_capacity(split.len());
        for (name, sub_payload) in split {
            let ch = self
                .channel(&name)
                .ok_or_else(|| Error::UnknownChannel(name.clone()))?;
            if ch.manager().is_none() {
                return Err(Error::Unregistered);
            }
            targets.push((name, ch, sub_payload));
        }

        let mut started: Vec<(String, Channel, JobId)> = Vec::with_capacity(targets.len());
        for (name, ch, sub_payload) in targets {
            let sub = match ch.enqueue(sub_payload, context.clone(), None) {
                Ok(sub) => sub,
                Err(e) => {
                    self.forget_direct(&started);
                    return Err(e);
                }
            };
            self.inner
                .borrow_mut()
                .direct
                .insert((name.clone(), sub.clone()));
            started.push((name, ch.clone(), sub.clone()));
            if let Err(e) = ch.start_job(Some(&sub)) {
                self.forget_direct(&started);
                return Err(e);
            }
        }

        let mut parts = ResponseMap::new();
        for (i, (name, ch, sub)) in started.iter().enumerate() {
            match self.direct_response(name, ch, sub) {
                Ok(resp) => {
                    parts.insert(name.clone(), resp);
                }
                Err(e) => {
                    self.forget_direct(&started[i..]);
                    return Err(e);
                }
            }
        }
        Ok(parts)
    }

    fn direct_response(&self, name: &str, ch: &Channel, sub: &JobId) -> Result<Response> {
        let key = (name.to_string(), sub.clone());
        let stored = self.inner.borrow_mut().direct_results.remove(&key);
        if let Some(resp) = stored {
            return Ok(resp);
        }
        ch.fetch(Some(sub))?;
        self.inner
            .borrow_mut()
            .direct_results
            .remove(&key)
            .ok_or_else(|| Error::JobNotFound(sub.clone()))
    }

    /// Stop tracking direct sub-jobs; queued ones are withdrawn, running ones
    /// finish unobserved.
    fn forget_direct(&self, subs: &[(String, Channel, JobId)]) {
        for (name, ch, sub) in subs {
            ch.cancel_queued(sub);
            let key = (name.clone(), sub.clone());
            let mut st = self.inner.borrow_mut();
            st.direct.remove(&key);
            st.direct_results.remove(&key);
        }
    }

    /// Named: that aggregate is ready for `fetch`. Unnamed: no channel has
    /// queued or running work.
    pub fn is_finished(&self, name: Option<&JobId>) -> bool {
        match name {
            Some(id) => self.inner.borrow().finished.contains_key(id),
            None => self.channels().iter().all(|ch| ch.is_finished(None)),
        }
    }

    /// Block until every channel is idle.
    pub fn finish(&self) -> Result<()> {
        let deadline = self.default_deadline();
        self.finish_until(deadline)
    }

    pub fn finish_within(&self, timeout: Duration) -> Result<()> {
        self.finish_until(deadline_after(timeout))
    }

    fn finish_until(&self, deadline: Option<Instant>) -> Result<()> {
        for ch in self.channels() {
            ch.finish_until(deadline)?;
        }
        Ok(())
    }

    fn default_deadline(&self) -> Option<Instant> {
        self.channels()
            .iter()
            .find_map(|ch| ch.manager())
            .and_then(|mgr| mgr.default_deadline())
    }
}
