//! Curl multi backend: one `curl::multi` handle, one Easy2 per operation.
//!
//! Single-threaded: the manager calls `advance` (perform + messages) and
//! `poll` (wait) from its read loop. Finished handles are removed from the
//! multi handle as soon as their completion message is seen.

mod classify;
mod easy;
mod handler;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::error::TransportError;
use crate::request::PreparedRequest;
use crate::transport::{
    Completion, FailureKind, OperationHandle, RawResult, Transport, TransportFailure,
};

use handler::Collector;

/// Transport-wide curl defaults, applied when a template leaves a limit unset.
#[derive(Debug, Clone)]
pub struct CurlOptions {
    pub connect_timeout: Duration,
    /// Whole-request timeout for templates without one. `None` disables it.
    pub request_timeout: Option<Duration>,
    pub max_redirects: u32,
    pub user_agent: Option<String>,
    /// Receive speed cap in bytes per second.
    pub max_recv_speed: Option<u64>,
    /// Abort transfers slower than 1 KiB/s for this long.
    pub low_speed_time: Option<Duration>,
    /// Abort transfers whose body grows beyond this many bytes.
    pub max_body_bytes: Option<usize>,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Some(Duration::from_secs(300)),
            max_redirects: 10,
            user_agent: None,
            max_recv_speed: None,
            low_speed_time: None,
            max_body_bytes: None,
        }
    }
}

/// [`Transport`] over libcurl's multi interface.
pub struct CurlTransport {
    multi: curl::multi::Multi,
    opts: CurlOptions,
    next_id: u64,
    active: HashMap<u64, curl::multi::Easy2Handle<Collector>>,
    /// Completed (removed from the multi handle) but not yet deregistered.
    done: HashSet<u64>,
    completed: Vec<Completion>,
}

impl CurlTransport {
    pub fn new(opts: CurlOptions) -> Self {
        Self {
            multi: curl::multi::Multi::new(),
            opts,
            next_id: 0,
            active: HashMap::new(),
            done: HashSet::new(),
            completed: Vec::new(),
        }
    }

    pub fn options(&self) -> &CurlOptions {
        &self.opts
    }

    /// Operations still owned by the multi handle.
    pub fn active_len(&self) -> usize {
        self.active.len()
    }
}

impl Default for CurlTransport {
    fn default() -> Self {
        Self::new(CurlOptions::default())
    }
}

/// Turn a finished Easy2 into a raw result.
fn raw_from_easy(
    easy: &mut curl::easy::Easy2<Collector>,
    outcome: Result<(), curl::Error>,
) -> RawResult {
    let status = easy.response_code().unwrap_or(0);
    let effective_url = easy
        .effective_url()
        .ok()
        .flatten()
        .map(|s| s.to_string());
    let collector = easy.get_mut();
    let failure = match outcome {
        Ok(()) => None,
        Err(_) if collector.truncated => Some(TransportFailure::new(
            FailureKind::Aborted,
            "response body exceeds configured limit",
        )),
        Err(e) => Some(classify::failure_from_curl(&e)),
    };
    RawResult {
        status,
        header_lines: std::mem::take(&mut collector.header_lines),
        body: std::mem::take(&mut collector.body),
        effective_url,
        failure,
    }
}

impl Transport for CurlTransport {
    fn register(&mut self, request: &PreparedRequest) -> Result<OperationHandle, TransportError> {
        let easy = easy::easy_for(request, &self.opts)?;
        let handle = self.multi.add2(easy)?;
        let id = self.next_id;
        self.next_id += 1;
        self.active.insert(id, handle);
        tracing::trace!(op = id, url = %request.url, "curl operation added");
        Ok(OperationHandle(id))
    }

    fn deregister(&mut self, handle: OperationHandle) -> Result<(), TransportError> {
        if self.done.remove(&handle.0) {
            return Ok(());
        }
        match self.active.remove(&handle.0) {
            Some(easy) => {
                self.multi.remove2(easy)?;
                tracing::debug!(op = handle.0, "curl operation aborted");
                Ok(())
            }
            None => Err(TransportError::UnknownHandle(handle.0)),
        }
    }

    fn advance(&mut self) -> Result<usize, TransportError> {
        let running = self.multi.perform()?;

        let mut finished: Vec<(u64, Result<(), curl::Error>)> = Vec::new();
        let active = &self.active;
        self.multi.messages(|msg| {
            for (id, handle) in active.iter() {
                if let Some(outcome) = msg.result_for2(handle) {
                    finished.push((*id, outcome));
                    break;
                }
            }
        });

        for (id, outcome) in finished {
            let Some(handle) = self.active.remove(&id) else {
                continue;
            };
            let mut easy = self.multi.remove2(handle)?;
            let raw = raw_from_easy(&mut easy, outcome);
            self.done.insert(id);
            self.completed.push(Completion {
                handle: OperationHandle(id),
                raw,
            });
        }
        Ok(running as usize)
    }

    fn poll(&mut self, timeout: Duration) -> Result<usize, TransportError> {
        if !self.completed.is_empty() || self.active.is_empty() {
            return Ok(self.completed.len());
        }
        self.multi.wait(&mut [], timeout)?;
        Ok(self.completed.len())
    }

    fn drain_completions(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deregister_unknown_handle_is_an_error() {
        let mut t = CurlTransport::default();
        let err = t.deregister(OperationHandle(42)).unwrap_err();
        assert!(matches!(err, TransportError::UnknownHandle(42)));
    }

    #[test]
    fn idle_transport_advances_and_polls_without_blocking() {
        let mut t = CurlTransport::default();
        assert_eq!(t.advance().unwrap(), 0);
        assert_eq!(t.poll(Duration::from_secs(5)).unwrap(), 0);
        assert!(t.drain_completions().is_empty());
    }

    #[test]
    fn default_options_bound_every_request() {
        let opts = CurlOptions::default();
        assert!(opts.request_timeout.is_some());
        assert_eq!(opts.max_redirects, 10);
    }
}
