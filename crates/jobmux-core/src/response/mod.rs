//! Response model and status classification.
//!
//! A [`Response`] is built from a transport's raw result once an operation
//! completes. Application-level failures live here as data: callers inspect
//! the predicates, or register an error handler on the channel.

mod builder;
mod parse;

pub use builder::{HttpResponseBuilder, ResponseBuilder};

use crate::job::{JobContext, JobId};
use crate::transport::TransportFailure;

/// Coarse class of a response, in the precedence used by handler dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// No usable HTTP status (connect failure, timeout, ...).
    Fatal,
    Informational,
    Ok,
    Redirect,
    ClientError,
    ServerError,
}

impl StatusClass {
    pub fn from_status(status: u32) -> Self {
        match status {
            100..=199 => StatusClass::Informational,
            200..=299 => StatusClass::Ok,
            300..=399 => StatusClass::Redirect,
            400..=499 => StatusClass::ClientError,
            500..=599 => StatusClass::ServerError,
            _ => StatusClass::Fatal,
        }
    }
}

/// Result of one job.
#[derive(Debug, Clone)]
pub struct Response {
    pub(crate) job: JobId,
    pub(crate) status: u32,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
    pub(crate) effective_url: Option<String>,
    pub(crate) failure: Option<TransportFailure>,
    pub(crate) context: Option<JobContext>,
}

impl Response {
    /// Build a response by hand (custom builders, tests).
    pub fn new(job: JobId, status: u32) -> Self {
        Self {
            job,
            status,
            headers: Vec::new(),
            body: Vec::new(),
            effective_url: None,
            failure: None,
            context: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_failure(mut self, failure: TransportFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn with_context(mut self, context: Option<JobContext>) -> Self {
        self.context = context;
        self
    }

    pub fn job(&self) -> &JobId {
        &self.job
    }

    /// HTTP status of the final response; 0 when none was received.
    pub fn status(&self) -> u32 {
        self.status
    }

    pub fn status_class(&self) -> StatusClass {
        if self.failure.is_some() {
            return StatusClass::Fatal;
        }
        StatusClass::from_status(self.status)
    }

    pub fn is_ok(&self) -> bool {
        self.status_class() == StatusClass::Ok
    }

    pub fn is_redirect(&self) -> bool {
        self.status_class() == StatusClass::Redirect
    }

    pub fn is_client_or_server_error(&self) -> bool {
        matches!(
            self.status_class(),
            StatusClass::ClientError | StatusClass::ServerError
        )
    }

    pub fn is_fatal(&self) -> bool {
        self.status_class() == StatusClass::Fatal
    }

    /// What the error handler slot reacts to.
    pub fn is_error(&self) -> bool {
        self.is_client_or_server_error() || self.is_fatal()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First header with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn effective_url(&self) -> Option<&str> {
        self.effective_url.as_deref()
    }

    pub fn failure(&self) -> Option<&TransportFailure> {
        self.failure.as_ref()
    }

    /// Context supplied when the job was added.
    pub fn context(&self) -> Option<&JobContext> {
        self.context.as_ref()
    }
}
