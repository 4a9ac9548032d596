//! Request templates and per-job prepared requests.
//!
//! A channel holds one immutable [`RequestTemplate`]. Each admitted job binds
//! its payload into a fresh [`PreparedRequest`]; nothing is shared between
//! prepared requests.

mod encode;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};
use crate::job::{JobContext, JobId, Payload};

/// HTTP method of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }

    /// Methods whose payload is carried in the request body rather than the query.
    pub fn has_body(self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

/// Endpoint description shared by every job of a channel.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    url: String,
    method: Method,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    follow_redirects: bool,
    max_redirects: Option<u32>,
    /// Set by `initialize`; binding requires it.
    parsed: Option<Url>,
}

impl RequestTemplate {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: Vec::new(),
            timeout: None,
            connect_timeout: None,
            follow_redirects: false,
            max_redirects: None,
            parsed: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Whole-request timeout. Without one the transport default applies.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = Some(max);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn is_initialized(&self) -> bool {
        self.parsed.is_some()
    }

    /// One-time validation run by the owning channel before its first job starts.
    pub fn initialize(&mut self) -> Result<()> {
        if self.parsed.is_some() {
            return Ok(());
        }
        let parsed = Url::parse(&self.url)
            .map_err(|e| Error::InvalidTemplate(format!("{}: {}", self.url, e)))?;
        if parsed.cannot_be_a_base() {
            return Err(Error::InvalidTemplate(format!(
                "{}: not a hierarchical URL",
                self.url
            )));
        }
        for (name, _) in &self.headers {
            if name.trim().is_empty() || name.contains(':') {
                return Err(Error::InvalidTemplate(format!("bad header name {:?}", name)));
            }
        }
        self.parsed = Some(parsed);
        Ok(())
    }

    /// Bind one job's payload and context into a fresh prepared request.
    pub fn bind(
        &self,
        job: &JobId,
        payload: &Payload,
        context: Option<&JobContext>,
    ) -> Result<PreparedRequest> {
        let base = self
            .parsed
            .as_ref()
            .ok_or_else(|| Error::InvalidTemplate("template used before initialize".into()))?;
        let mut url = base.clone();
        let mut headers = self.headers.clone();
        let body = if self.method.has_body() {
            let (body, content_type) = encode::body_for(payload);
            if let Some(ct) = content_type {
                if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
                    headers.push(("Content-Type".to_string(), ct.to_string()));
                }
            }
            Some(body)
        } else {
            encode::apply_query(&mut url, payload);
            None
        };
        Ok(PreparedRequest {
            job: job.clone(),
            method: self.method,
            url: url.into(),
            headers,
            body,
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
            follow_redirects: self.follow_redirects,
            max_redirects: self.max_redirects,
            context: context.cloned(),
        })
    }
}

/// Fully bound request for one job, handed to the transport.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub job: JobId,
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub follow_redirects: bool,
    pub max_redirects: Option<u32>,
    pub context: Option<JobContext>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ready(mut t: RequestTemplate) -> RequestTemplate {
        t.initialize().unwrap();
        t
    }

    #[test]
    fn bind_requires_initialize() {
        let t = RequestTemplate::get("http://example.com/");
        let err = t.bind(&JobId::Auto(0), &Payload::body(""), None).unwrap_err();
        assert!(matches!(err, Error::InvalidTemplate(_)));
    }

    #[test]
    fn initialize_rejects_bad_url() {
        let mut t = RequestTemplate::get("not a url");
        assert!(matches!(t.initialize(), Err(Error::InvalidTemplate(_))));
        assert!(!t.is_initialized());
    }

    #[test]
    fn get_form_goes_into_query() {
        let t = ready(RequestTemplate::get("http://example.com/search?lang=en"));
        let req = t
            .bind(&JobId::from("a"), &Payload::form([("q", "a b")]), None)
            .unwrap();
        assert_eq!(req.url, "http://example.com/search?lang=en&q=a+b");
        assert!(req.body.is_none());
    }

    #[test]
    fn get_body_is_appended_verbatim() {
        let t = ready(RequestTemplate::get("http://example.com/items"));
        let req = t.bind(&JobId::Auto(1), &Payload::body("id=7"), None).unwrap();
        assert_eq!(req.url, "http://example.com/items?id=7");
    }

    #[test]
    fn post_form_sets_body_and_content_type() {
        let t = ready(RequestTemplate::post("http://example.com/submit"));
        let ctx = json!({"file": "/tmp/out"});
        let req = t
            .bind(&JobId::Auto(3), &Payload::form([("a", "1"), ("b", "x&y")]), Some(&ctx))
            .unwrap();
        assert_eq!(req.body.as_deref(), Some(&b"a=1&b=x%26y"[..]));
        assert!(req
            .headers
            .iter()
            .any(|(k, v)| k == "Content-Type" && v == "application/x-www-form-urlencoded"));
        assert_eq!(req.context, Some(ctx));
        assert_eq!(req.url, "http://example.com/submit");
    }

    #[test]
    fn bind_does_not_mutate_template() {
        let t = ready(RequestTemplate::get("http://example.com/"));
        let a = t.bind(&JobId::Auto(0), &Payload::body("x=1"), None).unwrap();
        let b = t.bind(&JobId::Auto(1), &Payload::body("y=2"), None).unwrap();
        assert_eq!(a.url, "http://example.com/?x=1");
        assert_eq!(b.url, "http://example.com/?y=2");
    }
}
