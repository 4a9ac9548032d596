//! Build a [`Response`] from a transport's raw result.

use crate::job::JobId;
use crate::request::PreparedRequest;
use crate::transport::RawResult;

use super::parse::parse_header_block;
use super::Response;

/// Turns a raw completion into a response. One builder per channel.
pub trait ResponseBuilder {
    fn build(&self, raw: RawResult, request: &PreparedRequest, job: &JobId) -> Response;
}

/// Default builder: status from the raw result, falling back to the last
/// status line seen in the header block.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpResponseBuilder;

impl ResponseBuilder for HttpResponseBuilder {
    fn build(&self, raw: RawResult, request: &PreparedRequest, job: &JobId) -> Response {
        let (parsed_status, headers) = parse_header_block(&raw.header_lines);
        let status = if raw.status != 0 {
            raw.status
        } else {
            parsed_status.unwrap_or(0)
        };
        Response {
            job: job.clone(),
            status,
            headers,
            body: raw.body,
            effective_url: raw.effective_url.or_else(|| Some(request.url.clone())),
            failure: raw.failure,
            context: request.context.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Payload;
    use crate::request::RequestTemplate;
    use serde_json::json;

    fn request() -> PreparedRequest {
        let mut t = RequestTemplate::get("http://example.com/a");
        t.initialize().unwrap();
        let ctx = json!("ctx");
        t.bind(&JobId::Auto(4), &Payload::body(""), Some(&ctx)).unwrap()
    }

    #[test]
    fn builds_from_header_lines_when_status_missing() {
        let raw = RawResult {
            status: 0,
            header_lines: vec!["HTTP/1.1 418 I'm a teapot".into(), "X-A: 1".into()],
            body: b"short and stout".to_vec(),
            effective_url: None,
            failure: None,
        };
        let req = request();
        let r = HttpResponseBuilder.build(raw, &req, &JobId::Auto(4));
        assert_eq!(r.status(), 418);
        assert!(r.is_client_or_server_error());
        assert_eq!(r.header("x-a"), Some("1"));
        assert_eq!(r.text(), "short and stout");
        assert_eq!(r.effective_url(), Some("http://example.com/a"));
        assert_eq!(r.context(), Some(&json!("ctx")));
    }

    #[test]
    fn transport_status_takes_precedence() {
        let raw = RawResult {
            status: 200,
            header_lines: vec!["HTTP/1.1 302 Found".into()],
            ..RawResult::default()
        };
        let r = HttpResponseBuilder.build(raw, &request(), &JobId::Auto(4));
        assert_eq!(r.status(), 200);
    }
}
