//! Configure an Easy2 handle for one prepared request.

use crate::request::{Method, PreparedRequest};

use super::handler::Collector;
use super::CurlOptions;

/// Build an Easy2 handle for `request`, filling unset limits from `opts`.
pub(super) fn easy_for(
    request: &PreparedRequest,
    opts: &CurlOptions,
) -> Result<curl::easy::Easy2<Collector>, curl::Error> {
    let mut easy = curl::easy::Easy2::new(Collector::new(opts.max_body_bytes));
    easy.url(&request.url)?;
    match request.method {
        Method::Get => easy.get(true)?,
        Method::Head => easy.nobody(true)?,
        Method::Post => easy.post(true)?,
        Method::Put => easy.custom_request("PUT")?,
        Method::Delete => easy.custom_request("DELETE")?,
    }
    if let Some(ref body) = request.body {
        easy.post_fields_copy(body)?;
    }

    easy.follow_location(request.follow_redirects)?;
    easy.max_redirections(request.max_redirects.unwrap_or(opts.max_redirects))?;
    easy.connect_timeout(request.connect_timeout.unwrap_or(opts.connect_timeout))?;
    // A template without a timeout falls back to the transport default so a
    // stuck operation eventually completes with a failure.
    if let Some(timeout) = request.timeout.or(opts.request_timeout) {
        easy.timeout(timeout)?;
    }
    // Abort if throughput stays below 1 KiB/s for the configured window.
    if let Some(window) = opts.low_speed_time {
        easy.low_speed_limit(1024)?;
        easy.low_speed_time(window)?;
    }
    if let Some(speed) = opts.max_recv_speed {
        easy.max_recv_speed(speed)?;
    }
    if let Some(ref ua) = opts.user_agent {
        easy.useragent(ua)?;
    }

    if !request.headers.is_empty() {
        let mut list = curl::easy::List::new();
        for (k, v) in &request.headers {
            list.append(&format!("{}: {}", k.trim(), v.trim()))?;
        }
        easy.http_headers(list)?;
    }
    Ok(easy)
}
