//! Payload encoding into a URL query or a request body.

use url::form_urlencoded;
use url::Url;

use crate::job::Payload;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Append the payload to the URL query, keeping any query the template already has.
pub(super) fn apply_query(url: &mut Url, payload: &Payload) {
    match payload {
        Payload::Body(raw) => {
            if raw.is_empty() {
                return;
            }
            let query = match url.query() {
                Some(q) if !q.is_empty() => format!("{}&{}", q, raw),
                _ => raw.clone(),
            };
            url.set_query(Some(&query));
        }
        Payload::Form(pairs) => {
            if pairs.is_empty() {
                return;
            }
            url.query_pairs_mut().extend_pairs(pairs.iter());
        }
    }
}

/// Request body bytes plus the content type to send when the template has none.
pub(super) fn body_for(payload: &Payload) -> (Vec<u8>, Option<&'static str>) {
    match payload {
        Payload::Body(raw) => (raw.as_bytes().to_vec(), None),
        Payload::Form(pairs) => {
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs.iter())
                .finish();
            (encoded.into_bytes(), Some(FORM_CONTENT_TYPE))
        }
    }
}
