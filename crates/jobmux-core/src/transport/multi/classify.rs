//! Classify curl errors of a finished transfer into failure kinds.

use crate::transport::{FailureKind, TransportFailure};

/// Classify a curl error for the response's failure record.
pub(crate) fn classify_curl_error(e: &curl::Error) -> FailureKind {
    if e.is_operation_timedout() {
        return FailureKind::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
    {
        return FailureKind::Connection;
    }
    if e.is_write_error() || e.is_aborted_by_callback() {
        return FailureKind::Aborted;
    }
    FailureKind::Other
}

pub(crate) fn failure_from_curl(e: &curl::Error) -> TransportFailure {
    TransportFailure::new(classify_curl_error(e), e.to_string())
}
