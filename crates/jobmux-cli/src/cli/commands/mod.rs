//! CLI command handlers, one per file.

mod completions;
mod config;
mod get;
mod man;
mod run;
mod scatter;

pub use completions::run_completions;
pub use config::run_config;
pub use get::{run_get, GetOptions};
pub use man::run_man;
pub use run::run_jobfile;
pub use scatter::run_scatter;

use jobmux_core::Response;

/// One result line: `STATUS BYTES LABEL`, or `ERR KIND message LABEL` when
/// the request never produced a status.
pub(crate) fn result_line(resp: &Response, label: &str) -> String {
    match resp.failure() {
        Some(failure) => format!(
            "ERR {} {} {}",
            format!("{:?}", failure.kind).to_lowercase(),
            failure.message,
            label
        ),
        None => format!("{} {} {}", resp.status(), resp.body().len(), label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmux_core::transport::{FailureKind, TransportFailure};
    use jobmux_core::JobId;

    #[test]
    fn status_line_for_completed_request() {
        let resp = Response::new(JobId::Auto(0), 200).with_body("hello");
        assert_eq!(result_line(&resp, "http://x/"), "200 5 http://x/");
    }

    #[test]
    fn error_line_for_failed_request() {
        let resp = Response::new(JobId::Auto(0), 0).with_failure(TransportFailure::new(
            FailureKind::Connection,
            "refused",
        ));
        assert_eq!(result_line(&resp, "u"), "ERR connection refused u");
    }
}
