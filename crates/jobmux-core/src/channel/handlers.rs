//! Response handler slots and their dispatch precedence.

use std::rc::Rc;

use crate::job::JobId;
use crate::response::Response;

use super::Channel;

/// Called with the response, the owning channel and the job name.
/// The job is consumed: it never reaches the channel's finished set.
pub type ResponseHandler = Rc<dyn Fn(Response, &Channel, &JobId)>;

/// Pick a slot: error beats redirect beats the catch-all.
///
/// A specific slot only applies to matching results; when it is empty the
/// catch-all takes them.
pub(crate) fn select_slot<H: Clone>(
    error: &Option<H>,
    redirect: &Option<H>,
    response: &Option<H>,
    is_error: bool,
    is_redirect: bool,
) -> Option<H> {
    if is_error {
        if let Some(h) = error {
            return Some(h.clone());
        }
    }
    if is_redirect {
        if let Some(h) = redirect {
            return Some(h.clone());
        }
    }
    response.clone()
}

#[derive(Clone, Default)]
pub(crate) struct Handlers {
    pub(crate) response: Option<ResponseHandler>,
    pub(crate) redirect: Option<ResponseHandler>,
    pub(crate) error: Option<ResponseHandler>,
}

impl Handlers {
    pub(crate) fn is_empty(&self) -> bool {
        self.response.is_none() && self.redirect.is_none() && self.error.is_none()
    }

    pub(crate) fn select(&self, response: &Response) -> Option<ResponseHandler> {
        select_slot(
            &self.error,
            &self.redirect,
            &self.response,
            response.is_error(),
            response.is_redirect(),
        )
    }
}

/// A handler call deferred until no channel or manager state is borrowed.
pub(crate) struct Dispatch {
    pub(crate) handler: ResponseHandler,
    pub(crate) response: Response,
    pub(crate) job: JobId,
}

impl Dispatch {
    pub(crate) fn invoke(self, channel: &Channel) {
        (self.handler)(self.response, channel, &self.job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_error_redirect_catch_all() {
        let e = Some("error");
        let r = Some("redirect");
        let c = Some("catch-all");
        assert_eq!(select_slot(&e, &r, &c, true, false), Some("error"));
        assert_eq!(select_slot(&e, &r, &c, false, true), Some("redirect"));
        assert_eq!(select_slot(&e, &r, &c, false, false), Some("catch-all"));
    }

    #[test]
    fn missing_specific_slot_falls_back_to_catch_all() {
        let c = Some("catch-all");
        assert_eq!(select_slot(&None, &None, &c, true, false), Some("catch-all"));
        assert_eq!(select_slot(&None, &None, &None::<&str>, true, false), None);
    }

    #[test]
    fn specific_slot_only_matches_its_class() {
        let e = Some("error");
        assert_eq!(select_slot(&e, &None, &None, false, false), None);
    }
}
