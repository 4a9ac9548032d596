//! Integration tests: channels, manager and multi-channel over the curl
//! transport against a local HTTP server.

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use jobmux_core::transport::{CurlOptions, FailureKind};
use jobmux_core::{
    Channel, ChannelManager, CurlTransport, JobBatch, JobId, ManagerConfig, MultiChannel, Payload,
    RequestTemplate,
};

fn manager(cap: usize) -> ChannelManager {
    let opts = CurlOptions {
        connect_timeout: Duration::from_secs(5),
        request_timeout: Some(Duration::from_secs(10)),
        ..CurlOptions::default()
    };
    ChannelManager::new(
        CurlTransport::new(opts),
        ManagerConfig {
            total_thread_limit: cap,
            wait_timeout: Some(Duration::from_secs(20)),
            poll_interval: Duration::from_millis(20),
        },
    )
}

#[test]
fn get_jobs_carry_payload_in_query() {
    let base = common::http_server::start();
    let mgr = manager(4);
    let ch = Channel::new(RequestTemplate::get(format!("{}/echo", base)));
    mgr.add_channel(&ch).unwrap();

    let ids = ch
        .add_jobs(
            JobBatch::Auto(vec![
                Payload::from("a=1"),
                Payload::form([("b", "two words")]),
            ]),
            None,
        )
        .unwrap();

    let first = ch.fetch(Some(&ids[0])).unwrap().unwrap();
    assert!(first.is_ok());
    assert_eq!(first.text(), "GET /echo?a=1");
    assert_eq!(first.header("content-type"), Some("text/plain"));

    let second = ch.fetch(Some(&ids[1])).unwrap().unwrap();
    assert_eq!(second.text(), "GET /echo?b=two+words");
}

#[test]
fn post_form_goes_into_body() {
    let base = common::http_server::start();
    let mgr = manager(4);
    let ch = Channel::new(RequestTemplate::post(format!("{}/echo", base)));
    mgr.add_channel(&ch).unwrap();

    let resp = ch
        .fetch_job(Payload::form([("k", "v"), ("n", "1")]), None)
        .unwrap()
        .unwrap();
    assert_eq!(resp.text(), "POST /echo\nk=v&n=1");
}

#[test]
fn error_statuses_reach_the_error_handler() {
    let base = common::http_server::start();
    let mgr = manager(4);
    let ch = Channel::new(RequestTemplate::get(format!("{}/status/503", base)));
    mgr.add_channel(&ch).unwrap();

    let statuses = Rc::new(RefCell::new(Vec::new()));
    let seen = statuses.clone();
    ch.set_error_handler(move |resp, _, _| seen.borrow_mut().push(resp.status()));

    ch.add_job("", None, None).unwrap();
    ch.add_job("", None, None).unwrap();
    ch.finish().unwrap();

    assert_eq!(*statuses.borrow(), vec![503, 503]);
    assert!(ch.fetch(None).unwrap().is_none());
}

#[test]
fn redirects_are_reported_or_followed() {
    let base = common::http_server::start();
    let mgr = manager(4);
    let plain = Channel::new(RequestTemplate::get(format!("{}/redirect", base)));
    let follow = Channel::new(
        RequestTemplate::get(format!("{}/redirect", base)).follow_redirects(true),
    );
    mgr.add_channel(&plain).unwrap();
    mgr.add_channel(&follow).unwrap();

    let moved = plain.fetch_job("", None).unwrap().unwrap();
    assert!(moved.is_redirect());
    assert_eq!(moved.location(), Some("/echo"));

    let landed = follow.fetch_job("", None).unwrap().unwrap();
    assert!(landed.is_ok());
    assert_eq!(landed.text(), "GET /echo");
    assert!(landed.effective_url().unwrap().ends_with("/echo"));
}

#[test]
fn refused_connection_is_a_fatal_response_not_an_error() {
    let mgr = manager(4);
    let ch = Channel::new(RequestTemplate::get(common::http_server::closed_url()));
    mgr.add_channel(&ch).unwrap();

    let resp = ch.fetch_job("", None).unwrap().unwrap();
    assert!(resp.is_fatal());
    assert!(resp.is_error());
    assert_eq!(resp.failure().unwrap().kind, FailureKind::Connection);
}

#[test]
fn global_cap_limits_parallel_requests() {
    let base = common::http_server::start();
    let mgr = manager(2);
    let ch = Channel::new(RequestTemplate::get(format!("{}/slow/50", base)));
    mgr.add_channel(&ch).unwrap();

    for _ in 0..5 {
        ch.add_job("", None, None).unwrap();
        assert!(mgr.inflight_len() <= 2);
    }
    let mut done = 0;
    while let Some(resp) = ch.fetch(None).unwrap() {
        assert!(resp.is_ok());
        assert!(mgr.inflight_len() <= 2);
        done += 1;
    }
    assert_eq!(done, 5);
}

#[test]
fn scatter_gathers_from_two_servers() {
    let left = common::http_server::start();
    let right = common::http_server::start();
    let mgr = manager(4);
    let a = Channel::new(RequestTemplate::get(format!("{}/echo", left)));
    let b = Channel::new(RequestTemplate::get(format!("{}/status/404", right)));
    mgr.add_channel(&a).unwrap();
    mgr.add_channel(&b).unwrap();
    let multi = MultiChannel::new(vec![("left", a), ("right", b)]).unwrap();

    let id = multi
        .add_job("q=1", None, Some(JobId::from("lookup")))
        .unwrap();
    let parts = multi.fetch(Some(&id)).unwrap().unwrap();

    assert_eq!(parts.len(), 2);
    assert_eq!(parts["left"].text(), "GET /echo?q=1");
    assert_eq!(parts["right"].status(), 404);
    assert!(multi.is_finished(None));
}
