use std::cell::{Cell, RefCell};
use std::time::Duration;

use super::*;
use crate::manager::{ChannelManager, ManagerConfig};
use crate::request::RequestTemplate;
use crate::transport::stub::{Broken, Refusing};
use crate::transport::{CompletionOrder, FailureKind, MemoryTransport, RawResult};

fn config() -> ManagerConfig {
    ManagerConfig {
        total_thread_limit: 8,
        wait_timeout: Some(Duration::from_secs(5)),
        poll_interval: Duration::from_millis(5),
    }
}

fn setup(transport: MemoryTransport) -> (ChannelManager, MultiChannel) {
    let mgr = ChannelManager::new(transport, config());
    let a = Channel::new(RequestTemplate::get("http://a.test/"));
    let b = Channel::new(RequestTemplate::get("http://b.test/"));
    mgr.add_channel(&a).unwrap();
    mgr.add_channel(&b).unwrap();
    let multi = MultiChannel::new(vec![("a", a), ("b", b)]).unwrap();
    (mgr, multi)
}

#[test]
fn broadcast_gathers_one_response_per_channel() {
    let (_mgr, multi) = setup(MemoryTransport::echo().with_order(CompletionOrder::Lifo));
    let id = multi.add_job("payload", None, None).unwrap();
    assert_eq!(multi.pending_len(), 1);
    assert!(!multi.is_finished(Some(&id)));

    let parts = multi.fetch(Some(&id)).unwrap().unwrap();
    assert_eq!(parts.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    assert_eq!(parts["a"].text(), "http://a.test/?payload");
    assert_eq!(parts["b"].text(), "http://b.test/?payload");
    assert_eq!(multi.pending_len(), 0);
    assert!(matches!(multi.fetch(Some(&id)), Err(Error::JobNotFound(_))));
}

#[test]
fn aggregate_handler_fires_once_per_logical_job() {
    let (_mgr, multi) = setup(MemoryTransport::echo().with_batch(1));
    let calls = Rc::new(RefCell::new(Vec::new()));
    let log = calls.clone();
    multi.set_response_handler(move |parts, _, job| {
        assert_eq!(parts.len(), 2);
        log.borrow_mut().push(job.clone());
    });

    for body in ["x", "y", "z"] {
        multi.add_job(body, None, None).unwrap();
    }
    multi.finish().unwrap();

    let mut seen = calls.borrow().clone();
    seen.sort();
    assert_eq!(seen, vec![JobId::Auto(0), JobId::Auto(1), JobId::Auto(2)]);
    assert_eq!(multi.finished_len(), 0);
    assert!(multi.is_finished(None));
}

#[test]
fn one_failed_part_routes_aggregate_to_error_handler() {
    let transport = MemoryTransport::new(|req| {
        if req.url.contains("b.test") {
            RawResult::status(503)
        } else {
            RawResult::status(200)
        }
    });
    let (_mgr, multi) = setup(transport);
    let errors = Rc::new(Cell::new(0));
    let ok = Rc::new(Cell::new(0));
    let (e, o) = (errors.clone(), ok.clone());
    multi.set_error_handler(move |parts, _, _| {
        assert_eq!(parts["b"].status(), 503);
        assert!(parts["a"].is_ok());
        e.set(e.get() + 1);
    });
    multi.set_response_handler(move |_, _, _| o.set(o.get() + 1));

    multi.add_job("q", None, None).unwrap();
    multi.finish().unwrap();
    assert_eq!(errors.get(), 1);
    assert_eq!(ok.get(), 0);
}

#[test]
fn unnamed_fetch_drains_every_logical_job() {
    let (_mgr, multi) = setup(MemoryTransport::echo().with_batch(1));
    let first = multi.add_job("1", None, None).unwrap();
    let second = multi.add_job("2", None, Some("second".into())).unwrap();

    let mut got = Vec::new();
    while let Some(parts) = multi.fetch(None).unwrap() {
        assert_eq!(parts.len(), 2);
        got.push(parts["a"].job().clone());
    }
    assert_eq!(got.len(), 2);
    assert_eq!(multi.pending_len(), 0);
    assert!(!multi.is_finished(Some(&first)));
    assert!(!multi.is_finished(Some(&second)));
}

#[test]
fn per_channel_payload_targets_named_channels_only() {
    let (_mgr, multi) = setup(MemoryTransport::echo());
    let mut split = BTreeMap::new();
    split.insert("b".to_string(), Payload::from("only-b"));
    let id = multi.add_job(split, None, None).unwrap();

    let parts = multi.fetch(Some(&id)).unwrap().unwrap();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts["b"].text(), "http://b.test/?only-b");

    let mut bad = BTreeMap::new();
    bad.insert("nope".to_string(), Payload::from("x"));
    assert!(matches!(
        multi.add_job(bad, None, None),
        Err(Error::UnknownChannel(_))
    ));
    assert_eq!(multi.pending_len(), 0);
}

#[test]
fn custom_dispatch_controls_the_split() {
    let (_mgr, multi) = setup(MemoryTransport::echo());
    multi.set_dispatch_function(|payload, names| {
        let MultiPayload::Broadcast(Payload::Body(text)) = payload else {
            return Err(Error::InvalidJobData("plain broadcast only".into()));
        };
        Ok(names
            .iter()
            .map(|n| (n.clone(), Payload::body(format!("{}-{}", n, text))))
            .collect())
    });
    let id = multi.add_job("v", None, None).unwrap();
    let parts = multi.fetch(Some(&id)).unwrap().unwrap();
    assert_eq!(parts["a"].text(), "http://a.test/?a-v");
    assert_eq!(parts["b"].text(), "http://b.test/?b-v");

    assert!(matches!(
        multi.add_job(MultiPayload::PerChannel(BTreeMap::new()), None, None),
        Err(Error::InvalidJobData(_))
    ));
}

#[test]
fn fetch_job_bypasses_aggregate_index() {
    let (_mgr, multi) = setup(MemoryTransport::echo().with_order(CompletionOrder::Lifo));
    let handled = Rc::new(Cell::new(false));
    let flag = handled.clone();
    multi.set_response_handler(move |_, _, _| flag.set(true));

    let parts = multi.fetch_job("direct", None).unwrap();
    assert_eq!(parts.len(), 2);
    assert_eq!(parts["a"].text(), "http://a.test/?direct");
    assert!(!handled.get());
    assert_eq!(multi.pending_len(), 0);
}

#[test]
fn duplicate_names_are_rejected() {
    let a = Channel::new(RequestTemplate::get("http://a.test/"));
    let b = Channel::new(RequestTemplate::get("http://b.test/"));
    let err = MultiChannel::new(vec![("x", a), ("x", b)]).unwrap_err();
    assert!(matches!(err, Error::DuplicateChannel(ref n) if n == "x"));

    let (_mgr, multi) = setup(MemoryTransport::echo());
    multi.add_job("1", None, Some("job".into())).unwrap();
    assert!(matches!(
        multi.add_job("2", None, Some("job".into())),
        Err(Error::DuplicateJob(_))
    ));
}

#[test]
fn add_jobs_broadcasts_each_entry() {
    let (_mgr, multi) = setup(MemoryTransport::echo());
    let ids = multi
        .add_jobs(JobBatch::Auto(vec![Payload::from("1"), Payload::from("2")]), None)
        .unwrap();
    assert_eq!(ids, vec![JobId::Auto(0), JobId::Auto(1)]);
    assert_eq!(multi.channel("a").unwrap().running_len(), 2);
    multi.finish().unwrap();
    assert_eq!(multi.finished_len(), 2);
}

#[test]
fn channel_names_keep_construction_order() {
    let (_mgr, multi) = setup(MemoryTransport::echo());
    assert_eq!(multi.channel_names(), vec!["a".to_string(), "b".to_string()]);
    assert!(multi.channel("c").is_none());
}

fn split_managers(b_manager: &ChannelManager) -> (ChannelManager, MultiChannel) {
    let mgr = ChannelManager::new(MemoryTransport::echo(), config());
    let a = Channel::new(RequestTemplate::get("http://a.test/"));
    let b = Channel::new(RequestTemplate::get("http://b.test/"));
    mgr.add_channel(&a).unwrap();
    b_manager.add_channel(&b).unwrap();
    let multi = MultiChannel::new(vec![("a", a), ("b", b)]).unwrap();
    (mgr, multi)
}

#[test]
fn unbuildable_part_still_completes_the_aggregate() {
    let mgr = ChannelManager::new(MemoryTransport::echo(), config());
    let a = Channel::new(RequestTemplate::get("http://a.test/"));
    let b = Channel::new(RequestTemplate::get("not a url"));
    mgr.add_channel(&a).unwrap();
    mgr.add_channel(&b).unwrap();
    let multi = MultiChannel::new(vec![("a", a), ("b", b)]).unwrap();

    let id = multi.add_job("payload", None, None).unwrap();
    let parts = multi.fetch(Some(&id)).unwrap().unwrap();
    assert!(parts["a"].is_ok());
    assert!(parts["b"].is_fatal());
    assert_eq!(parts["b"].failure().map(|f| f.kind), Some(FailureKind::Invalid));
    assert_eq!(multi.pending_len(), 0);
}

#[test]
fn failed_admission_withdraws_the_logical_job() {
    let refusing = ChannelManager::new(Refusing, config());
    let (mgr, multi) = split_managers(&refusing);

    let err = multi.add_job("payload", None, Some("fan".into())).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(multi.pending_len(), 0);
    assert_eq!(multi.channel("b").unwrap().queued_len(), 0);
    assert!(multi.inner.borrow().sub_jobs.is_empty());

    // The part already running on `a` finishes unobserved.
    mgr.run_until_idle().unwrap();
    assert_eq!(multi.finished_len(), 0);
    assert!(matches!(
        multi.fetch(Some(&"fan".into())),
        Err(Error::JobNotFound(_))
    ));
}

#[test]
fn failed_fetch_job_forgets_its_sub_jobs() {
    let broken = ChannelManager::new(Broken::default(), config());
    let (mgr, multi) = split_managers(&broken);

    let err = multi.fetch_job("payload", None).unwrap_err();
    assert!(err.is_fatal());
    assert!(multi.inner.borrow().direct.is_empty());
    assert!(multi.inner.borrow().direct_results.is_empty());

    mgr.run_until_idle().unwrap();
    assert!(multi.inner.borrow().direct_results.is_empty());
    assert_eq!(multi.pending_len(), 0);
}

#[test]
fn fetch_job_needs_every_channel_registered() {
    let mgr = ChannelManager::new(MemoryTransport::echo(), config());
    let a = Channel::new(RequestTemplate::get("http://a.test/"));
    let b = Channel::new(RequestTemplate::get("http://b.test/"));
    mgr.add_channel(&a).unwrap();
    let multi = MultiChannel::new(vec![("a", a.clone()), ("b", b)]).unwrap();

    assert!(matches!(multi.fetch_job("x", None), Err(Error::Unregistered)));
    assert_eq!(a.queued_len() + a.running_len(), 0);
    assert!(multi.inner.borrow().direct.is_empty());
}
