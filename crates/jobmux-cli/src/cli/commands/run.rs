//! `jobmux run <file>` – execute every job declared in a TOML job file.

use anyhow::{Context, Result};
use jobmux_core::config::MuxConfig;
use jobmux_core::{Channel, ChannelManager};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use super::result_line;
use crate::cli::jobfile;

/// Per-channel tally of finished jobs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Tally {
    ok: usize,
    failed: usize,
}

fn summary_line(name: &str, tally: Tally) -> String {
    format!("{}: {} ok, {} failed", name, tally.ok, tally.failed)
}

pub fn run_jobfile(cfg: &MuxConfig, path: &Path) -> Result<()> {
    let file = jobfile::load(path)?;
    let cap = file.total_thread_limit.unwrap_or(cfg.total_thread_limit);

    // Start closed so the first admission pass sees every channel's queue
    // and shares the cap by priority.
    let mgr = ChannelManager::with_curl(cfg);
    mgr.set_total_thread_limit(0)?;

    let tallies: Rc<RefCell<BTreeMap<String, Tally>>> = Rc::new(RefCell::new(BTreeMap::new()));
    let mut total_jobs = 0;

    for spec in &file.channels {
        let channel = Channel::with_limits(
            spec.template(),
            spec.priority.unwrap_or(cfg.priority),
            spec.thread_limit.unwrap_or(cfg.thread_limit),
        );
        let name = spec.name.clone();
        let counts = tallies.clone();
        counts.borrow_mut().insert(name.clone(), Tally::default());
        channel.set_response_handler(move |resp, _, job| {
            println!("{}", result_line(&resp, &format!("{}/{}", name, job)));
            let mut counts = counts.borrow_mut();
            let tally = counts.entry(name.clone()).or_default();
            if resp.is_error() {
                tally.failed += 1;
            } else {
                tally.ok += 1;
            }
        });

        mgr.add_channel(&channel)
            .with_context(|| format!("register channel {:?}", spec.name))?;
        let ids = channel
            .add_jobs(spec.batch()?, None)
            .with_context(|| format!("queue jobs for channel {:?}", spec.name))?;
        total_jobs += ids.len();
    }

    tracing::info!(
        "running {} job(s) over {} channel(s), cap {}",
        total_jobs,
        file.channels.len(),
        cap
    );
    mgr.set_total_thread_limit(cap)?;
    mgr.run_until_idle()?;

    for (name, tally) in tallies.borrow().iter() {
        println!("{}", summary_line(name, *tally));
    }
    Ok(())
}
