//! `jobmux get` – fetch URLs concurrently, one channel per URL.

use anyhow::{Context, Result};
use jobmux_core::config::MuxConfig;
use jobmux_core::{Channel, ChannelManager, RequestTemplate};
use std::time::Duration;

use super::result_line;

/// Overrides taken from the command line.
#[derive(Debug, Default)]
pub struct GetOptions {
    pub threads: Option<usize>,
    pub total: Option<usize>,
    pub timeout: Option<u64>,
    pub follow: bool,
}

fn effective_config(cfg: &MuxConfig, opts: &GetOptions) -> MuxConfig {
    let mut cfg = cfg.clone();
    if let Some(total) = opts.total {
        cfg.total_thread_limit = total;
    }
    if let Some(threads) = opts.threads {
        cfg.thread_limit = threads;
    }
    cfg
}

fn template_for(url: &str, opts: &GetOptions) -> RequestTemplate {
    let mut template = RequestTemplate::get(url).follow_redirects(opts.follow);
    if let Some(secs) = opts.timeout {
        template = template.timeout(Duration::from_secs(secs));
    }
    template
}

pub fn run_get(cfg: &MuxConfig, urls: &[String], opts: &GetOptions) -> Result<()> {
    let cfg = effective_config(cfg, opts);
    let mgr = ChannelManager::with_curl(&cfg);

    for url in urls {
        let channel = Channel::from_config(template_for(url, opts), &cfg);
        let label = url.clone();
        channel.set_response_handler(move |resp, _, _| {
            println!("{}", result_line(&resp, &label));
        });
        mgr.add_channel(&channel)
            .with_context(|| format!("register channel for {}", url))?;
        channel
            .add_job("", None, None)
            .with_context(|| format!("queue request for {}", url))?;
    }

    tracing::debug!("fetching {} url(s), cap {}", urls.len(), cfg.total_thread_limit);
    mgr.run_until_idle()?;
    Ok(())
}
