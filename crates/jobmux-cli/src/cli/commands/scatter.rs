//! `jobmux scatter` – send one payload to several endpoints and gather the results.

use anyhow::{anyhow, Context, Result};
use jobmux_core::config::MuxConfig;
use jobmux_core::{Channel, ChannelManager, MultiChannel, RequestTemplate};

use super::result_line;

/// Split `NAME=URL` at the first `=`.
pub(crate) fn parse_endpoint(spec: &str) -> Result<(String, String)> {
    let (name, url) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("endpoint {:?} is not NAME=URL", spec))?;
    let name = name.trim();
    let url = url.trim();
    if name.is_empty() || url.is_empty() {
        return Err(anyhow!("endpoint {:?} is not NAME=URL", spec));
    }
    Ok((name.to_string(), url.to_string()))
}

pub fn run_scatter(cfg: &MuxConfig, payload: &str, endpoints: &[String], post: bool) -> Result<()> {
    let mgr = ChannelManager::with_curl(cfg);
    let mut channels = Vec::with_capacity(endpoints.len());
    for spec in endpoints {
        let (name, url) = parse_endpoint(spec)?;
        let template = if post {
            RequestTemplate::post(url)
        } else {
            RequestTemplate::get(url)
        };
        let channel = Channel::from_config(template, cfg);
        mgr.add_channel(&channel)
            .with_context(|| format!("register endpoint {:?}", name))?;
        channels.push((name, channel));
    }

    let multi = MultiChannel::new(channels)?;
    let id = multi.add_job(payload, None, None)?;
    let parts = multi
        .fetch(Some(&id))?
        .ok_or_else(|| anyhow!("scatter job {} produced no result", id))?;

    for (name, resp) in &parts {
        println!("{}", result_line(resp, name));
    }
    Ok(())
}
