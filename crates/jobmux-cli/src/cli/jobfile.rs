//! TOML job files for `jobmux run`.
//!
//! ```toml
//! total_thread_limit = 4
//!
//! [[channel]]
//! name = "search"
//! url = "https://example.org/search"
//! priority = 3.0
//! jobs = [{ q = "rust" }, { q = "curl" }]
//!
//! [[channel]]
//! name = "submit"
//! url = "https://example.org/submit"
//! method = "POST"
//! jobs = { first = "a=1", second = "a=2" }
//! ```
//!
//! `jobs` follows the batch rules of the core crate: an array gives
//! automatically named jobs, a table gives named ones.

use anyhow::{bail, Context, Result};
use jobmux_core::{JobBatch, Method, RequestTemplate};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct JobFile {
    /// Overrides the configured global cap for this run.
    #[serde(default)]
    pub total_thread_limit: Option<usize>,
    #[serde(rename = "channel", default)]
    pub channels: Vec<ChannelSpec>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub method: Method,
    #[serde(default)]
    pub priority: Option<f64>,
    #[serde(default)]
    pub thread_limit: Option<usize>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub follow_redirects: bool,
    #[serde(default)]
    pub jobs: serde_json::Value,
}

impl ChannelSpec {
    pub fn template(&self) -> RequestTemplate {
        let mut template = RequestTemplate::new(self.method, self.url.clone())
            .follow_redirects(self.follow_redirects);
        for (name, value) in &self.headers {
            template = template.header(name.clone(), value.clone());
        }
        if let Some(secs) = self.timeout_secs {
            template = template.timeout(Duration::from_secs(secs));
        }
        template
    }

    pub fn batch(&self) -> Result<JobBatch> {
        if self.jobs.is_null() {
            return Ok(JobBatch::Auto(Vec::new()));
        }
        JobBatch::try_from(self.jobs.clone())
            .with_context(|| format!("channel {:?}: bad jobs", self.name))
    }
}

impl JobFile {
    fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            bail!("job file declares no [[channel]] entries");
        }
        let mut seen = HashSet::new();
        for ch in &self.channels {
            if ch.name.trim().is_empty() {
                bail!("channel with url {} has an empty name", ch.url);
            }
            if !seen.insert(ch.name.as_str()) {
                bail!("duplicate channel name {:?}", ch.name);
            }
        }
        Ok(())
    }
}

pub fn parse(data: &str) -> Result<JobFile> {
    let file: JobFile = toml::from_str(data).context("parse job file")?;
    file.validate()?;
    Ok(file)
}

pub fn load(path: &Path) -> Result<JobFile> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("read job file {}", path.display()))?;
    parse(&data).with_context(|| format!("in {}", path.display()))
}
