use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transport::CurlOptions;

/// Curl transport defaults (optional `[curl]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurlConfig {
    pub connect_timeout_secs: u64,
    /// Whole-request timeout for channels whose template sets none (0 = none).
    pub request_timeout_secs: u64,
    pub max_redirects: u32,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Optional receive cap in bytes per second.
    #[serde(default)]
    pub max_recv_speed: Option<u64>,
    /// Optional per-response body limit in bytes.
    #[serde(default)]
    pub max_body_bytes: Option<usize>,
}

impl Default for CurlConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            request_timeout_secs: 300,
            max_redirects: 10,
            user_agent: None,
            max_recv_speed: None,
            max_body_bytes: None,
        }
    }
}

impl CurlConfig {
    pub fn to_options(&self) -> CurlOptions {
        CurlOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: (self.request_timeout_secs > 0)
                .then(|| Duration::from_secs(self.request_timeout_secs)),
            max_redirects: self.max_redirects,
            user_agent: self.user_agent.clone(),
            max_recv_speed: self.max_recv_speed,
            low_speed_time: None,
            max_body_bytes: self.max_body_bytes,
        }
    }
}

/// Global configuration loaded from `~/.config/jobmux/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuxConfig {
    /// Maximum operations in flight across all channels of one manager.
    pub total_thread_limit: usize,
    /// Default per-channel concurrency cap.
    pub thread_limit: usize,
    /// Default channel priority.
    pub priority: f64,
    /// Deadline for blocking fetch/finish calls; missing = wait without bound.
    #[serde(default)]
    pub wait_timeout_secs: Option<u64>,
    /// Upper bound on one transport poll inside the read loop.
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub curl: Option<CurlConfig>,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            total_thread_limit: 20,
            thread_limit: 10,
            priority: 1.0,
            wait_timeout_secs: Some(300),
            poll_interval_ms: 100,
            curl: None,
        }
    }
}

impl MuxConfig {
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_secs.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn curl_options(&self) -> CurlOptions {
        self.curl.clone().unwrap_or_default().to_options()
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("jobmux")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from `path`, creating it with defaults if missing.
pub fn load_or_init_at(path: &Path) -> Result<MuxConfig> {
    if !path.exists() {
        let default_cfg = MuxConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path)?;
    let cfg: MuxConfig = toml::from_str(&data)?;
    Ok(cfg)
}

/// Load configuration from the XDG config dir, creating a default file if none exists.
pub fn load_or_init() -> Result<MuxConfig> {
    load_or_init_at(&config_path()?)
}
