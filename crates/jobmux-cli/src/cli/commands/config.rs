//! `jobmux config` – show where the config lives and what it holds.

use anyhow::Result;
use jobmux_core::config::{self, MuxConfig};

pub fn run_config(cfg: &MuxConfig) -> Result<()> {
    let path = config::config_path()?;
    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(cfg)?);
    Ok(())
}
