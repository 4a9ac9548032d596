//! CLI for the jobmux request multiplexer.

mod commands;
mod jobfile;

use anyhow::Result;
use clap::{Parser, Subcommand};
use jobmux_core::config;
use std::path::PathBuf;

use commands::{
    run_completions, run_config, run_get, run_jobfile, run_man, run_scatter, GetOptions,
};

/// Top-level CLI for jobmux.
#[derive(Debug, Parser)]
#[command(name = "jobmux")]
#[command(about = "jobmux: prioritized, concurrency-capped HTTP job multiplexer", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Fetch one or more URLs concurrently and print `status bytes url` per result.
    Get {
        /// URLs to fetch; each gets its own channel.
        #[arg(required = true)]
        urls: Vec<String>,
        /// Per-channel concurrency cap (default from config).
        #[arg(long, value_name = "N")]
        threads: Option<usize>,
        /// Global concurrency cap (default from config).
        #[arg(long, value_name = "N")]
        total: Option<usize>,
        /// Per-request timeout in seconds.
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
        /// Follow HTTP redirects.
        #[arg(long, short = 'L')]
        follow: bool,
    },

    /// Run every job declared in a TOML job file.
    Run {
        /// Path to the job file.
        file: PathBuf,
    },

    /// Send one payload to several endpoints and print the gathered results.
    Scatter {
        /// Payload (query string for GET, body for POST).
        payload: String,
        /// Target endpoint as NAME=URL; repeat for each endpoint.
        #[arg(long = "endpoint", short = 'e', value_name = "NAME=URL", required = true)]
        endpoints: Vec<String>,
        /// Send the payload as a POST body instead of a GET query.
        #[arg(long)]
        post: bool,
    },

    /// Show the config file path and the effective configuration.
    Config,

    /// Print a shell completion script.
    Completions {
        /// Target shell.
        shell: clap_complete::Shell,
    },

    /// Print the man page (roff) to stdout.
    Man,
}

impl CliCommand {
    pub fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Completions { shell } => return run_completions(shell),
            CliCommand::Man => return run_man(),
            _ => {}
        }

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Get {
                urls,
                threads,
                total,
                timeout,
                follow,
            } => {
                let opts = GetOptions {
                    threads,
                    total,
                    timeout,
                    follow,
                };
                run_get(&cfg, &urls, &opts)?;
            }
            CliCommand::Run { file } => run_jobfile(&cfg, &file)?,
            CliCommand::Scatter {
                payload,
                endpoints,
                post,
            } => run_scatter(&cfg, &payload, &endpoints, post)?,
            CliCommand::Config => run_config(&cfg)?,
            CliCommand::Completions { .. } | CliCommand::Man => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
