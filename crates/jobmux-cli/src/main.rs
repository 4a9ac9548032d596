use jobmux_core::logging;

mod cli;

use crate::cli::CliCommand;

fn main() {
    // Falls back to stderr on its own; a failure here only means no log output.
    if let Err(err) = logging::init_logging() {
        eprintln!("jobmux: logging disabled: {:#}", err);
    }

    if let Err(err) = CliCommand::run_from_args() {
        eprintln!("jobmux error: {:#}", err);
        std::process::exit(1);
    }
}
