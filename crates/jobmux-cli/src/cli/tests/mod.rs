use super::*;

mod parse;

pub(super) fn parse(args: &[&str]) -> CliCommand {
    Cli::try_parse_from(args).unwrap().command
}
