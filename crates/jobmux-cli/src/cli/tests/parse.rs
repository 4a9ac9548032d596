use std::path::PathBuf;

use clap::Parser;

use super::*;

#[test]
fn get_collects_urls_and_flags() {
    match parse(&[
        "jobmux",
        "get",
        "http://a.test/",
        "http://b.test/",
        "--threads",
        "2",
        "--total",
        "5",
        "-L",
    ]) {
        CliCommand::Get {
            urls,
            threads,
            total,
            timeout,
            follow,
        } => {
            assert_eq!(urls, vec!["http://a.test/", "http://b.test/"]);
            assert_eq!(threads, Some(2));
            assert_eq!(total, Some(5));
            assert_eq!(timeout, None);
            assert!(follow);
        }
        _ => panic!("expected Get"),
    }
}

#[test]
fn get_requires_a_url() {
    assert!(Cli::try_parse_from(["jobmux", "get"]).is_err());
}

#[test]
fn run_takes_a_path() {
    match parse(&["jobmux", "run", "jobs.toml"]) {
        CliCommand::Run { file } => assert_eq!(file, PathBuf::from("jobs.toml")),
        _ => panic!("expected Run"),
    }
}

#[test]
fn scatter_repeats_endpoints() {
    match parse(&[
        "jobmux",
        "scatter",
        "q=1",
        "-e",
        "a=http://a.test/",
        "--endpoint",
        "b=http://b.test/",
    ]) {
        CliCommand::Scatter {
            payload,
            endpoints,
            post,
        } => {
            assert_eq!(payload, "q=1");
            assert_eq!(endpoints, vec!["a=http://a.test/", "b=http://b.test/"]);
            assert!(!post);
        }
        _ => panic!("expected Scatter"),
    }
}

#[test]
fn scatter_requires_an_endpoint() {
    assert!(Cli::try_parse_from(["jobmux", "scatter", "q=1"]).is_err());
}

#[test]
fn completions_parse_shell() {
    match parse(&["jobmux", "completions", "zsh"]) {
        CliCommand::Completions { shell } => assert_eq!(shell, clap_complete::Shell::Zsh),
        _ => panic!("expected Completions"),
    }
    assert!(Cli::try_parse_from(["jobmux", "completions", "tcsh"]).is_err());
}

#[test]
fn config_and_man_take_no_arguments() {
    assert!(matches!(parse(&["jobmux", "config"]), CliCommand::Config));
    assert!(matches!(parse(&["jobmux", "man"]), CliCommand::Man));
}
