//! Tests for the `add` and `run` subcommands.

use super::parse;
use crate::cli::CliCommand;

#[test]
fn cli_parse_add_minimal() {
    match parse(&["dlkit", "add", "https://example.com/file.iso"]) {
        CliCommand::Add { url, destination, connections, speed_limit, schedule_in, .. } => {
            assert_eq!(url, "https://example.com/file.iso");
            assert!(destination.is_none());
            assert_eq!(connections, 0);
            assert!(speed_limit.is_none());
            assert!(schedule_in.is_none());
        }
        _ => panic!("expected Add"),
    }
}

#[test]
fn cli_parse_add_with_flags() {
    match parse(&[
        "dlkit",
        "add",
        "https://example.com/x",
        "--destination",
        "/tmp",
        "--connections",
        "8",
        "--priority",
        "high",
        "--speed-limit",
        "500k",
        "--schedule-in",
        "3600",
        "--wifi-only",
    ]) {
        CliCommand::Add {
            url,
            destination,
            connections,
            speed_limit,
            schedule_in,
            wifi_only,
            ..
        } => {
            assert_eq!(url, "https://example.com/x");
            assert_eq!(destination.as_deref(), Some(std::path::Path::new("/tmp")));
            assert_eq!(connections, 8);
            assert_eq!(speed_limit.as_deref(), Some("500k"));
            assert_eq!(schedule_in, Some(3600));
            assert!(wifi_only);
        }
        _ => panic!("expected Add with flags"),
    }
}

#[test]
fn cli_parse_run_defaults() {
    match parse(&["dlkit", "run"]) {
        CliCommand::Run { interval_ms } => assert_eq!(interval_ms, 500),
        _ => panic!("expected Run"),
    }
}

#[test]
fn cli_parse_run_interval() {
    match parse(&["dlkit", "run", "--interval-ms", "100"]) {
        CliCommand::Run { interval_ms } => assert_eq!(interval_ms, 100),
        _ => panic!("expected Run with --interval-ms"),
    }
}
