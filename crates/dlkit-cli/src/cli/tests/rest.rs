//! Tests for status, pause, resume, remove, set-priority, checksum.

use super::parse;
use crate::cli::{CliCommand, PriorityArg};

#[test]
fn cli_parse_status() {
    match parse(&["dlkit", "status"]) {
        CliCommand::Status => {}
        _ => panic!("expected Status"),
    }
}

#[test]
fn cli_parse_pause() {
    match parse(&["dlkit", "pause", "t1"]) {
        CliCommand::Pause { task_id } => assert_eq!(task_id, "t1"),
        _ => panic!("expected Pause"),
    }
}

#[test]
fn cli_parse_resume() {
    match parse(&["dlkit", "resume", "t1"]) {
        CliCommand::Resume { task_id, destination } => {
            assert_eq!(task_id, "t1");
            assert!(destination.is_none());
        }
        _ => panic!("expected Resume"),
    }
}

#[test]
fn cli_parse_resume_with_destination() {
    match parse(&["dlkit", "resume", "t1", "--destination", "/tmp"]) {
        CliCommand::Resume { task_id, destination } => {
            assert_eq!(task_id, "t1");
            assert_eq!(destination.as_deref(), Some(std::path::Path::new("/tmp")));
        }
        _ => panic!("expected Resume with --destination"),
    }
}

#[test]
fn cli_parse_remove() {
    match parse(&["dlkit", "remove", "t1"]) {
        CliCommand::Remove { task_id, delete_output } => {
            assert_eq!(task_id, "t1");
            assert!(!delete_output);
        }
        _ => panic!("expected Remove"),
    }
}

#[test]
fn cli_parse_remove_delete_output() {
    match parse(&["dlkit", "remove", "t1", "--delete-output"]) {
        CliCommand::Remove { task_id, delete_output } => {
            assert_eq!(task_id, "t1");
            assert!(delete_output);
        }
        _ => panic!("expected Remove with --delete-output"),
    }
}

#[test]
fn cli_parse_set_priority() {
    match parse(&["dlkit", "set-priority", "t1", "urgent"]) {
        CliCommand::SetPriority { task_id, priority } => {
            assert_eq!(task_id, "t1");
            assert!(matches!(priority, PriorityArg::Urgent));
        }
        _ => panic!("expected SetPriority"),
    }
}

#[test]
fn cli_parse_checksum() {
    match parse(&["dlkit", "checksum", "/path/to/file.bin"]) {
        CliCommand::Checksum { path, expect } => {
            assert_eq!(path, "/path/to/file.bin");
            assert!(expect.is_none());
        }
        _ => panic!("expected Checksum"),
    }
}

#[test]
fn cli_parse_checksum_with_expect() {
    match parse(&["dlkit", "checksum", "/path/to/file.bin", "--expect", "deadbeef"]) {
        CliCommand::Checksum { path, expect } => {
            assert_eq!(path, "/path/to/file.bin");
            assert_eq!(expect, Some("deadbeef".to_string()));
        }
        _ => panic!("expected Checksum"),
    }
}
