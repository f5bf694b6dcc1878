// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![cfg(unix)]

mod helpers;

use helpers::{Project, stderr_of, stdout_of};
use regex::Regex;
use serde_json::json;

#[test]
fn test_run_single_command_streams_output() {
    let project = Project::new(json!(null));
    let output = project.irapp(&["run", "--", "echo", "hello"]);
    assert!(output.status.success());
    assert!(stdout_of(&output).contains("hello"));
}

#[test]
fn test_run_iterations_in_parallel() {
    let project = Project::new(json!(null));
    let output = project.irapp(&[
        "run", "-j", "2", "-i", "3", "-c", "touch a", "-c", "touch b",
    ]);
    assert!(output.status.success());
    assert!(project.path().join("a").is_file());
    assert!(project.path().join("b").is_file());
    assert!(stdout_of(&output).contains("6 task(s), 3 iteration(s) completed"));
}

#[test]
fn test_run_failure_exits_one() {
    let project = Project::new(json!(null));
    let output = project.irapp(&["run", "-i", "2", "-c", "true", "-c", "false"]);
    assert_eq!(output.status.code(), Some(1));

    let stderr = stderr_of(&output);
    assert!(stderr.contains("<<<< FAILURE >>>>"), "{stderr}");
    assert!(stderr.contains("Failure cause: Failed to execute 'false'"), "{stderr}");
}

#[test]
fn test_run_ignore_errors() {
    let project = Project::new(json!(null));
    let output = project.irapp(&["run", "--ignore-errors", "-c", "false"]);
    assert!(output.status.success());
}

#[test]
fn test_run_timeout() {
    let project = Project::new(json!(null));
    let output = project.irapp(&["run", "-t", "1", "-c", "sleep 30"]);
    assert_eq!(output.status.code(), Some(1));

    let stderr = stderr_of(&output);
    assert!(stderr.contains("<<<< Timeout (1s) >>>>"), "{stderr}");
    assert!(stderr.contains("Timeout (1s) on 'sleep 30'"), "{stderr}");
}

#[test]
fn test_run_without_command() {
    let project = Project::new(json!(null));
    let output = project.irapp(&["run"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("no command was executed"));
}

#[test]
fn test_log_lines_format() {
    let project = Project::new(json!(null));
    let output = project.irapp(&["run", "-c", "false"]);
    let line = Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2} UTC \| IRAPP \| ERROR \| ").unwrap();
    let stderr = stderr_of(&output);
    assert!(stderr.lines().any(|l| line.is_match(l)), "{stderr}");
}
