// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![cfg(unix)]

mod helpers;

use helpers::{DEFAULT_TIMEOUT, Project, stderr_of, unique_app, wait_for, wait_for_pid_gone};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde_json::json;
use std::time::Duration;

#[test]
fn test_start_twice_leaves_one_tree() {
    let app = unique_app("twice");
    let project = Project::new(json!({ &app: "sleep 300" }));

    assert!(project.irapp(&["start", &app]).status.success());
    let first = project
        .wait_for_child(&app)
        .expect("first instance should spawn its command");

    assert!(project.irapp(&["start", &app]).status.success());
    assert!(
        wait_for_pid_gone(first.pid, Duration::from_secs(5)),
        "the previous instance should be stopped"
    );
    let second = project
        .wait_for_child(&app)
        .expect("second instance should spawn its command");
    assert_ne!(first.pid, second.pid);

    let status = project.status(&app);
    assert_eq!(status.iter().filter(|s| s.supervisor).count(), 1);
    assert_eq!(status.iter().filter(|s| !s.supervisor).count(), 1);
}

#[test]
fn test_killed_child_is_restarted() {
    let app = unique_app("restart");
    let project = Project::new(json!({ &app: "sleep 300" }));
    assert!(project.irapp(&["start", &app]).status.success());

    let child = project
        .wait_for_child(&app)
        .expect("command should be running");
    assert_eq!(child.restart, Some(0));

    signal::kill(Pid::from_raw(child.pid as i32), Signal::SIGKILL).unwrap();

    let restarted = wait_for(DEFAULT_TIMEOUT, || {
        project
            .children(&app)
            .into_iter()
            .find(|s| s.pid != child.pid && s.restart == Some(1))
    })
    .expect("command should be restarted with its counter bumped once");
    assert!(restarted.uptime.is_some());

    // The restart reuses the supervisor's log directory instead of adding one.
    let supervisor = project
        .supervisor_of(&app)
        .expect("supervisor should still run");
    let app_logs = project.log_root().join(&app);
    assert!(app_logs.join(supervisor.pid.to_string()).join(".metadata.json").is_file());
    assert!(!app_logs.join(child.pid.to_string()).exists());
    assert!(!app_logs.join(restarted.pid.to_string()).exists());
    assert!(app_logs.join("supervisor.log").is_file());
}

#[test]
fn test_stop_then_status_is_empty() {
    let app = unique_app("stop");
    let project = Project::new(json!({ &app: ["sh", "-c", "echo ready; exec sleep 300"] }));
    assert!(project.irapp(&["start", &app]).status.success());

    let child = project
        .wait_for_child(&app)
        .expect("command should be running");
    let supervisor = project
        .supervisor_of(&app)
        .expect("supervisor should be running");
    let stdout_log = project
        .log_root()
        .join(&app)
        .join(supervisor.pid.to_string())
        .join("stdout.00000000.log");
    assert!(
        wait_for(DEFAULT_TIMEOUT, || {
            std::fs::read_to_string(&stdout_log)
                .ok()
                .filter(|s| s.contains("ready"))
        })
        .is_some(),
        "command output should reach its rotating log"
    );

    let output = project.irapp(&["stop", &app]);
    assert!(output.status.success());
    assert!(project.status(&app).is_empty());
    assert!(wait_for_pid_gone(child.pid, Duration::from_secs(5)));

    // Stopping again is a no-op.
    assert!(project.irapp(&["stop", &app]).status.success());
}

#[test]
fn test_crash_loop_fails_start() {
    let app = unique_app("crash");
    let project = Project::new(json!({ &app: ["sh", "-c", "echo boom >&2; exit 1"] }));

    let output = project.irapp(&["start", &app]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("during start"), "{stderr}");
    assert!(stderr.contains("crash loop"), "{stderr}");
    assert!(project.status(&app).is_empty());
}

#[test]
fn test_unknown_app_is_error() {
    let project = Project::new(json!({ unique_app("known"): "sleep 1" }));
    let output = project.irapp(&["status", "unknown-app"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr_of(&output).contains("Unknown application ID 'unknown-app'"));
}
