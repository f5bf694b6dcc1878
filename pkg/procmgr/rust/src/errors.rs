// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("failed to spawn '{command}' in '{cwd}': {source}")]
    Spawn {
        command: String,
        cwd: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to execute '{command}' in '{cwd}': {}", .reasons.join(", "))]
    Failed {
        command: String,
        cwd: String,
        reasons: Vec<String>,
    },
    #[error("i/o error while running '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ProcessTableError {
    #[error("failed to run process enumeration '{command}': {source}")]
    Enumerate {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("process enumeration '{command}' exited with {status}")]
    Status { command: String, status: String },
}

/// Why the worker pool stopped before its budget was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Timeout(Duration),
    Failure,
    Interrupted,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Timeout(t) => write!(f, "<<<< Timeout ({}s) >>>>", t.as_secs_f64()),
            AbortReason::Failure => write!(f, "<<<< FAILURE >>>>"),
            AbortReason::Interrupted => write!(f, "<<<< Keyboard Interrupt >>>>"),
        }
    }
}

/// Errors and captured output of one worker slot.
#[derive(Debug, Clone)]
pub struct SlotFailure {
    pub worker: usize,
    pub command: Option<String>,
    pub errors: Vec<String>,
    pub output: Vec<String>,
}

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("no command was executed")]
    NoCommand,
    #[error("the worker pool needs at least one job")]
    NoJobs,
    #[error("{}", describe_abort(.reason, .failures))]
    Aborted {
        reason: Option<AbortReason>,
        failures: Vec<SlotFailure>,
    },
}

fn describe_abort(reason: &Option<AbortReason>, failures: &[SlotFailure]) -> String {
    let causes: Vec<String> = failures
        .iter()
        .map(|f| format!("worker #{}: {}", f.worker, f.errors.join(", ")))
        .collect();
    match reason {
        Some(reason) if causes.is_empty() => reason.to_string(),
        Some(reason) => format!("{reason} {}", causes.join("; ")),
        None => causes.join("; "),
    }
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("[{app_id}] supervisor exited with {status} during start: {log_tail}")]
    StartFailed {
        app_id: String,
        status: String,
        log_tail: String,
    },
    #[error("[{app_id}] crash loop: {failures} failures within {window:?} of start, last exit {last_status}")]
    CrashLoop {
        app_id: String,
        failures: u32,
        window: Duration,
        last_status: String,
    },
    #[error("[{app_id}] giving up after {attempts} consecutive spawn failures: {source}")]
    SpawnRetriesExhausted {
        app_id: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid application id '{0}'")]
    InvalidAppId(String),
    #[error("empty command for application '{0}'")]
    EmptyCommand(String),
    #[error(transparent)]
    ProcessTable(#[from] ProcessTableError),
    #[error("[{app_id}] failed to terminate pid(s) {pids:?}")]
    Terminate { app_id: String, pids: Vec<u32> },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_failed_message() {
        let err = ShellError::Failed {
            command: "false".into(),
            cwd: ".".into(),
            reasons: vec!["stalled".into(), "return.code=1".into()],
        };
        assert_eq!(
            err.to_string(),
            "Failed to execute 'false' in '.': stalled, return.code=1"
        );
    }

    #[test]
    fn test_aborted_lists_every_slot() {
        let err = ExecutorError::Aborted {
            reason: Some(AbortReason::Timeout(Duration::from_secs(3))),
            failures: vec![
                SlotFailure {
                    worker: 0,
                    command: Some("sleep 10".into()),
                    errors: vec!["Timeout (3s) on 'sleep 10'".into()],
                    output: vec![],
                },
                SlotFailure {
                    worker: 2,
                    command: None,
                    errors: vec!["Cannot terminate process".into()],
                    output: vec![],
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("<<<< Timeout (3s) >>>>"));
        assert!(msg.contains("worker #0: Timeout (3s) on 'sleep 10'"));
        assert!(msg.contains("worker #2: Cannot terminate process"));
    }
}
