// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(dead_code)]

use irapp::{AppStatus, Supervisor};
use nix::sys::signal;
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

pub fn irapp_bin() -> PathBuf {
    let bin = Path::new(env!("CARGO_BIN_EXE_irapp"));
    // The binary identifies itself through its canonical path.
    std::fs::canonicalize(bin).unwrap_or_else(|_| bin.to_path_buf())
}

/// A scratch project: a directory holding `.irapp.json` and the log root.
pub struct Project {
    dir: tempfile::TempDir,
    apps: Vec<String>,
}

impl Project {
    /// `deploy` is the JSON value of the `deploy` key.
    pub fn new(deploy: serde_json::Value) -> Self {
        let dir = tempfile::tempdir().expect("failed to create project dir");
        let config = serde_json::json!({
            "log": "logs",
            "deploy": deploy,
        });
        std::fs::write(dir.path().join(".irapp.json"), config.to_string())
            .expect("failed to write config");
        let apps = match config.get("deploy") {
            Some(serde_json::Value::Object(map)) => map.keys().cloned().collect(),
            Some(serde_json::Value::Null) | None => Vec::new(),
            _ => vec!["default".to_string()],
        };
        Self { dir, apps }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn log_root(&self) -> PathBuf {
        self.dir.path().join("logs")
    }

    /// Run the CLI against this project's configuration.
    pub fn irapp(&self, args: &[&str]) -> Output {
        let output = Command::new(irapp_bin())
            .arg("-c")
            .arg(self.dir.path().join(".irapp.json"))
            .args(args)
            .current_dir(self.dir.path())
            .env("IRAPP_LOG_LEVEL", "debug")
            .env_remove("IRAPP_LOG_DIR")
            .output()
            .expect("failed to run irapp");
        eprintln!("[irapp {}] {}", args.join(" "), output.status);
        eprintln!("{}", String::from_utf8_lossy(&output.stdout));
        eprintln!("{}", String::from_utf8_lossy(&output.stderr));
        output
    }

    /// Status of `app` queried in-process, the way the CLI does it.
    pub fn status(&self, app: &str) -> Vec<AppStatus> {
        Supervisor::with_entry_point(self.log_root(), irapp_bin())
            .status(app)
            .expect("status failed")
    }

    /// Processes of the supervised command (not its supervisor).
    pub fn children(&self, app: &str) -> Vec<AppStatus> {
        self.status(app).into_iter().filter(|s| !s.supervisor).collect()
    }

    /// The intermediary supervising `app`.
    pub fn supervisor_of(&self, app: &str) -> Option<AppStatus> {
        self.status(app).into_iter().find(|s| s.supervisor)
    }

    /// The supervised command once its log directory metadata is written.
    pub fn wait_for_child(&self, app: &str) -> Option<AppStatus> {
        wait_for(DEFAULT_TIMEOUT, || {
            self.children(app).into_iter().find(|s| s.restart.is_some())
        })
    }
}

impl Drop for Project {
    fn drop(&mut self) {
        let supervisor = Supervisor::with_entry_point(self.log_root(), irapp_bin());
        let Ok(runtime) = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        else {
            return;
        };
        for app in &self.apps {
            let _ = runtime.block_on(supervisor.stop(app));
        }
    }
}

/// A per-test application id, so that concurrently running tests never
/// address each other's supervisors.
pub fn unique_app(name: &str) -> String {
    format!("{name}-{}", std::process::id())
}

pub fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

pub fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Poll `check` until it returns `Some`, or give up after `timeout`.
pub fn wait_for<T>(timeout: Duration, mut check: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = check() {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

/// Check if a PID is still alive.
pub fn pid_is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Wait until a PID is no longer alive, or timeout.
pub fn wait_for_pid_gone(pid: u32, timeout: Duration) -> bool {
    wait_for(timeout, || (!pid_is_alive(pid)).then_some(())).is_some()
}
