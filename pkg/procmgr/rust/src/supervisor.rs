// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Long-running application supervision.
//!
//! `start` launches a detached copy of this binary (`<exe> supervise <appId>
//! <logRoot> -- <command...>`). That intermediary runs [`RunLoop`], which
//! spawns the real command, streams its output into rotating logs and
//! restarts it on failure. `stop` and `status` find the intermediary again by
//! its command line and expand it to its process tree.

use crate::command::Command;
use crate::errors::SupervisorError;
use crate::log_factory::{LogFactory, get_metadata};
use crate::process_table::{MatchedProcess, ProcessTable};
use crate::rotating_log::{RotatingLog, RotationPolicy};
use crate::shell::{describe_status, pump_lines};
use crate::shutdown::{DEFAULT_STOP_GRACE, terminate_all};
use crate::state::SupervisorState;
use anyhow::Context;
use log::{debug, error, info, warn};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::SystemTime;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep, timeout};

/// Hidden subcommand that runs the supervision loop.
pub const SUPERVISE_SUBCOMMAND: &str = "supervise";
/// Selects every application in `stop` and `status`.
pub const ALL_APPS: &str = "all";
/// Log file of the intermediary itself, inside `<logRoot>/<appId>`.
pub const SUPERVISOR_LOG: &str = "supervisor.log";

const START_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
const LOG_TAIL_LINES: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct SupervisorPolicy {
    /// How long `start` watches the intermediary before reporting success.
    pub start_grace: Duration,
    /// Pause between attempts when the command cannot be spawned.
    pub spawn_backoff: Duration,
    /// Consecutive spawn failures after which the loop gives up.
    pub max_spawn_failures: u32,
    /// A run shorter than this that exits non-zero is a rapid failure.
    pub rapid_failure_window: Duration,
    /// Rapid failures after which the loop gives up.
    pub max_rapid_failures: u32,
    /// Time between the terminate request and the kill in `stop`.
    pub stop_grace: Duration,
    pub rotation: RotationPolicy,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            start_grace: Duration::from_secs(2),
            spawn_backoff: Duration::from_secs(5),
            max_spawn_failures: 5,
            rapid_failure_window: Duration::from_secs(60),
            max_rapid_failures: 3,
            stop_grace: DEFAULT_STOP_GRACE,
            rotation: RotationPolicy::default(),
        }
    }
}

/// An application launched by [`Supervisor::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisedApp {
    pub app_id: String,
    pub command: Vec<String>,
    /// Pid of the intermediary, not of the command itself.
    pub supervisor_pid: u32,
    pub log_dir: PathBuf,
}

/// One live process belonging to a supervised application.
#[derive(Debug, Clone, PartialEq)]
pub struct AppStatus {
    pub id: String,
    pub pid: u32,
    /// Percent of one core, capped at 100.
    pub cpu: f64,
    pub memory: u64,
    /// Whether this is the intermediary rather than the command or its children.
    pub supervisor: bool,
    pub restart: Option<u64>,
    pub uptime: Option<Duration>,
}

pub struct Supervisor {
    log_root: PathBuf,
    entry_point: PathBuf,
    table: ProcessTable,
    policy: SupervisorPolicy,
}

impl Supervisor {
    /// A supervisor that re-invokes the running executable.
    pub fn new(log_root: impl Into<PathBuf>) -> Result<Self, SupervisorError> {
        let entry_point =
            std::env::current_exe().context("failed to resolve the current executable")?;
        Ok(Self::with_entry_point(log_root, entry_point))
    }

    pub fn with_entry_point(log_root: impl Into<PathBuf>, entry_point: impl Into<PathBuf>) -> Self {
        Self {
            log_root: log_root.into(),
            entry_point: entry_point.into(),
            table: ProcessTable::new(),
            policy: SupervisorPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SupervisorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn log_root(&self) -> &Path {
        &self.log_root
    }

    /// Stop any previous instance of `app_id`, then launch a detached
    /// supervisor for `command` and watch it through the start grace window.
    pub async fn start(
        &self,
        app_id: &str,
        command: &[String],
        cwd: &Path,
    ) -> Result<SupervisedApp, SupervisorError> {
        validate_app_id(app_id)?;
        if command.is_empty() {
            return Err(SupervisorError::EmptyCommand(app_id.to_string()));
        }

        let previous = self.stop(app_id).await?;
        if !previous.is_empty() {
            info!("[{app_id}] replaced running instance (pids {previous:?})");
        }

        let app_dir = self.log_root.join(app_id);
        fs::create_dir_all(&app_dir)
            .with_context(|| format!("failed to create {}", app_dir.display()))?;
        let log_path = app_dir.join(SUPERVISOR_LOG);
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open {}", log_path.display()))?;
        let stderr = stdout
            .try_clone()
            .with_context(|| format!("failed to duplicate {}", log_path.display()))?;

        let mut cmd = std::process::Command::new(&self.entry_point);
        cmd.arg(SUPERVISE_SUBCOMMAND)
            .arg(app_id)
            .arg(&self.log_root)
            .arg("--cwd")
            .arg(cwd)
            .arg("--")
            .args(command)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        detach(&mut cmd);

        let mut child = cmd.spawn().with_context(|| {
            format!("[{app_id}] failed to spawn {}", self.entry_point.display())
        })?;
        let pid = child.id();
        info!("[{app_id}] spawned supervisor (pid={pid}, cmd={})", command.join(" "));

        let deadline = Instant::now() + self.policy.start_grace;
        loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("[{app_id}] failed to poll supervisor {pid}"))?
            {
                if !status.success() {
                    return Err(SupervisorError::StartFailed {
                        app_id: app_id.to_string(),
                        status: describe_status(status),
                        log_tail: log_tail(&log_path, LOG_TAIL_LINES),
                    });
                }
                info!("[{app_id}] completed during start window");
                break;
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(START_POLL_INTERVAL).await;
        }

        Ok(SupervisedApp {
            app_id: app_id.to_string(),
            command: command.to_vec(),
            supervisor_pid: pid,
            log_dir: app_dir,
        })
    }

    /// Terminate the supervisor(s) of `app_id` (or of every app for `"all"`)
    /// and then every process below them. Returns the pids that were signalled.
    pub async fn stop(&self, app_id: &str) -> Result<Vec<u32>, SupervisorError> {
        let found = self.find(app_id)?;
        if found.is_empty() {
            debug!("[{app_id}] nothing to stop");
            return Ok(Vec::new());
        }

        let (roots, descendants): (Vec<&MatchedProcess>, Vec<&MatchedProcess>) =
            found.iter().partition(|m| m.root);
        let roots: Vec<u32> = roots.iter().map(|m| m.record.pid).collect();
        let descendants: Vec<u32> = descendants.iter().map(|m| m.record.pid).collect();

        // The supervisors go first so that they cannot respawn what is killed next.
        info!("[{app_id}] stopping supervisor pid(s) {roots:?}");
        let mut survivors = terminate_all(&roots, self.policy.stop_grace).await;
        if !descendants.is_empty() {
            info!("[{app_id}] stopping process tree {descendants:?}");
            survivors.extend(terminate_all(&descendants, self.policy.stop_grace).await);
        }
        if !survivors.is_empty() {
            return Err(SupervisorError::Terminate {
                app_id: app_id.to_string(),
                pids: survivors,
            });
        }
        Ok(roots.into_iter().chain(descendants).collect())
    }

    /// Live processes of `app_id` (or of every app for `"all"`), supervisors included.
    pub fn status(&self, app_id: &str) -> Result<Vec<AppStatus>, SupervisorError> {
        let now = SystemTime::now();
        Ok(self
            .find(app_id)?
            .into_iter()
            .map(|m| {
                // Logs and metadata live under the pid of the owning supervisor.
                let (metadata, _) =
                    get_metadata(&self.log_root.join(&m.matched).join(m.origin.to_string()));
                AppStatus {
                    pid: m.record.pid,
                    cpu: m.record.cpu.min(100.0),
                    memory: m.record.memory,
                    supervisor: m.root,
                    restart: metadata.restart,
                    uptime: metadata.uptime(now),
                    id: m.matched,
                }
            })
            .collect())
    }

    fn find(&self, app_id: &str) -> Result<Vec<MatchedProcess>, SupervisorError> {
        let pattern = self.signature(app_id)?;
        Ok(self
            .table
            .find_by_command_line(&pattern)?
            .into_values()
            .collect())
    }

    /// Pattern matching the intermediary's command line; group 1 is the app id.
    fn signature(&self, app_id: &str) -> Result<Regex, SupervisorError> {
        let app = if app_id == ALL_APPS {
            r"\S+".to_string()
        } else {
            validate_app_id(app_id)?;
            regex::escape(app_id)
        };
        let exe = regex::escape(&self.entry_point.to_string_lossy());
        Regex::new(&format!(
            r#"{exe}"?\s+{SUPERVISE_SUBCOMMAND}\s+({app})(?:\s|$)"#
        ))
        .context("failed to build the supervisor signature")
        .map_err(SupervisorError::from)
    }
}

fn validate_app_id(app_id: &str) -> Result<(), SupervisorError> {
    let valid = !app_id.is_empty()
        && app_id != ALL_APPS
        && !app_id.starts_with('.')
        && app_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(SupervisorError::InvalidAppId(app_id.to_string()))
    }
}

#[cfg(unix)]
fn detach(cmd: &mut std::process::Command) {
    use std::os::unix::process::CommandExt;
    // Own process group: a Ctrl-C aimed at the CLI must not reach the supervisor.
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach(cmd: &mut std::process::Command) {
    use std::os::windows::process::CommandExt;
    use windows_sys::Win32::System::Threading::{CREATE_NEW_PROCESS_GROUP, DETACHED_PROCESS};
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

fn log_tail(path: &Path, lines: usize) -> String {
    let Ok(contents) = fs::read_to_string(path) else {
        return String::new();
    };
    let all: Vec<&str> = contents.lines().collect();
    all[all.len().saturating_sub(lines)..].join(" | ")
}

/// Run `command` under supervision until it exits cleanly or the loop gives up.
pub async fn supervise_app(
    app_id: &str,
    log_root: &Path,
    command: Command,
    policy: SupervisorPolicy,
) -> Result<(), SupervisorError> {
    RunLoop::new(app_id, log_root, command, policy, &ProcessTable::new())?
        .run()
        .await
}

/// The supervision loop executed inside the intermediary process.
pub struct RunLoop {
    app_id: String,
    command: Command,
    policy: SupervisorPolicy,
    logs: LogFactory,
    state: SupervisorState,
    rapid_failures: u32,
    spawn_failures: u32,
}

impl RunLoop {
    pub fn new(
        app_id: &str,
        log_root: &Path,
        command: Command,
        policy: SupervisorPolicy,
        table: &ProcessTable,
    ) -> Result<Self, SupervisorError> {
        let running: Option<BTreeSet<u32>> = match table.list() {
            Ok(processes) => Some(processes.into_keys().collect()),
            Err(e) => {
                warn!("[{app_id}] not purging old logs: {e}");
                None
            }
        };
        let logs = LogFactory::new(log_root.join(app_id), policy.rotation, running.as_ref())?;
        Ok(Self {
            app_id: app_id.to_string(),
            command,
            policy,
            logs,
            state: SupervisorState::Stopped,
            rapid_failures: 0,
            spawn_failures: 0,
        })
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn restarts(&self) -> u64 {
        self.logs.restarts()
    }

    pub fn rapid_failures(&self) -> u32 {
        self.rapid_failures
    }

    pub async fn run(&mut self) -> Result<(), SupervisorError> {
        self.transition(SupervisorState::Starting);
        loop {
            let started = Instant::now();
            let mut child = match self.spawn() {
                Ok(child) => {
                    self.spawn_failures = 0;
                    child
                }
                Err(source) => {
                    self.spawn_failures += 1;
                    if self.spawn_failures >= self.policy.max_spawn_failures {
                        self.abort();
                        return Err(SupervisorError::SpawnRetriesExhausted {
                            app_id: self.app_id.clone(),
                            attempts: self.spawn_failures,
                            source,
                        });
                    }
                    warn!(
                        "[{}] failed to spawn {} (attempt {}/{}): {source}, retrying in {}s",
                        self.app_id,
                        self.command,
                        self.spawn_failures,
                        self.policy.max_spawn_failures,
                        self.policy.spawn_backoff.as_secs_f64()
                    );
                    self.transition(SupervisorState::RestartPending);
                    sleep(self.policy.spawn_backoff).await;
                    self.transition(SupervisorState::Starting);
                    continue;
                }
            };

            let pid = child.id().unwrap_or_default();
            info!("[{}] spawned (pid={pid}, cmd={})", self.app_id, self.command);
            self.transition(SupervisorState::Running);

            // Every restart recreates the same directory, keyed by this process.
            let pumps = match self.logs.create_logs(std::process::id()) {
                Ok((stdout, stderr)) => self.pump_output(&mut child, stdout, stderr),
                Err(e) => {
                    error!("[{}] cannot create logs for pid {pid}: {e:#}", self.app_id);
                    let _ = child.kill().await;
                    self.abort();
                    return Err(e.into());
                }
            };

            let status = child.wait().await;
            for pump in pumps {
                let abort = pump.abort_handle();
                if timeout(DRAIN_TIMEOUT, pump).await.is_err() {
                    abort.abort();
                }
            }
            let status = match status {
                Ok(status) => status,
                Err(e) => {
                    self.abort();
                    return Err(anyhow::Error::new(e)
                        .context(format!("[{}] failed to wait for pid {pid}", self.app_id))
                        .into());
                }
            };

            let lifetime = started.elapsed();
            if status.success() {
                info!("[{}] exited with {status}", self.app_id);
                self.transition(SupervisorState::Stopped);
                return Ok(());
            }

            if lifetime < self.policy.rapid_failure_window {
                self.rapid_failures += 1;
            }
            warn!(
                "[{}] exited with {} after {:.1}s (rapid failures {}/{})",
                self.app_id,
                describe_status(status),
                lifetime.as_secs_f64(),
                self.rapid_failures,
                self.policy.max_rapid_failures
            );
            if self.rapid_failures >= self.policy.max_rapid_failures {
                self.abort();
                return Err(SupervisorError::CrashLoop {
                    app_id: self.app_id.clone(),
                    failures: self.rapid_failures,
                    window: self.policy.rapid_failure_window,
                    last_status: describe_status(status),
                });
            }

            self.transition(SupervisorState::RestartPending);
            info!("[{}] restarting (restart #{})", self.app_id, self.logs.restarts() + 1);
            self.transition(SupervisorState::Starting);
        }
    }

    fn spawn(&self) -> std::io::Result<Child> {
        tokio::process::Command::new(self.command.program())
            .args(self.command.args())
            .current_dir(self.command.cwd())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
    }

    fn pump_output(
        &self,
        child: &mut Child,
        stdout: RotatingLog,
        stderr: RotatingLog,
    ) -> Vec<JoinHandle<()>> {
        let mut pumps = Vec::with_capacity(2);
        if let Some(pipe) = child.stdout.take() {
            pumps.push(tokio::spawn(pump_lines(pipe, log_sink(&self.app_id, stdout))));
        }
        if let Some(pipe) = child.stderr.take() {
            pumps.push(tokio::spawn(pump_lines(pipe, log_sink(&self.app_id, stderr))));
        }
        pumps
    }

    fn abort(&mut self) {
        self.transition(SupervisorState::Aborting);
        error!("[{}] giving up", self.app_id);
        self.transition(SupervisorState::Aborted);
    }

    fn transition(&mut self, next: SupervisorState) {
        if !self.state.can_transition_to(next) {
            error!(
                "[{}] invalid state transition {} -> {next}",
                self.app_id, self.state
            );
        }
        debug!("[{}] {} -> {next}", self.app_id, self.state);
        self.state = next;
    }
}

fn log_sink(app_id: &str, mut log: RotatingLog) -> impl FnMut(String) + Send + 'static {
    let app_id = app_id.to_string();
    let mut failed = false;
    move |line| {
        if let Err(e) = log.append(&format!("{line}\n"))
            && !failed
        {
            failed = true;
            warn!("[{app_id}] failed to write {}: {e:#}", log.current_path().display());
        }
    }
}
