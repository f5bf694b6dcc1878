// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Run one external command to completion.

use crate::command::Command;
use crate::errors::ShellError;
use log::{debug, warn};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;

/// Time a cancelled process gets between the terminate request and SIGKILL.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for output pipes to drain after the process exited. Pipes
/// inherited by background grandchildren would otherwise never close.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Lines captured from a command's stdout and stderr, in arrival order.
pub type OutputBuffer = Arc<Mutex<Vec<String>>>;

pub fn output_buffer() -> OutputBuffer {
    Arc::new(Mutex::new(Vec::new()))
}

/// Snapshot of a buffer's contents.
pub fn buffered_lines(buffer: &OutputBuffer) -> Vec<String> {
    buffer.lock().map(|lines| lines.clone()).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct ShellOptions {
    /// Capture output here instead of inheriting the caller's stdout/stderr.
    pub capture: Option<OutputBuffer>,
    /// Log failures as warnings instead of returning them.
    pub ignore_error: bool,
    pub stop_timeout: Duration,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            capture: None,
            ignore_error: false,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The process ran to completion (successfully, or with `ignore_error`).
    Exited,
    /// The cancellation token fired and the process terminated within its grace period.
    Cancelled,
}

/// Spawn `command`, wait for it to exit or for `cancel` to fire, and report
/// failures as a single [`ShellError::Failed`] listing every reason.
pub async fn run(
    command: &Command,
    options: &ShellOptions,
    cancel: &CancellationToken,
) -> Result<Completion, ShellError> {
    let mut cmd = tokio::process::Command::new(command.program());
    cmd.args(command.args())
        .current_dir(command.cwd())
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if options.capture.is_some() {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    }

    let mut child = cmd.spawn().map_err(|source| ShellError::Spawn {
        command: command.to_string(),
        cwd: command.cwd().display().to_string(),
        source,
    })?;
    debug!(
        "spawned (pid={}, cmd={command})",
        child.id().unwrap_or_default()
    );

    let drains = match &options.capture {
        Some(buffer) => capture_output(&mut child, buffer),
        None => Vec::new(),
    };

    let io_err = |source| ShellError::Io {
        command: command.to_string(),
        source,
    };

    let mut reasons = Vec::new();
    let mut cancelled = false;
    let status = tokio::select! {
        status = child.wait() => status.map_err(io_err)?,
        _ = cancel.cancelled() => {
            cancelled = true;
            terminate(&mut child, options.stop_timeout, &mut reasons)
                .await
                .map_err(io_err)?
        }
    };

    for drain in drains {
        let abort = drain.abort_handle();
        if timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            abort.abort();
        }
    }

    if cancelled && reasons.is_empty() {
        return Ok(Completion::Cancelled);
    }
    if !cancelled && !status.success() {
        reasons.push(describe_status(status));
    }
    if reasons.is_empty() {
        return Ok(Completion::Exited);
    }

    let err = ShellError::Failed {
        command: command.to_string(),
        cwd: command.cwd().display().to_string(),
        reasons,
    };
    if options.ignore_error {
        warn!("{err}");
        return Ok(Completion::Exited);
    }
    Err(err)
}

/// Ask the child to exit, escalating to a kill after `grace`.
async fn terminate(
    child: &mut Child,
    grace: Duration,
    reasons: &mut Vec<String>,
) -> std::io::Result<ExitStatus> {
    request_exit(child);
    match timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            child.kill().await?;
            reasons.push("stalled".to_string());
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id()
        && let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
    {
        debug!("failed to send SIGTERM to {pid}: {e}");
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("failed to terminate child: {e}");
    }
}

pub(crate) fn describe_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("return.code={code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return format!("signal={sig}");
        }
    }
    status.to_string()
}

fn capture_output(child: &mut Child, buffer: &OutputBuffer) -> Vec<JoinHandle<()>> {
    let mut drains = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        let buffer = Arc::clone(buffer);
        drains.push(tokio::spawn(pump_lines(stdout, move |line| {
            if let Ok(mut lines) = buffer.lock() {
                lines.push(line);
            }
        })));
    }
    if let Some(stderr) = child.stderr.take() {
        let buffer = Arc::clone(buffer);
        drains.push(tokio::spawn(pump_lines(stderr, move |line| {
            if let Ok(mut lines) = buffer.lock() {
                lines.push(line);
            }
        })));
    }
    drains
}

/// Feed every line read from `reader` to `sink`, without the line terminator.
/// Invalid UTF-8 is replaced rather than ending the stream.
pub(crate) async fn pump_lines<R, F>(reader: R, mut sink: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&raw);
                sink(line.trim_end_matches(['\n', '\r']).to_string());
            }
            Err(e) => {
                debug!("output pipe closed: {e}");
                break;
            }
        }
    }
}
