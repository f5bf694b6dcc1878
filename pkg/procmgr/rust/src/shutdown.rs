// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Terminate processes by pid: ask first, kill after a grace period.
//! A process that is already gone counts as terminated.

use log::{debug, warn};
use tokio::time::{Duration, Instant, sleep};

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);
const SIGKILL_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Send a terminate request to every pid, wait up to `grace`, then kill the
/// stragglers. Returns the pids that are still alive afterwards.
pub async fn terminate_all(pids: &[u32], grace: Duration) -> Vec<u32> {
    for &pid in pids {
        request_exit(pid);
    }
    if wait_gone(pids, grace).await {
        return Vec::new();
    }

    let stragglers = alive(pids);
    for &pid in &stragglers {
        warn!(
            "pid {pid} still running after {}s, sending SIGKILL",
            grace.as_secs_f64()
        );
        force_kill(pid);
    }
    if wait_gone(&stragglers, SIGKILL_TIMEOUT).await {
        return Vec::new();
    }
    let survivors = alive(&stragglers);
    warn!("pid(s) {survivors:?} still running after SIGKILL, giving up");
    survivors
}

/// Poll until none of `pids` is alive or `limit` elapses.
pub async fn wait_gone(pids: &[u32], limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if alive(pids).is_empty() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(POLL_INTERVAL).await;
    }
}

fn alive(pids: &[u32]) -> Vec<u32> {
    pids.iter().copied().filter(|&pid| is_alive(pid)).collect()
}

#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    use nix::sys::signal;
    use nix::sys::wait::{WaitPidFlag, waitpid};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(pid as i32);
    // Reap the process if it is our own exited child, so that it does not
    // linger as a zombie that still answers signal 0.
    let _ = waitpid(pid, Some(WaitPidFlag::WNOHANG));
    signal::kill(pid, None).is_ok() && !is_zombie(pid.as_raw())
}

#[cfg(unix)]
fn is_zombie(pid: i32) -> bool {
    // /proc/<pid>/stat: "pid (comm) S ..."; comm may contain spaces or parens.
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            let (_, rest) = stat.rsplit_once(')')?;
            rest.split_whitespace().next().map(|state| state == "Z")
        })
        .unwrap_or(false)
}

#[cfg(unix)]
fn request_exit(pid: u32) {
    send(pid, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(unix)]
fn force_kill(pid: u32) {
    send(pid, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(unix)]
fn send(pid: u32, sig: nix::sys::signal::Signal) {
    use nix::errno::Errno;
    use nix::sys::signal;
    use nix::unistd::Pid;

    debug!("sending {sig} to {pid}");
    match signal::kill(Pid::from_raw(pid as i32), sig) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("failed to send {sig} to {pid}: {e}"),
    }
}

#[cfg(windows)]
pub fn is_alive(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    // SAFETY: OpenProcess has no memory-safety preconditions; a null handle
    // means the process does not exist or cannot be opened.
    let handle = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid) };
    if handle.is_null() {
        return false;
    }
    let mut code: u32 = 0;
    // SAFETY: `handle` is a valid process handle owned by this function and
    // `code` outlives the call.
    let ok = unsafe { GetExitCodeProcess(handle, &mut code) } != 0;
    // SAFETY: `handle` was returned by OpenProcess and is closed exactly once.
    unsafe { CloseHandle(handle) };
    ok && code == STILL_ACTIVE as u32
}

#[cfg(windows)]
fn request_exit(pid: u32) {
    // Windows has no polite equivalent of SIGTERM for arbitrary processes.
    force_kill(pid);
}

#[cfg(windows)]
fn force_kill(pid: u32) {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_TERMINATE, TerminateProcess};

    // SAFETY: see `is_alive`.
    let handle = unsafe { OpenProcess(PROCESS_TERMINATE, 0, pid) };
    if handle.is_null() {
        debug!("pid {pid} already gone");
        return;
    }
    // SAFETY: `handle` is a valid process handle with PROCESS_TERMINATE access.
    if unsafe { TerminateProcess(handle, 1) } == 0 {
        warn!("failed to terminate pid {pid}");
    }
    // SAFETY: `handle` was returned by OpenProcess and is closed exactly once.
    unsafe { CloseHandle(handle) };
}
