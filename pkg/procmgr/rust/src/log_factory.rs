// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::rotating_log::{RotatingLog, RotationPolicy};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const METADATA_FILE: &str = ".metadata.json";
pub const STDOUT_PREFIX: &str = "stdout";
pub const STDERR_PREFIX: &str = "stderr";

/// Contents of `.metadata.json`. Missing fields read as `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<u64>,
    /// Unix time (seconds) at which the process was started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
}

impl Metadata {
    pub fn uptime(&self, now: SystemTime) -> Option<Duration> {
        let started = self.time?;
        let now = now.duration_since(UNIX_EPOCH).ok()?.as_secs_f64();
        Duration::try_from_secs_f64((now - started).max(0.0)).ok()
    }
}

/// Read the metadata stored in `dir`; missing or corrupt files read as empty.
pub fn get_metadata(dir: &Path) -> (Metadata, PathBuf) {
    let path = dir.join(METADATA_FILE);
    let metadata = match fs::read_to_string(&path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
            debug!("ignoring corrupt metadata {}: {e}", path.display());
            Metadata::default()
        }),
        Err(_) => Metadata::default(),
    };
    (metadata, path)
}

/// Owns the `<logRoot>/<appId>` directory: one sub-directory per supervisor pid,
/// recreated on every launch of the command.
#[derive(Debug)]
pub struct LogFactory {
    base: PathBuf,
    policy: RotationPolicy,
    launches: u64,
}

impl LogFactory {
    /// Create the factory, deleting the log directories of pids that are not
    /// in `running`. `None` skips the purge (the process table was unavailable).
    pub fn new(
        base: impl Into<PathBuf>,
        policy: RotationPolicy,
        running: Option<&BTreeSet<u32>>,
    ) -> Result<Self> {
        let base = base.into();
        fs::create_dir_all(&base)
            .with_context(|| format!("failed to create {}", base.display()))?;
        if let Some(running) = running {
            purge_stale(&base, running)?;
        }
        Ok(Self {
            base,
            policy,
            launches: 0,
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn log_dir(&self, pid: u32) -> PathBuf {
        self.base.join(pid.to_string())
    }

    /// Number of restarts recorded so far (launches after the first).
    pub fn restarts(&self) -> u64 {
        self.launches.saturating_sub(1)
    }

    /// Start a fresh log directory for `pid` and return its stdout/stderr sinks.
    pub fn create_logs(&mut self, pid: u32) -> Result<(RotatingLog, RotatingLog)> {
        let restart = self.launches;
        self.launches += 1;

        let dir = self.log_dir(pid);
        match fs::remove_dir_all(&dir) {
            Ok(()) => debug!("removed previous log directory {}", dir.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("failed to remove {}", dir.display()));
            }
        }
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

        let metadata = Metadata {
            restart: Some(restart),
            time: Some(
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs_f64(),
            ),
        };
        let path = dir.join(METADATA_FILE);
        let json = serde_json::to_string(&metadata).context("failed to encode metadata")?;
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;

        let stdout = RotatingLog::open(&dir, STDOUT_PREFIX, self.policy)?;
        let stderr = RotatingLog::open(&dir, STDERR_PREFIX, self.policy)?;
        Ok((stdout, stderr))
    }
}

fn purge_stale(base: &Path, running: &BTreeSet<u32>) -> Result<()> {
    let entries =
        fs::read_dir(base).with_context(|| format!("failed to read {}", base.display()))?;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("skipping unreadable entry in {}: {e}", base.display());
                continue;
            }
        };
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u32>().ok())
        else {
            continue;
        };
        if running.contains(&pid) || !entry.path().is_dir() {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => info!("removed stale log directory {}", entry.path().display()),
            Err(e) => warn!("failed to remove {}: {e}", entry.path().display()),
        }
    }
    Ok(())
}
