// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use log::warn;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_MAX_COUNT: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// A file at or past this many bytes is rolled before the next append.
    pub max_size: u64,
    /// Upper bound on files kept per prefix.
    pub max_count: u64,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            max_count: DEFAULT_MAX_COUNT,
        }
    }
}

/// Append-only log split across `<prefix>.NNNNNNNN.log` files.
///
/// Every append is written and flushed before returning, so a crash loses at
/// most the write in flight.
#[derive(Debug)]
pub struct RotatingLog {
    dir: PathBuf,
    prefix: String,
    policy: RotationPolicy,
    index: u64,
    size: u64,
    file: File,
}

impl RotatingLog {
    /// Open the log, continuing in the highest-numbered existing file for
    /// `prefix` if there is one.
    pub fn open(dir: &Path, prefix: &str, policy: RotationPolicy) -> Result<Self> {
        let policy = RotationPolicy {
            max_count: policy.max_count.max(1),
            ..policy
        };
        let index = highest_index(dir, prefix)?.unwrap_or(0);
        let path = file_path(dir, prefix, index);
        let file = open_append(&path)?;
        let size = file
            .metadata()
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len();
        Ok(Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            policy,
            index,
            size,
            file,
        })
    }

    pub fn append(&mut self, text: &str) -> Result<()> {
        if self.size >= self.policy.max_size {
            self.rotate()?;
        }
        self.file
            .write_all(text.as_bytes())
            .and_then(|()| self.file.flush())
            .with_context(|| format!("failed to write {}", self.current_path().display()))?;
        self.size += text.len() as u64;
        Ok(())
    }

    pub fn current_path(&self) -> PathBuf {
        file_path(&self.dir, &self.prefix, self.index)
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    fn rotate(&mut self) -> Result<()> {
        // Make room for the file about to be opened.
        if let Some(oldest) = (self.index + 1).checked_sub(self.policy.max_count) {
            let path = file_path(&self.dir, &self.prefix, oldest);
            if let Err(e) = fs::remove_file(&path)
                && e.kind() != ErrorKind::NotFound
            {
                warn!("failed to remove {}: {e}", path.display());
            }
        }
        self.index += 1;
        let path = self.current_path();
        // Dropping the previous handle closes it.
        self.file = open_append(&path)?;
        self.size = 0;
        Ok(())
    }
}

fn file_path(dir: &Path, prefix: &str, index: u64) -> PathBuf {
    dir.join(format!("{prefix}.{index:08}.log"))
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))
}

fn highest_index(dir: &Path, prefix: &str) -> Result<Option<u64>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", dir.display())),
    };
    Ok(entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let index = name
                .to_str()?
                .strip_prefix(prefix)?
                .strip_prefix('.')?
                .strip_suffix(".log")?
                .parse::<u64>()
                .ok()?;
            Some(index)
        })
        .max())
}
