// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

pub mod posix;
pub mod windows;

use crate::errors::ProcessTableError;
use log::debug;
use regex::Regex;
use std::collections::BTreeMap;
use std::process::Command;

/// Snapshot of one OS process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRecord {
    pub pid: u32,
    pub ppid: u32,
    pub cpu: f64,
    /// Resident memory in bytes.
    pub memory: u64,
    pub cmdline: String,
}

/// A process selected by [`ProcessTable::find_by_command_line`].
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedProcess {
    pub record: ProcessRecord,
    /// First capture group of the pattern (or the whole match), inherited by
    /// descendants from the ancestor that matched.
    pub matched: String,
    /// Whether this process matched the pattern itself rather than being a descendant.
    pub root: bool,
    /// Pid of the matching ancestor; its own pid for a root.
    pub origin: u32,
}

pub type Processes = BTreeMap<u32, ProcessRecord>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Posix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Posix
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessTable {
    platform: Platform,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            platform: Platform::current(),
        }
    }

    /// Enumerate every process visible to the current user. An empty map is
    /// a valid answer; only a failure to run the enumeration tool is an error.
    pub fn list(&self) -> Result<Processes, ProcessTableError> {
        match self.platform {
            Platform::Posix => {
                let output = run_enumeration("ps", posix::PS_ARGS)?;
                Ok(posix::parse(&output))
            }
            Platform::Windows => {
                let processes = run_enumeration("wmic", windows::PROCESS_ARGS)?;
                // CPU figures are optional; a failing performance query only loses them.
                let perf = run_enumeration("wmic", windows::PERF_ARGS).unwrap_or_else(|e| {
                    debug!("cpu snapshot unavailable: {e}");
                    String::new()
                });
                Ok(windows::parse(&processes, &perf))
            }
        }
    }

    /// Processes whose command line matches `pattern`, plus all of their descendants.
    pub fn find_by_command_line(
        &self,
        pattern: &Regex,
    ) -> Result<BTreeMap<u32, MatchedProcess>, ProcessTableError> {
        Ok(match_command_line(&self.list()?, pattern))
    }
}

fn run_enumeration(program: &str, args: &[&str]) -> Result<String, ProcessTableError> {
    let command = format!("{program} {}", args.join(" "));
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| ProcessTableError::Enumerate {
            command: command.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(ProcessTableError::Status {
            command,
            status: output.status.to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Select the records matching `pattern` and expand them to their full
/// descendant trees by joining on parent pid.
pub fn match_command_line(processes: &Processes, pattern: &Regex) -> BTreeMap<u32, MatchedProcess> {
    let mut found: BTreeMap<u32, MatchedProcess> = processes
        .values()
        .filter_map(|record| {
            let caps = pattern.captures(&record.cmdline)?;
            let matched = caps.get(1).or_else(|| caps.get(0))?.as_str().to_string();
            Some((
                record.pid,
                MatchedProcess {
                    record: record.clone(),
                    matched,
                    root: true,
                    origin: record.pid,
                },
            ))
        })
        .collect();

    // Walk down one generation per pass until nothing new is added.
    let mut frontier: Vec<u32> = found.keys().copied().collect();
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for record in processes.values() {
            if found.contains_key(&record.pid) || !frontier.contains(&record.ppid) {
                continue;
            }
            let Some(parent) = found.get(&record.ppid) else {
                continue;
            };
            let matched = parent.matched.clone();
            let origin = parent.origin;
            found.insert(
                record.pid,
                MatchedProcess {
                    record: record.clone(),
                    matched,
                    root: false,
                    origin,
                },
            );
            next.push(record.pid);
        }
        frontier = next;
    }
    found
}
