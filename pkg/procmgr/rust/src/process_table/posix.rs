// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use super::{ProcessRecord, Processes};
use log::debug;

/// Headerless listing of every process: pid, ppid, %cpu, rss (KiB), full argv.
/// `-ww` lifts the column width limit so long command lines are never cut.
pub const PS_ARGS: &[&str] = &["-ww", "-eo", "pid=,ppid=,pcpu=,rss=,args="];

/// Parse `ps` output produced with [`PS_ARGS`]. Lines that do not parse are skipped.
pub fn parse(output: &str) -> Processes {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let record = parse_line(line);
            if record.is_none() {
                debug!("skipping unparsable ps line: {line:?}");
            }
            record
        })
        .map(|record| (record.pid, record))
        .collect()
}

fn parse_line(line: &str) -> Option<ProcessRecord> {
    let (pid, rest) = next_field(line)?;
    let (ppid, rest) = next_field(rest)?;
    let (cpu, rest) = next_field(rest)?;
    let (rss, rest) = next_field(rest)?;
    Some(ProcessRecord {
        pid: pid.parse().ok()?,
        ppid: ppid.parse().ok()?,
        cpu: cpu.replace(',', ".").parse().ok()?,
        memory: rss.parse::<u64>().ok()?.saturating_mul(1024),
        cmdline: rest.trim().to_string(),
    })
}

fn next_field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    Some(s.split_once(char::is_whitespace).unwrap_or((s, "")))
}
