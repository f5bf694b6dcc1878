// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Parsers for the WMI process snapshot. Both queries use the CSV format,
//! whose columns WMI sorts alphabetically after the leading `Node` column.

use super::{ProcessRecord, Processes};
use log::debug;
use std::collections::HashMap;

/// `Node,CommandLine,ParentProcessId,ProcessId,WorkingSetSize`
pub const PROCESS_ARGS: &[&str] = &[
    "process",
    "get",
    "CommandLine,ParentProcessId,ProcessId,WorkingSetSize",
    "/format:csv",
];

/// `Node,IDProcess,PercentProcessorTime`
pub const PERF_ARGS: &[&str] = &[
    "path",
    "Win32_PerfFormattedData_PerfProc_Process",
    "get",
    "IDProcess,PercentProcessorTime",
    "/format:csv",
];

/// Join the process snapshot with the (possibly empty) CPU snapshot.
pub fn parse(processes: &str, perf: &str) -> Processes {
    let cpu = parse_perf(perf);
    rows(processes)
        .filter_map(|line| {
            let record = parse_process_line(line);
            if record.is_none() {
                debug!("skipping unparsable wmic line: {line:?}");
            }
            record
        })
        .map(|mut record| {
            record.cpu = cpu.get(&record.pid).copied().unwrap_or(0.0);
            (record.pid, record)
        })
        .collect()
}

fn rows(output: &str) -> impl Iterator<Item = &str> {
    output
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty() && !line.starts_with("Node,"))
}

fn parse_process_line(line: &str) -> Option<ProcessRecord> {
    // The command line may itself contain commas: peel the numeric columns
    // off the right and the node name off the left.
    let (rest, memory) = line.rsplit_once(',')?;
    let (rest, pid) = rest.rsplit_once(',')?;
    let (rest, ppid) = rest.rsplit_once(',')?;
    let (_node, cmdline) = rest.split_once(',')?;
    Some(ProcessRecord {
        pid: pid.trim().parse().ok()?,
        ppid: ppid.trim().parse().ok()?,
        cpu: 0.0,
        memory: memory.trim().parse().ok()?,
        cmdline: cmdline.trim().to_string(),
    })
}

fn parse_perf(output: &str) -> HashMap<u32, f64> {
    rows(output)
        .filter_map(|line| {
            let mut fields = line.split(',').skip(1);
            let pid = fields.next()?.trim().parse().ok()?;
            let cpu = fields.next()?.trim().parse().ok()?;
            Some((pid, cpu))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROCESSES: &str = "\r\r\nNode,CommandLine,ParentProcessId,ProcessId,WorkingSetSize\r\r
HOST,,0,0,8192\r\r
HOST,C:\\irapp.exe supervise web C:\\logs -- node server.js,4,812,20971520\r\r
HOST,node -e \"a,b\",812,813,1048576\r\r
HOST,broken,line\r\r
";

    const PERF: &str = "\r\nNode,IDProcess,PercentProcessorTime\r
HOST,0,100\r
HOST,812,3\r
HOST,813,187\r
";

    #[test]
    fn test_parse_sample() {
        let processes = parse(PROCESSES, PERF);
        assert_eq!(processes.len(), 3);

        let sup = &processes[&812];
        assert_eq!(sup.ppid, 4);
        assert_eq!(sup.memory, 20971520);
        assert_eq!(sup.cpu, 3.0);
        assert_eq!(sup.cmdline, "C:\\irapp.exe supervise web C:\\logs -- node server.js");

        let child = &processes[&813];
        assert_eq!(child.cmdline, "node -e \"a,b\"");
        assert_eq!(child.cpu, 187.0);
    }

    #[test]
    fn test_parse_without_cpu_snapshot() {
        let processes = parse(PROCESSES, "");
        assert_eq!(processes[&813].cpu, 0.0);
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse("", "").is_empty());
    }
}
