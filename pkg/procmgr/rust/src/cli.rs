// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::command::Command;
use crate::config::DEFAULT_CONFIG_FILE;
use crate::executor::{ExecutorOptions, Timeout};
use crate::supervisor::AppStatus;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "irapp", version)]
#[command(about = "Run commands in parallel and supervise long-running applications", long_about = None)]
pub struct Cli {
    /// Path of the project configuration
    #[arg(short, long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute commands, possibly in parallel and repeatedly
    Run(RunArgs),
    /// Deploy the application(s), replacing running instances
    Start(AppArgs),
    /// Stop the application(s) previously deployed
    Stop(AppArgs),
    /// Display the status of the application(s)
    Status(AppArgs),
    #[command(hide = true)]
    Supervise(SuperviseArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Run the commands endlessly, until one fails
    #[arg(short, long)]
    pub endless: bool,

    /// Print the output of the commands while they run
    #[arg(short, long)]
    pub verbose: bool,

    /// Number of jobs run in parallel; 0 uses the configured parallelism
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,

    /// Command to execute; may be repeated
    #[arg(short = 'c', long = "cmd")]
    pub commands: Vec<String>,

    /// Number of iterations to perform
    #[arg(short, long)]
    pub iterations: Option<u64>,

    /// Run the commands for this many seconds
    #[arg(short, long)]
    pub duration: Option<u64>,

    /// Per-command timeout in seconds: -1 infers it from previous iterations, 0 disables it
    #[arg(short, long, default_value_t = -1, allow_negative_numbers = true)]
    pub timeout: i64,

    /// Report failing commands as warnings and keep going
    #[arg(long)]
    pub ignore_errors: bool,

    /// Extra command, given after `--`
    #[arg(last = true)]
    pub args: Vec<String>,
}

impl RunArgs {
    /// Iterations to run; 0 means until the duration elapses or forever.
    pub fn total_iterations(&self) -> u64 {
        match self.iterations.filter(|&n| n > 0) {
            Some(n) => n,
            None if self.endless || self.run_duration().is_some() => 0,
            None => 1,
        }
    }

    pub fn run_duration(&self) -> Option<Duration> {
        self.duration
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs)
    }

    pub fn command_list(&self, cwd: &Path) -> Vec<Command> {
        self.commands
            .iter()
            .filter_map(|line| Command::parse(line, cwd))
            .chain(Command::new(self.args.iter().cloned(), cwd))
            .collect()
    }

    pub fn executor_options(&self, default_jobs: usize) -> ExecutorOptions {
        let iterations = self.total_iterations();
        ExecutorOptions {
            jobs: if self.jobs == 0 { default_jobs } else { self.jobs },
            iterations,
            duration: self.run_duration(),
            timeout: Timeout::from_secs(self.timeout),
            // A single run shows its output as it comes.
            verbose: self.verbose || iterations == 1,
            ignore_error: self.ignore_errors,
            ..ExecutorOptions::default()
        }
    }
}

#[derive(Args, Debug)]
pub struct AppArgs {
    /// Application id; every known application when omitted or "all"
    pub id: Option<String>,
}

#[derive(Args, Debug)]
pub struct SuperviseArgs {
    pub app_id: String,
    pub log_root: PathBuf,
    #[arg(long)]
    pub cwd: Option<PathBuf>,
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Render `rows` as an aligned table, header first.
pub fn format_status(rows: &[AppStatus]) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<16} {:>8} {:>6} {:>10} {:>8} {:>10}  {}",
        "ID", "PID", "CPU%", "MEMORY", "RESTART", "UPTIME", "ROLE"
    )];
    for row in rows {
        lines.push(format!(
            "{:<16} {:>8} {:>6.1} {:>10} {:>8} {:>10}  {}",
            row.id,
            row.pid,
            row.cpu,
            format_bytes(row.memory),
            row.restart.map_or("-".to_string(), |n| n.to_string()),
            row.uptime.map_or("-".to_string(), format_uptime),
            if row.supervisor { "supervisor" } else { "process" },
        ));
    }
    lines
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    match UNITS.get(unit) {
        Some(&"B") | None => format!("{bytes}B"),
        Some(name) => format!("{value:.1}{name}"),
    }
}

fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    match (secs / 3600, secs / 60 % 60, secs % 60) {
        (0, 0, s) => format!("{s}s"),
        (0, m, s) => format!("{m}m{s:02}s"),
        (h, m, s) => format!("{h}h{m:02}m{s:02}s"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Run(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_run_defaults() {
        let args = run_args(&["irapp", "run", "-c", "make test"]);
        assert_eq!(args.total_iterations(), 1);
        assert_eq!(args.timeout, -1);

        let options = args.executor_options(8);
        assert_eq!(options.jobs, 1);
        assert_eq!(options.timeout, Timeout::Auto);
        assert!(options.verbose, "a single iteration streams its output");
    }

    #[test]
    fn test_run_iteration_rules() {
        assert_eq!(run_args(&["irapp", "run", "-e"]).total_iterations(), 0);
        assert_eq!(run_args(&["irapp", "run", "-d", "30"]).total_iterations(), 0);
        assert_eq!(run_args(&["irapp", "run", "-e", "-i", "4"]).total_iterations(), 4);
        assert_eq!(run_args(&["irapp", "run", "-i", "0"]).total_iterations(), 1);
    }

    #[test]
    fn test_run_options() {
        let args = run_args(&[
            "irapp", "run", "-j", "0", "-i", "5", "-t", "0", "-c", "a b", "-c", "c", "--", "d",
            "-x",
        ]);
        let options = args.executor_options(6);
        assert_eq!(options.jobs, 6);
        assert_eq!(options.iterations, 5);
        assert_eq!(options.timeout, Timeout::None);
        assert!(!options.verbose);

        let commands: Vec<String> = args
            .command_list(Path::new("/w"))
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(commands, vec!["a b", "c", "d -x"]);
    }

    #[test]
    fn test_negative_timeout_parses() {
        let args = run_args(&["irapp", "run", "-t", "-1", "-c", "x"]);
        assert_eq!(args.timeout, -1);
        let args = run_args(&["irapp", "run", "-t", "12", "-c", "x"]);
        assert_eq!(
            args.executor_options(1).timeout,
            Timeout::Fixed(Duration::from_secs(12))
        );
    }

    #[test]
    fn test_global_config_and_app_commands() {
        let cli = Cli::try_parse_from(["irapp", "-c", "/p/.irapp.json", "stop", "web"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/p/.irapp.json"));
        match cli.command {
            Commands::Stop(AppArgs { id }) => assert_eq!(id.as_deref(), Some("web")),
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["irapp", "status"]).unwrap();
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert!(matches!(cli.command, Commands::Status(AppArgs { id: None })));
    }

    #[test]
    fn test_supervise_args() {
        let cli = Cli::try_parse_from([
            "irapp", "supervise", "web", "/logs", "--cwd", "/srv", "--", "node", "--inspect",
            "a.js",
        ])
        .unwrap();
        match cli.command {
            Commands::Supervise(args) => {
                assert_eq!(args.app_id, "web");
                assert_eq!(args.log_root, PathBuf::from("/logs"));
                assert_eq!(args.cwd, Some(PathBuf::from("/srv")));
                assert_eq!(args.command, vec!["node", "--inspect", "a.js"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_format_status() {
        let rows = [AppStatus {
            id: "web".into(),
            pid: 42,
            cpu: 12.345,
            memory: 3 * 1024 * 1024,
            supervisor: false,
            restart: Some(2),
            uptime: Some(Duration::from_secs(3725)),
        }];
        let lines = format_status(&rows);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].starts_with("web"));
        for field in ["42", "12.3", "3.0MiB", "2", "1h02m05s", "process"] {
            assert!(lines[1].contains(field), "{field} missing in {}", lines[1]);
        }
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(2048), "2.0KiB");
        assert_eq!(format_uptime(Duration::from_secs(59)), "59s");
        assert_eq!(format_uptime(Duration::from_secs(61)), "1m01s");
    }
}
