// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use irapp::cli::{AppArgs, Cli, Commands, RunArgs, SuperviseArgs, format_status};
use irapp::supervisor::ALL_APPS;
use irapp::{
    Command, Config, ExecutorError, Supervisor, SupervisorPolicy, execute_commands, supervise_app,
};
use log::{error, info, warn};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = irapp_log::init_from_env() {
        eprintln!("failed to initialize logging: {e}");
    }
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run(&cli.config, args).await,
        Commands::Start(args) => deploy(&cli.config, Action::Start, args).await,
        Commands::Stop(args) => deploy(&cli.config, Action::Stop, args).await,
        Commands::Status(args) => deploy(&cli.config, Action::Status, args).await,
        Commands::Supervise(args) => supervise(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // An aborted run has already reported each failing worker.
            if !matches!(
                e.downcast_ref::<ExecutorError>(),
                Some(ExecutorError::Aborted { .. })
            ) {
                error!("{e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: &std::path::Path, args: RunArgs) -> Result<()> {
    let config = Config::load(config_path)?;
    let cwd = std::env::current_dir().context("failed to resolve the working directory")?;
    let commands = args.command_list(&cwd);
    let options = args.executor_options(config.parallelism);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let report = execute_commands(commands, options, &cancel).await?;
    info!(
        "{} task(s), {} iteration(s) completed in {:.3}s",
        report.tasks_completed,
        report.iterations_completed,
        report.elapsed.as_secs_f64()
    );
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Start,
    Stop,
    Status,
}

async fn deploy(config_path: &std::path::Path, action: Action, args: AppArgs) -> Result<()> {
    let config = Config::load(config_path)?;
    let apps = config.select_apps(args.id.as_deref())?;
    let supervisor = Supervisor::new(&config.log)?;

    match action {
        Action::Start => {
            if apps.is_empty() {
                warn!("no application to deploy");
            }
            for (id, command) in &apps {
                let app = supervisor.start(id, command, &config.root).await?;
                info!(
                    "[{id}] started (supervisor pid={}, logs in {})",
                    app.supervisor_pid,
                    app.log_dir.display()
                );
            }
        }
        Action::Stop => {
            for id in apps.keys() {
                let pids = supervisor.stop(id).await?;
                if pids.is_empty() {
                    info!("[{id}] not running");
                } else {
                    info!("[{id}] stopped {} process(es)", pids.len());
                }
            }
        }
        Action::Status => {}
    }

    let mut rows = Vec::new();
    match args.id.as_deref() {
        None | Some(ALL_APPS) => rows.extend(supervisor.status(ALL_APPS)?),
        Some(_) => {
            for id in apps.keys() {
                rows.extend(supervisor.status(id)?);
            }
        }
    }
    for line in format_status(&rows) {
        println!("{line}");
    }
    Ok(())
}

/// Entry point of the detached supervisor spawned by `start`.
async fn supervise(args: SuperviseArgs) -> Result<()> {
    let cwd = match args.cwd {
        Some(cwd) => cwd,
        None => std::env::current_dir().context("failed to resolve the working directory")?,
    };
    let command = Command::new(args.command, cwd)
        .ok_or_else(|| anyhow!("[{}] empty command", args.app_id))?;
    info!(
        "[{}] supervising '{command}' (pid={})",
        args.app_id,
        std::process::id()
    );
    supervise_app(
        &args.app_id,
        &args.log_root,
        command,
        SupervisorPolicy::default(),
    )
    .await?;
    Ok(())
}
