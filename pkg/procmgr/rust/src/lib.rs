// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

// Correctness
#![deny(clippy::undocumented_unsafe_blocks)]
// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unimplemented)]
#![deny(clippy::todo)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]

pub mod cli;
pub mod command;
pub mod config;
pub mod errors;
pub mod executor;
pub mod log_factory;
pub mod process_table;
pub mod rotating_log;
pub mod shell;
pub mod shutdown;
pub mod state;
pub mod supervisor;

// Re-export the public API
pub use command::Command;
pub use config::Config;
pub use errors::{ExecutorError, ProcessTableError, ShellError, SupervisorError};
pub use executor::{ExecutionReport, Executor, ExecutorOptions, Timeout, execute_commands};
pub use process_table::{ProcessRecord, ProcessTable};
pub use supervisor::{AppStatus, SupervisedApp, Supervisor, SupervisorPolicy, supervise_app};
