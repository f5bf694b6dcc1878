// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Line-oriented `log` backend shared by the irapp binaries.
//!
//! Lines look like `2026-01-02 03:04:05 UTC | IRAPP | INFO | message`.
//! Console output sends `INFO` and below to stdout and `WARN`/`ERROR` to
//! stderr. Every line is written and flushed with a single call so that
//! interleaved writers (the CLI and a detached supervisor sharing a file)
//! never split a line.

use std::env;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use time::OffsetDateTime;
use time::macros::format_description;

pub const LOG_LEVEL_ENV: &str = "IRAPP_LOG_LEVEL";
const COMPONENT: &str = "IRAPP";

enum Sink {
    Console,
    Writer(Mutex<Box<dyn Write + Send>>),
}

pub struct Logger {
    level: LevelFilter,
    sink: Sink,
}

impl Logger {
    pub fn console(level: LevelFilter) -> Self {
        Self {
            level,
            sink: Sink::Console,
        }
    }

    pub fn with_writer(level: LevelFilter, writer: Box<dyn Write + Send>) -> Self {
        Self {
            level,
            sink: Sink::Writer(Mutex::new(writer)),
        }
    }

    pub fn install(self) -> Result<(), SetLoggerError> {
        let level = self.level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(level);
        Ok(())
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(OffsetDateTime::now_utc(), record.level(), record.args());
        // A failing log sink has nowhere to report to.
        let _ = match &self.sink {
            Sink::Console if record.level() <= Level::Warn => write_line(&mut io::stderr(), &line),
            Sink::Console => write_line(&mut io::stdout(), &line),
            Sink::Writer(writer) => match writer.lock() {
                Ok(mut w) => write_line(&mut *w, &line),
                Err(_) => Ok(()),
            },
        };
    }

    fn flush(&self) {
        match &self.sink {
            Sink::Console => {
                let _ = io::stdout().flush();
                let _ = io::stderr().flush();
            }
            Sink::Writer(writer) => {
                if let Ok(mut w) = writer.lock() {
                    let _ = w.flush();
                }
            }
        }
    }
}

fn write_line(w: &mut dyn Write, line: &str) -> io::Result<()> {
    w.write_all(line.as_bytes())?;
    w.flush()
}

/// Render one log line, newline included.
pub fn format_line(now: OffsetDateTime, level: Level, args: &fmt::Arguments<'_>) -> String {
    let stamp = now
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_else(|_| "-".to_string());
    format!("{stamp} UTC | {COMPONENT} | {level} | {args}\n")
}

/// Install the console logger at `level`.
pub fn init_with_level(level: Level) -> Result<(), SetLoggerError> {
    Logger::console(level.to_level_filter()).install()
}

/// Install the console logger at the level named by `IRAPP_LOG_LEVEL`
/// (`info` when unset or unparsable).
pub fn init_from_env() -> Result<(), SetLoggerError> {
    Logger::console(level_from_env(env::var(LOG_LEVEL_ENV).ok().as_deref())).install()
}

fn level_from_env(value: Option<&str>) -> LevelFilter {
    value
        .and_then(|v| LevelFilter::from_str(v.trim()).ok())
        .unwrap_or(LevelFilter::Info)
}
