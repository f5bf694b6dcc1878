// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Bounded worker pool running a command list for a number of iterations.
//!
//! A scheduling loop polls every slot at a fixed tick. Free slots receive the
//! next command in round-robin order; finished slots report into the record
//! of the iteration they belong to. The first failure, timeout or external
//! cancellation aborts the run: every slot is cancelled, given a bounded
//! time to exit, and the failures are reported together.

use crate::command::Command;
use crate::errors::{AbortReason, ExecutorError, SlotFailure};
use crate::shell::{self, Completion, OutputBuffer, ShellOptions, buffered_lines, output_buffer};
use log::{debug, error, info};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TICK: Duration = Duration::from_millis(100);
/// Time each slot gets to exit once the pool shuts down.
pub const DEFAULT_SLOT_SHUTDOWN: Duration = Duration::from_secs(10);
/// The inferred timeout is this many times the average iteration time.
const AUTO_TIMEOUT_FACTOR: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    None,
    Fixed(Duration),
    /// Inferred from the average duration of the completed iterations.
    Auto,
}

impl Timeout {
    /// Negative means auto, zero means none.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            s if s < 0 => Timeout::Auto,
            0 => Timeout::None,
            s => Timeout::Fixed(Duration::from_secs(s.unsigned_abs())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub jobs: usize,
    /// 0 runs until `duration` elapses or the run is cancelled.
    pub iterations: u64,
    pub duration: Option<Duration>,
    pub timeout: Timeout,
    /// Stream output live instead of capturing it.
    pub verbose: bool,
    pub ignore_error: bool,
    pub tick: Duration,
    pub slot_shutdown: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            iterations: 1,
            duration: None,
            timeout: Timeout::None,
            verbose: false,
            ignore_error: false,
            tick: DEFAULT_TICK,
            slot_shutdown: DEFAULT_SLOT_SHUTDOWN,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub tasks_completed: u64,
    pub iterations_completed: u64,
    pub average_iteration: Option<Duration>,
    pub elapsed: Duration,
}

type Task = JoinHandle<Result<Completion, crate::errors::ShellError>>;

struct WorkerSlot {
    command: Arc<Command>,
    started: Instant,
    iteration: u64,
    cancel: CancellationToken,
    output: OutputBuffer,
    task: Task,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct IterationRecord {
    completed: usize,
    elapsed: Duration,
}

pub struct Executor {
    commands: Vec<Arc<Command>>,
    options: ExecutorOptions,
    slots: Vec<Option<WorkerSlot>>,
    failures: BTreeMap<usize, SlotFailure>,
    iterations: BTreeMap<u64, IterationRecord>,
    command_index: usize,
    cur_iteration: u64,
    completed_iterations: u64,
    total_iteration_time: Duration,
    tasks_completed: u64,
    timeout: Option<Duration>,
    pool_cancel: CancellationToken,
}

impl Executor {
    pub fn new(commands: Vec<Command>, options: ExecutorOptions) -> Result<Self, ExecutorError> {
        if commands.is_empty() {
            return Err(ExecutorError::NoCommand);
        }
        if options.jobs == 0 {
            return Err(ExecutorError::NoJobs);
        }
        let timeout = match options.timeout {
            Timeout::Fixed(limit) => Some(limit),
            Timeout::None | Timeout::Auto => None,
        };
        Ok(Self {
            commands: commands.into_iter().map(Arc::new).collect(),
            slots: (0..options.jobs).map(|_| None).collect(),
            options,
            failures: BTreeMap::new(),
            iterations: BTreeMap::new(),
            command_index: 0,
            cur_iteration: 0,
            completed_iterations: 0,
            total_iteration_time: Duration::ZERO,
            tasks_completed: 0,
            timeout,
            pool_cancel: CancellationToken::new(),
        })
    }

    /// Currently enforced per-task timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub async fn execute(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ExecutorError> {
        info!("{}", self.describe());
        let started = Instant::now();
        let hidden = !self.options.verbose;

        let reason = loop {
            let busy = match self.poll_slots().await {
                Ok(busy) => busy,
                Err(reason) => break Some(reason),
            };
            if hidden {
                self.print_progress(started.elapsed(), busy);
            }
            if self.options.timeout == Timeout::Auto {
                self.timeout =
                    inferred_timeout(self.total_iteration_time, self.completed_iterations);
            }
            if let Some(duration) = self.options.duration
                && started.elapsed() > duration
            {
                break None;
            }
            if self.options.iterations > 0 && self.completed_iterations >= self.options.iterations {
                break None;
            }
            tokio::select! {
                _ = sleep(self.options.tick) => {}
                _ = cancel.cancelled() => break Some(AbortReason::Interrupted),
            }
        };
        if hidden {
            println!();
        }
        if let Some(reason) = reason {
            error!("{reason}");
        }

        self.shutdown().await;

        if reason.is_some() || !self.failures.is_empty() {
            let failures: Vec<SlotFailure> = std::mem::take(&mut self.failures).into_values().collect();
            report_failures(&failures);
            return Err(ExecutorError::Aborted { reason, failures });
        }
        Ok(ExecutionReport {
            tasks_completed: self.tasks_completed,
            iterations_completed: self.completed_iterations,
            average_iteration: self.average_iteration(),
            elapsed: started.elapsed(),
        })
    }

    /// One scheduling pass. Returns the number of busy slots, or the reason
    /// to abort.
    async fn poll_slots(&mut self) -> Result<usize, AbortReason> {
        let mut busy = 0;
        for index in 0..self.slots.len() {
            if let Some(slot) = &self.slots[index] {
                let elapsed = slot.started.elapsed();
                if let Some(limit) = self.timeout
                    && elapsed > limit
                {
                    self.failures.insert(
                        index,
                        SlotFailure {
                            worker: index,
                            command: Some(slot.command.to_string()),
                            errors: vec![format!(
                                "Timeout ({}s) on '{}'",
                                limit.as_secs(),
                                slot.command
                            )],
                            output: Vec::new(),
                        },
                    );
                    return Err(AbortReason::Timeout(limit));
                }
            }

            if let Some(slot) = self.slots[index].take_if(|slot| slot.task.is_finished()) {
                let elapsed = slot.started.elapsed();
                // Already finished: the await resolves immediately.
                let result = match slot.task.await {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                match result {
                    Ok(()) => self.record_completion(slot.iteration, elapsed),
                    Err(error) => {
                        self.failures.insert(
                            index,
                            SlotFailure {
                                worker: index,
                                command: Some(slot.command.to_string()),
                                errors: vec![error],
                                output: buffered_lines(&slot.output),
                            },
                        );
                        return Err(AbortReason::Failure);
                    }
                }
            }

            if self.slots[index].is_none() && self.has_budget() {
                self.slots[index] = Some(self.launch(index));
            }
            if self.slots[index].is_some() {
                busy += 1;
            }
        }
        Ok(busy)
    }

    fn has_budget(&self) -> bool {
        self.options.iterations == 0 || self.cur_iteration < self.options.iterations
    }

    fn launch(&mut self, index: usize) -> WorkerSlot {
        let command = Arc::clone(&self.commands[self.command_index]);
        let iteration = self.cur_iteration;
        self.command_index += 1;
        if self.command_index == self.commands.len() {
            self.command_index = 0;
            self.cur_iteration += 1;
        }

        let cancel = self.pool_cancel.child_token();
        let output = output_buffer();
        let options = ShellOptions {
            capture: (!self.options.verbose).then(|| Arc::clone(&output)),
            ignore_error: self.options.ignore_error,
            ..ShellOptions::default()
        };
        debug!("worker #{index}: '{command}' (iteration {iteration})");
        let task = {
            let command = Arc::clone(&command);
            let cancel = cancel.clone();
            tokio::spawn(async move { shell::run(&command, &options, &cancel).await })
        };
        WorkerSlot {
            command,
            started: Instant::now(),
            iteration,
            cancel,
            output,
            task,
        }
    }

    fn record_completion(&mut self, iteration: u64, elapsed: Duration) {
        self.tasks_completed += 1;
        let record = self.iterations.entry(iteration).or_default();
        record.completed += 1;
        record.elapsed += elapsed;
        if record.completed == self.commands.len() {
            let record = *record;
            self.iterations.remove(&iteration);
            self.completed_iterations += 1;
            self.total_iteration_time += record.elapsed;
        }
    }

    fn average_iteration(&self) -> Option<Duration> {
        (self.completed_iterations > 0)
            .then(|| self.total_iteration_time / self.completed_iterations as u32)
    }

    /// Cancel every live slot and wait for each in turn. A slot that does not
    /// exit in time is aborted, which kills its process.
    async fn shutdown(&mut self) {
        if self.slots.iter().any(Option::is_some) {
            info!(
                "Kill pending jobs... (can take up to {}s)",
                self.options.slot_shutdown.as_secs()
            );
        }
        self.pool_cancel.cancel();
        for index in 0..self.slots.len() {
            let Some(slot) = self.slots[index].take() else {
                continue;
            };
            slot.cancel.cancel();
            let abort = slot.task.abort_handle();
            let error = match timeout(self.options.slot_shutdown, slot.task).await {
                Ok(Ok(Ok(_))) => None,
                Ok(Ok(Err(e))) => Some(e.to_string()),
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => {
                    abort.abort();
                    Some("Cannot terminate process".to_string())
                }
            };
            let failed = error.is_some() || self.failures.contains_key(&index);
            if !failed {
                continue;
            }
            let failure = self.failures.entry(index).or_insert_with(|| SlotFailure {
                worker: index,
                command: Some(slot.command.to_string()),
                errors: Vec::new(),
                output: Vec::new(),
            });
            failure.errors.extend(error);
            failure.output = buffered_lines(&slot.output);
        }
    }

    fn describe(&self) -> String {
        let mut options = Vec::new();
        if self.options.jobs > 1 {
            options.push(format!("{} jobs", self.options.jobs));
        }
        match self.options.iterations {
            0 => options.push("endless mode".to_string()),
            1 => {}
            n => options.push(format!("{n} iterations")),
        }
        if let Some(duration) = self.options.duration {
            options.push(format!("{}s", duration.as_secs()));
        }
        match self.options.timeout {
            Timeout::Auto => options.push("timeout auto".to_string()),
            Timeout::Fixed(limit) => options.push(format!("{}s timeout", limit.as_secs())),
            Timeout::None => {}
        }
        let options = if options.is_empty() {
            String::new()
        } else {
            format!(" [{}]", options.join(", "))
        };
        match self.commands.as_slice() {
            [single] => format!("Running command '{single}'{options}"),
            many => {
                let list: Vec<String> = many.iter().map(|c| format!("'{c}'")).collect();
                format!("Running commands {}{options}", list.join(", "))
            }
        }
    }

    fn print_progress(&self, elapsed: Duration, busy: usize) {
        let average = match self.average_iteration() {
            Some(avg) => format!("{:.6}s", avg.as_secs_f64()),
            None => "?".to_string(),
        };
        let limit = match self.timeout {
            Some(limit) => format!("{}s", limit.as_secs()),
            None => "-".to_string(),
        };
        let mut stdout = std::io::stdout().lock();
        let _ = write!(
            stdout,
            "\rTime: {:.1}s, {} iteration(s), average {average}, timeout {limit}, {busy} job(s)",
            elapsed.as_secs_f64(),
            self.completed_iterations
        );
        let _ = stdout.flush();
    }
}

/// `ceil(5 x average iteration time)` in whole seconds; `None` before any
/// iteration completed or when the result rounds to zero.
pub fn inferred_timeout(total: Duration, completed: u64) -> Option<Duration> {
    if completed == 0 {
        return None;
    }
    let average = total.as_secs_f64() / completed as f64;
    let secs = (average * AUTO_TIMEOUT_FACTOR).ceil() as u64;
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn report_failures(failures: &[SlotFailure]) {
    for failure in failures {
        error!("---- (worker #{}) ----", failure.worker);
        for line in &failure.output {
            println!("{line}");
        }
        error!("Failure cause: {}", failure.errors.join(", "));
    }
}

/// Run `commands` across a worker pool; see [`Executor`].
pub async fn execute_commands(
    commands: Vec<Command>,
    options: ExecutorOptions,
    cancel: &CancellationToken,
) -> Result<ExecutionReport, ExecutorError> {
    Executor::new(commands, options)?.execute(cancel).await
}
