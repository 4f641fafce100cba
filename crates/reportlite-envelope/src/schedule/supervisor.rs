//! Foreground supervisor for SCHEDULED mode.
//!
//! Wakes every `poll_interval`, asks [`ScheduleState`] whether the trigger is
//! due, and runs the task synchronously when it is. Task output is forwarded
//! line by line to the supervisor's stdout. A failing task is logged; only
//! the shutdown flag ends the loop.

use chrono::{DateTime, Local, TimeZone};
use std::io::{self, Write};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::trigger::Trigger;
use crate::common::{exit_code_of, wait_forwarding};
use crate::error::Result;
use crate::privilege::Unprivileged;
use crate::runner::TaskOutcome;
use crate::runtime_resolver::TaskCommand;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Wall-clock source for the supervisor loop.
pub trait Clock {
    type Tz: TimeZone;

    fn now(&self) -> DateTime<Self::Tz>;

    fn sleep(&self, d: Duration);
}

/// Local time, real sleeps.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    type Tz = Local;

    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn sleep(&self, d: Duration) {
        thread::sleep(d);
    }
}

/// Pure trigger bookkeeping: which occurrence is armed next.
#[derive(Debug, Clone)]
pub struct ScheduleState<Tz: TimeZone> {
    next: Option<DateTime<Tz>>,
}

impl<Tz: TimeZone> ScheduleState<Tz> {
    /// Arm the first occurrence strictly after `now`.
    pub fn new<T: Trigger>(trigger: &T, now: &DateTime<Tz>) -> Self {
        Self {
            next: trigger.next_after(now),
        }
    }

    pub fn next(&self) -> Option<&DateTime<Tz>> {
        self.next.as_ref()
    }

    /// If the armed occurrence is due at `now`, return it and re-arm to the
    /// first occurrence after `now`. Occurrences skipped by a clock jump are
    /// not replayed: a jump over several fires once.
    pub fn poll<T: Trigger>(&mut self, trigger: &T, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let due = match self.next {
            Some(ref next) if next <= now => next.clone(),
            _ => return None,
        };
        self.next = trigger.next_after(now);
        Some(due)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorReport {
    pub invocations: u64,
    pub failures: u64,
}

pub struct Supervisor<T: Trigger> {
    trigger: T,
    task: TaskCommand,
    poll_interval: Duration,
}

impl<T: Trigger> Supervisor<T> {
    pub fn new(trigger: T, task: TaskCommand) -> Self {
        Self {
            trigger,
            task,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run on the system clock until `shutdown` is set.
    pub fn run(&self, proof: &Unprivileged, shutdown: &AtomicBool) -> Result<SupervisorReport> {
        let stdout: Arc<Mutex<Box<dyn Write + Send>>> = Arc::new(Mutex::new(Box::new(io::stdout())));
        self.run_with(proof, &SystemClock, shutdown, stdout)
    }

    /// Run on `clock`, forwarding task output into `sink`, until `shutdown` is set.
    pub fn run_with<C, W>(
        &self,
        proof: &Unprivileged,
        clock: &C,
        shutdown: &AtomicBool,
        sink: Arc<Mutex<W>>,
    ) -> Result<SupervisorReport>
    where
        C: Clock,
        W: Write + Send + 'static,
    {
        let mut report = SupervisorReport::default();
        let mut state = ScheduleState::new(&self.trigger, &clock.now());
        match state.next() {
            Some(next) => tracing::info!(
                trigger = %self.trigger.describe(),
                next = %next.fixed_offset(),
                user = %proof.user(),
                "Scheduler started"
            ),
            None => tracing::warn!(trigger = %self.trigger.describe(), "Trigger never fires"),
        }

        while !shutdown.load(Ordering::SeqCst) {
            let now = clock.now();
            if let Some(due) = state.poll(&self.trigger, &now) {
                tracing::info!(due = %due.fixed_offset(), "Trigger fired, running task");
                report.invocations += 1;
                match invoke(proof, &self.task, Arc::clone(&sink)) {
                    Ok(outcome) if outcome.success() => tracing::info!(
                        elapsed_ms = outcome.elapsed.as_millis() as u64,
                        "Task completed"
                    ),
                    Ok(outcome) => {
                        report.failures += 1;
                        tracing::warn!(exit_code = outcome.exit_code, "Task failed");
                    }
                    Err(e) => {
                        report.failures += 1;
                        tracing::warn!("Task could not be started: {}", e);
                    }
                }
                if let Some(next) = state.next() {
                    tracing::info!(next = %next.fixed_offset(), "Next trigger armed");
                }
            }
            clock.sleep(self.poll_interval);
        }

        tracing::info!(
            invocations = report.invocations,
            failures = report.failures,
            "Scheduler stopped"
        );
        Ok(report)
    }
}

/// Run the task once with stdout/stderr piped into `sink`, blocking until it exits.
pub fn invoke<W>(_proof: &Unprivileged, task: &TaskCommand, sink: Arc<Mutex<W>>) -> Result<TaskOutcome>
where
    W: Write + Send + 'static,
{
    let start = Instant::now();
    let mut cmd = task.command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let spawn_err = |source| crate::error::EnvelopeError::TaskSpawn {
        program: task.interpreter.clone(),
        source,
    };
    let mut child = cmd.spawn().map_err(spawn_err)?;
    let status = wait_forwarding(&mut child, sink).map_err(spawn_err)?;
    Ok(TaskOutcome {
        exit_code: exit_code_of(status),
        elapsed: start.elapsed(),
    })
}
