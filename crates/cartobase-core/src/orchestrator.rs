//! Sequential task orchestrator.
//!
//! Tasks are queued with a fatality flag and executed strictly in insertion
//! order over a shared [`RunContext`]. A fatal failure halts the run; a
//! non-fatal failure is recorded and the run continues. The orchestrator
//! never terminates the process — it reports, and the binary decides.

use crate::context::{RunContext, TaskOutput};
use crate::error::Result;
use crate::settings::Settings;
use async_trait::async_trait;
use std::time::Instant;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of provisioning work.
///
/// Implementations read and mutate the shared context, return a JSON output
/// that is stored under their name, and surface failures as errors rather
/// than exiting.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &mut RunContext, settings: &Settings) -> Result<TaskOutput>;
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub task: String,
    pub message: String,
}

/// Outcome of one orchestrator run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Tasks that were started, successful or not.
    pub executed: usize,
    pub failures: Vec<TaskFailure>,
    /// Name of the fatal task that stopped the run, if any.
    pub halted_on: Option<String>,
    /// True iff the end of the queue was reached.
    pub completed: bool,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.completed && self.failures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct QueuedTask {
    task: Box<dyn Task>,
    fatal: bool,
}

/// Ordered task queue. Built up with [`add_task`](Self::add_task), consumed
/// by a single [`run`](Self::run).
#[derive(Default)]
pub struct Orchestrator {
    queue: Vec<QueuedTask>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task. Nothing executes until [`run`](Self::run). Duplicate
    /// names are allowed; in the context's result map the later one wins.
    pub fn add_task(&mut self, task: Box<dyn Task>, fatal: bool) {
        self.queue.push(QueuedTask { task, fatal });
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Execute the queue in insertion order, consuming it.
    ///
    /// Each task's output lands in the context under the task's name before
    /// the next task starts, so later tasks observe everything earlier ones
    /// published.
    pub async fn run(self, ctx: &mut RunContext, settings: &Settings) -> RunReport {
        let total = self.queue.len();
        let mut report = RunReport::default();

        for (idx, queued) in self.queue.into_iter().enumerate() {
            let name = queued.task.name().to_string();
            info!(task = %name, step = idx + 1, total, "task starting");
            let started = Instant::now();

            match queued.task.run(ctx, settings).await {
                Ok(output) => {
                    report.executed += 1;
                    ctx.record_output(&name, output);
                    info!(
                        task = %name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "task completed"
                    );
                }
                Err(e) => {
                    report.executed += 1;
                    report.failures.push(TaskFailure {
                        task: name.clone(),
                        message: format!("{e}"),
                    });
                    if queued.fatal {
                        error!(task = %name, "fatal task failed: {e}");
                        report.halted_on = Some(name);
                        return report;
                    }
                    warn!(task = %name, "task failed, continuing: {e}");
                }
            }
        }

        report.completed = true;
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
