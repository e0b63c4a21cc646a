//! Shared state passed through a provisioning run.
//!
//! A `RunContext` is created empty at the start of each orchestrator run,
//! mutated in place by every task, and dropped when the run ends. Flags that
//! several tasks coordinate on (apt state) are typed fields; everything else
//! a task wants to publish goes into the keyed output map.

use std::collections::BTreeMap;

/// JSON value a task leaves behind for later tasks and for the run report.
pub type TaskOutput = serde_json::Value;

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Mutable state shared by all tasks in one orchestrator run.
#[derive(Debug, Default)]
pub struct RunContext {
    /// Set once the package index has been refreshed in this run, so later
    /// install tasks skip the refresh.
    pub apt_updated_this_run: bool,
    /// Set when any task attempted an install, satisfied or not.
    pub any_install_attempted: bool,
    /// Per-task outputs keyed by task name. Duplicate task names are allowed;
    /// the last completed task with a given name wins.
    outputs: BTreeMap<String, TaskOutput>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a task's output under its name, replacing any earlier value.
    pub fn record_output(&mut self, name: &str, output: TaskOutput) {
        self.outputs.insert(name.to_string(), output);
    }

    /// Output of a previously completed task, if any.
    pub fn output(&self, name: &str) -> Option<&TaskOutput> {
        self.outputs.get(name)
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outputs_are_visible_to_later_readers() {
        let mut ctx = RunContext::new();
        assert!(ctx.output("probe").is_none());
        ctx.record_output("probe", json!({"found": true}));
        assert_eq!(ctx.output("probe"), Some(&json!({"found": true})));
    }

    #[test]
    fn duplicate_names_last_wins() {
        let mut ctx = RunContext::new();
        ctx.record_output("step", json!(1));
        ctx.record_output("step", json!(2));
        assert_eq!(ctx.output("step"), Some(&json!(2)));
        assert_eq!(ctx.output_count(), 1);
    }

    #[test]
    fn flags_start_unset() {
        let ctx = RunContext::new();
        assert!(!ctx.apt_updated_this_run);
        assert!(!ctx.any_install_attempted);
    }
}
