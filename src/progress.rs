//! Progress accounting and run reporting.
//!
//! Every node declares a step budget for its phase with
//! [`set_steps`](crate::node::NodeCore::set_steps); each
//! [`step`](crate::node::NodeCore::step) call charges against that budget
//! and is forwarded to the phase-level [`ProgressSink`]. Driving the budget
//! below zero is *not* an error: the overflow handler records one
//! [`StepOverflow`] diagnostic per offending call, clamps the residual to
//! zero, and lets the data path continue. The diagnostics stay observable on
//! the map and in the [`RunReport`].
//!
//! [`ProxyProgress`] adapts an external collaborator's sub-progress (bytes
//! read, rows merged) onto the node's declared budget, so a node can hand a
//! familiar `init`/`step`/`done` object to a library it drives.
//!
//! The [`RunReport`] collects per-phase memory assignments and all overflow
//! diagnostics; it serializes to JSON and can be printed or saved to a file.

use crate::token::Token;
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// The consumed progress-indicator contract.
///
/// The framework drives whatever rendering sits behind this: `init` once per
/// phase with the phase's total declared steps, `step` for every charge,
/// `refresh` after the initiator finished pushing, and `done` when the phase
/// is torn down (on every exit path).
pub trait ProgressSink {
    /// Announce the total number of steps the coming phase will charge.
    fn init(&mut self, total: u64);

    /// Record `k` completed steps.
    fn step(&mut self, k: u64);

    /// Hint that now is a good moment to redraw.
    fn refresh(&mut self) {}

    /// The phase is over; finalize the display.
    fn done(&mut self) {}
}

/// Shared handle to the phase progress sink.
pub type SharedProgress = Arc<Mutex<dyn ProgressSink>>;

/// Wrap a sink for sharing with the runner.
pub fn share<S: ProgressSink + 'static>(sink: S) -> SharedProgress {
    Arc::new(Mutex::new(sink))
}

/// A sink that ignores everything; the default when no indicator is
/// attached.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn init(&mut self, _total: u64) {}

    fn step(&mut self, _k: u64) {}
}

/// Diagnostic recorded when a `step` call exceeds the remaining budget.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StepOverflow {
    /// Breadcrumb of the overflowing node.
    pub node: String,
    /// Steps the call asked for.
    pub requested: u64,
    /// Steps that were actually left.
    pub remaining: u64,
}

/// Translates external sub-progress into a node's declared step budget.
///
/// A proxy for `sub_total` units emits, after `k` sub-units, enough steps to
/// keep the node's charged fraction equal to `k / sub_total` of its budget.
/// `done` flushes whatever the integer arithmetic still owes.
#[derive(Debug)]
pub struct ProxyProgress {
    token: Token,
    sub_total: u64,
    sub_done: u64,
    budget: u64,
    emitted: u64,
}

impl ProxyProgress {
    pub(crate) fn new(token: Token, sub_total: u64, budget: u64) -> Self {
        Self {
            token,
            sub_total,
            sub_done: 0,
            budget,
            emitted: 0,
        }
    }

    /// Record `k` external sub-units of progress.
    pub fn step(&mut self, k: u64) {
        self.sub_done = self.sub_done.saturating_add(k).min(self.sub_total);
        let target = if self.sub_total == 0 {
            self.budget
        } else {
            self.budget * self.sub_done / self.sub_total
        };
        self.emit_to(target);
    }

    /// The external work is finished; charge any remainder of the budget.
    pub fn done(&mut self) {
        self.emit_to(self.budget);
    }

    fn emit_to(&mut self, target: u64) {
        if target > self.emitted {
            let delta = target - self.emitted;
            self.token
                .map()
                .charge_steps(self.token.id(), delta)
                .expect("node record disappeared while alive");
            self.emitted = target;
        }
    }
}

/// Memory handed to one consumer, by breadcrumb or datastructure name.
#[derive(Clone, Debug, Serialize)]
pub struct AssignedMemory {
    /// Node breadcrumb or datastructure name.
    pub consumer: String,
    /// Assigned bytes.
    pub bytes: u64,
}

/// What one phase looked like after planning and assignment.
#[derive(Clone, Debug, Serialize)]
pub struct PhaseReport {
    /// Position in planner order.
    pub index: usize,
    /// Per-node memory assignments.
    pub nodes: Vec<AssignedMemory>,
    /// Per-datastructure memory assignments.
    pub datastructures: Vec<AssignedMemory>,
    /// Total steps declared by the phase's nodes.
    pub steps_declared: u64,
}

/// Summary of a completed run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunReport {
    /// One entry per executed phase, in execution order.
    pub phases: Vec<PhaseReport>,
    /// All step-overflow diagnostics recorded during the run.
    pub overflows: Vec<StepOverflow>,
}

impl RunReport {
    /// The report as a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("report serialization cannot fail")
    }

    /// Print the report to stdout in a human-readable format.
    pub fn print(&self) {
        println!("========== Pipeline Run ==========");
        for phase in &self.phases {
            println!(
                "phase {} ({} steps declared)",
                phase.index, phase.steps_declared
            );
            for a in &phase.nodes {
                println!("  {} <- {} bytes", a.consumer, a.bytes);
            }
            for a in &phase.datastructures {
                println!("  [{}] <- {} bytes", a.consumer, a.bytes);
            }
        }
        if !self.overflows.is_empty() {
            println!("----------------------------------");
            for o in &self.overflows {
                println!(
                    "overflow: {} requested {} with {} remaining",
                    o.node, o.requested, o.remaining
                );
            }
        }
        println!("==================================");
    }

    /// Save the report to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written to.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let formatted = serde_json::to_string_pretty(&self.to_json())?;
        std::fs::write(path, formatted)?;
        Ok(())
    }
}
