//! Testing utilities for millrace pipelines.
//!
//! This module provides the pieces needed to write idiomatic tests for node
//! graphs without building real sources and sinks:
//!
//! - **[`Journal`]**: a shared, ordered log of hook invocations with
//!   ordering assertions.
//! - **[`RecordingNode`]**: a configurable [`PipelineNode`] that records
//!   every hook into a journal and can act as initiator, charge steps,
//!   forward metadata, or accept evacuation.
//! - **[`CollectingProgress`]**: a [`ProgressSink`] that records every
//!   `init`/`step`/`refresh`/`done` event for later inspection.
//!
//! The module ships in the library (not behind `cfg(test)`) so downstream
//! crates can exercise their own node implementations with the same tools.

use crate::error::{PipelineError, Result};
use crate::node::{NamePriority, NodeCore, PipelineNode};
use crate::node_map::NodeMap;
use crate::progress::ProgressSink;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// A shared, append-only log of labeled events.
#[derive(Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    /// A fresh, empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    /// Snapshot of all entries in recording order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Position of the first occurrence of `entry`.
    ///
    /// # Panics
    ///
    /// Panics when `entry` was never recorded; the journal contents are
    /// included in the message.
    #[must_use]
    pub fn index_of(&self, entry: &str) -> usize {
        let entries = self.entries();
        entries
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("`{entry}` not recorded; journal: {entries:?}"))
    }

    /// Assert that `earlier` was recorded before `later`.
    ///
    /// # Panics
    ///
    /// Panics when either entry is missing or the order is reversed.
    pub fn assert_before(&self, earlier: &str, later: &str) {
        let a = self.index_of(earlier);
        let b = self.index_of(later);
        assert!(
            a < b,
            "expected `{earlier}` (at {a}) before `{later}` (at {b}); journal: {:?}",
            self.entries()
        );
    }
}

type HookFn = Box<dyn FnMut(&NodeCore) -> Result<()>>;

/// A [`PipelineNode`] that records every hook invocation as
/// `"<label>:<hook>"` and runs optional per-hook callbacks.
///
/// By default the node refuses `go` like the trait does; mark it with
/// [`as_initiator`](RecordingNode::as_initiator) (or attach an
/// [`on_go`](RecordingNode::on_go) callback) when it heads a phase.
pub struct RecordingNode {
    core: NodeCore,
    label: String,
    journal: Journal,
    initiator: bool,
    evacuatable: bool,
    on_prepare: Option<HookFn>,
    on_propagate: Option<HookFn>,
    on_begin: Option<HookFn>,
    on_go: Option<HookFn>,
    on_end: Option<HookFn>,
}

impl RecordingNode {
    /// Register a recording node named `label` in `map`.
    #[must_use]
    pub fn new(map: &NodeMap, label: &str, journal: &Journal) -> Self {
        let core = NodeCore::new(map);
        core.set_name(label, NamePriority::User);
        Self {
            core,
            label: label.to_string(),
            journal: journal.clone(),
            initiator: false,
            evacuatable: false,
            on_prepare: None,
            on_propagate: None,
            on_begin: None,
            on_go: None,
            on_end: None,
        }
    }

    /// Let `go` succeed on this node.
    #[must_use]
    pub fn as_initiator(mut self) -> Self {
        self.initiator = true;
        self
    }

    /// Report `true` from `can_evacuate`.
    #[must_use]
    pub fn with_evacuation(mut self) -> Self {
        self.evacuatable = true;
        self
    }

    /// Declare memory requests in one go.
    #[must_use]
    pub fn with_memory(self, min: u64, max: u64, fraction: f64) -> Self {
        self.core.set_minimum_memory(min);
        self.core.set_maximum_memory(max);
        self.core.set_memory_fraction(fraction);
        self
    }

    /// Declare the step budget.
    #[must_use]
    pub fn with_steps(self, n: u64) -> Self {
        self.core.set_steps(n);
        self
    }

    /// Run `f` when `prepare` fires.
    #[must_use]
    pub fn on_prepare(mut self, f: impl FnMut(&NodeCore) -> Result<()> + 'static) -> Self {
        self.on_prepare = Some(Box::new(f));
        self
    }

    /// Run `f` when `propagate` fires.
    #[must_use]
    pub fn on_propagate(mut self, f: impl FnMut(&NodeCore) -> Result<()> + 'static) -> Self {
        self.on_propagate = Some(Box::new(f));
        self
    }

    /// Run `f` when `begin` fires.
    #[must_use]
    pub fn on_begin(mut self, f: impl FnMut(&NodeCore) -> Result<()> + 'static) -> Self {
        self.on_begin = Some(Box::new(f));
        self
    }

    /// Run `f` when `go` fires (implies initiator).
    #[must_use]
    pub fn on_go(mut self, f: impl FnMut(&NodeCore) -> Result<()> + 'static) -> Self {
        self.on_go = Some(Box::new(f));
        self.initiator = true;
        self
    }

    /// Run `f` when `end` fires.
    #[must_use]
    pub fn on_end(mut self, f: impl FnMut(&NodeCore) -> Result<()> + 'static) -> Self {
        self.on_end = Some(Box::new(f));
        self
    }

    /// The node's base state (also reachable through [`PipelineNode::core`],
    /// but usable without the trait in scope).
    #[must_use]
    pub fn core(&self) -> &NodeCore {
        &self.core
    }

    /// Box the node for handing to a runner.
    #[must_use]
    pub fn boxed(self) -> Box<dyn PipelineNode> {
        Box::new(self)
    }

    fn fire(&mut self, hook: &str, which: Which) -> Result<()> {
        self.journal.record(format!("{}:{hook}", self.label));
        let callback = match which {
            Which::Prepare => &mut self.on_prepare,
            Which::Propagate => &mut self.on_propagate,
            Which::Begin => &mut self.on_begin,
            Which::Go => &mut self.on_go,
            Which::End => &mut self.on_end,
        };
        match callback {
            Some(f) => f(&self.core),
            None => Ok(()),
        }
    }
}

enum Which {
    Prepare,
    Propagate,
    Begin,
    Go,
    End,
}

impl PipelineNode for RecordingNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn prepare(&mut self) -> Result<()> {
        self.fire("prepare", Which::Prepare)
    }

    fn propagate(&mut self) -> Result<()> {
        self.fire("propagate", Which::Propagate)
    }

    fn begin(&mut self) -> Result<()> {
        self.fire("begin", Which::Begin)
    }

    fn go(&mut self) -> Result<()> {
        if !self.initiator && self.on_go.is_none() {
            return Err(PipelineError::NotInitiatorNode {
                node: self.core.breadcrumb(),
            });
        }
        self.fire("go", Which::Go)
    }

    fn end(&mut self) -> Result<()> {
        self.fire("end", Which::End)
    }

    fn can_evacuate(&self) -> bool {
        self.evacuatable
    }

    fn evacuate(&mut self) -> Result<()> {
        self.journal.record(format!("{}:evacuate", self.label));
        Ok(())
    }
}

/// What a [`CollectingProgress`] saw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// `init(total)`.
    Init(u64),
    /// `step(k)`.
    Step(u64),
    /// `refresh()`.
    Refresh,
    /// `done()`.
    Done,
}

/// A progress sink that records every event it receives.
///
/// Clone it before handing it to the runner; all clones share the same
/// event log.
#[derive(Clone, Default)]
pub struct CollectingProgress {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl CollectingProgress {
    /// A fresh collector with an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Sum of all `step(k)` events.
    #[must_use]
    pub fn total_steps(&self) -> u64 {
        self.events()
            .iter()
            .map(|e| match e {
                ProgressEvent::Step(k) => *k,
                _ => 0,
            })
            .sum()
    }
}

/// A temporary file path for run-report round-trips, deleted on drop.
pub struct TempReportPath {
    #[allow(dead_code)]
    temp_file: NamedTempFile,
    path: PathBuf,
}

impl TempReportPath {
    /// Create a new temporary report file.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be created.
    pub fn new() -> std::io::Result<Self> {
        let temp_file = NamedTempFile::new()?;
        let path = temp_file.path().to_path_buf();
        Ok(Self { temp_file, path })
    }

    /// Get the path to the temporary file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for TempReportPath {
    fn default() -> Self {
        Self::new().expect("Failed to create temporary file")
    }
}

impl ProgressSink for CollectingProgress {
    fn init(&mut self, total: u64) {
        self.events.lock().unwrap().push(ProgressEvent::Init(total));
    }

    fn step(&mut self, k: u64) {
        self.events.lock().unwrap().push(ProgressEvent::Step(k));
    }

    fn refresh(&mut self) {
        self.events.lock().unwrap().push(ProgressEvent::Refresh);
    }

    fn done(&mut self) {
        self.events.lock().unwrap().push(ProgressEvent::Done);
    }
}
