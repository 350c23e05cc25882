//! The dataflow node contract.
//!
//! This module defines:
//! - [`PipelineNode`]: the trait concrete nodes implement. Lifecycle hooks
//!   (`prepare`, `propagate`, `begin`, `go`, `end`, `evacuate`) default to
//!   no-ops so implementations override only what they need; `go` defaults
//!   to failing with [`PipelineError::NotInitiatorNode`] because only a
//!   phase initiator may be driven.
//! - [`NodeCore`]: the embedded base state every node carries. It owns the
//!   node's [`Token`] and exposes the declarative operations — edge
//!   declarations, memory requests, step budget, names, datastructure
//!   registration, metadata forwarding, and progress stepping. All of them
//!   talk to the shared [`NodeMap`] registry, so a node value can be moved
//!   freely without invalidating anything.
//!
//! # Notes
//! * Hooks are synchronous and run to completion on the executor's stack;
//!   the framework introduces no parallelism. A node using internal threads
//!   must rejoin them before returning from `end`.
//! * Declarative operations are meant to be called from the node's
//!   constructor or from `prepare`. Relation changes after a run has started
//!   are not re-planned.

use crate::error::{PipelineError, Result};
use crate::forwarding::ForwardedValue;
use crate::graph::Relation;
use crate::node_map::NodeMap;
use crate::progress::ProxyProgress;
use crate::token::{NodeId, Token};
use crate::value::AnyValue;
use serde::Serialize;
use std::any::Any;
use std::ops::BitOr;

/// Lifecycle states a node moves through within its phase.
///
/// The executor is the only writer; it asserts the expected predecessor on
/// every transition and raises [`PipelineError::LifecycleViolation`] on a
/// mismatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum NodeState {
    Fresh,
    InPrepare,
    AfterPrepare,
    InPropagate,
    AfterPropagate,
    InBegin,
    AfterBegin,
    InEnd,
    AfterEnd,
}

/// Priority class of a node name; higher wins when names compete.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum NamePriority {
    Default,
    Hint,
    User,
}

/// Rendering hints consumed by external graph visualization.
///
/// A two-flag bitset; combine flags with `|`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PlotOptions(u8);

impl PlotOptions {
    /// No hints.
    pub const NONE: PlotOptions = PlotOptions(0);
    /// Omit the node from simplified renderings.
    pub const SIMPLIFIED_HIDE: PlotOptions = PlotOptions(1);
    /// Mark the node as backed by a cross-phase buffer.
    pub const BUFFERED: PlotOptions = PlotOptions(1 << 1);

    /// True if every flag in `other` is set in `self`.
    #[must_use]
    pub fn contains(self, other: PlotOptions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PlotOptions {
    type Output = PlotOptions;

    fn bitor(self, rhs: PlotOptions) -> PlotOptions {
        PlotOptions(self.0 | rhs.0)
    }
}

/// Trait implemented by every dataflow node.
///
/// The executor drives the hooks in a fixed order per phase: `prepare`
/// (item-flow topological order), `propagate` (same order, after memory
/// assignment), `begin` (reverse order), `go` (on the phase initiator only),
/// `end` (topological order), and `evacuate` (producers of buffered boundary
/// edges, after `end`). Push and pull between nodes are synchronous calls
/// concrete implementations make on each other; the framework only orders
/// them.
pub trait PipelineNode {
    /// Shared access to the node's base state.
    fn core(&self) -> &NodeCore;

    /// Mutable access to the node's base state.
    fn core_mut(&mut self) -> &mut NodeCore;

    /// Called after all phases this node depends on have finished, before
    /// memory assignment. May fetch and forward metadata, and may still tune
    /// memory requests, steps, and datastructure registrations.
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called after memory assignment, in item-flow topological order.
    /// Forwarded values written here flow to downstream nodes before their
    /// own `propagate` runs.
    fn propagate(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called in reverse item-flow topological order; consumers open before
    /// their producers start pushing.
    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called on the phase initiator only; drives all items through the
    /// actor graph.
    ///
    /// # Errors
    ///
    /// The default fails with [`PipelineError::NotInitiatorNode`]: a node
    /// that can initiate a phase must override this.
    fn go(&mut self) -> Result<()> {
        Err(PipelineError::NotInitiatorNode {
            node: self.core().breadcrumb(),
        })
    }

    /// Called in item-flow topological order; producers flush before their
    /// consumers close.
    fn end(&mut self) -> Result<()> {
        Ok(())
    }

    /// True if this node can spill its output for a later phase.
    fn can_evacuate(&self) -> bool {
        false
    }

    /// Spill output to out-of-core storage. Called after `end` when a
    /// buffered edge requires the data in a later phase.
    fn evacuate(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Base state embedded in every node.
///
/// Cloning a core preserves token identity: the clone refers to the same
/// registry entry.
#[derive(Clone, Debug)]
pub struct NodeCore {
    token: Token,
}

impl NodeCore {
    /// Register a fresh node in `map`.
    #[must_use]
    pub fn new(map: &NodeMap) -> Self {
        Self {
            token: map.make_token(),
        }
    }

    /// The node's token.
    #[must_use]
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// The node's id.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.token.id()
    }

    fn map(&self) -> NodeMap {
        self.token.map()
    }

    /* ---------- relations ---------- */

    /// Declare that this node pushes items to `to`.
    pub fn add_push_destination(&self, to: &Token) {
        self.map()
            .relate(self.token(), to, Relation::Push { buffered: false });
    }

    /// Declare a push destination whose consumer runs in a later phase.
    pub fn add_buffered_push_destination(&self, to: &Token) {
        self.map()
            .relate(self.token(), to, Relation::Push { buffered: true });
    }

    /// Declare that this node pulls items from `from`.
    pub fn add_pull_source(&self, from: &Token) {
        self.map()
            .relate(self.token(), from, Relation::Pull { buffered: false });
    }

    /// Declare a pull source whose producer runs in an earlier phase.
    pub fn add_buffered_pull_source(&self, from: &Token) {
        self.map()
            .relate(self.token(), from, Relation::Pull { buffered: true });
    }

    /// Declare that `on` must finish its phase before this node's phase
    /// begins.
    pub fn add_dependency(&self, on: &Token) {
        self.map().relate(on, self.token(), Relation::DependsOn);
    }

    /* ---------- memory requests ---------- */

    /// Least memory this node needs to run at all.
    pub fn set_minimum_memory(&self, bytes: u64) {
        self.must(|rec| rec.min_memory = bytes);
    }

    /// Most memory this node can put to use.
    pub fn set_maximum_memory(&self, bytes: u64) {
        self.must(|rec| rec.max_memory = bytes);
    }

    /// Relative weight used when distributing the phase budget.
    ///
    /// # Panics
    ///
    /// Panics if `weight` is negative or not finite.
    pub fn set_memory_fraction(&self, weight: f64) {
        assert!(
            weight.is_finite() && weight >= 0.0,
            "memory fraction must be a finite non-negative weight"
        );
        self.must(|rec| rec.memory_fraction = weight);
    }

    /// Memory assigned to this node for the current phase.
    #[must_use]
    pub fn available_memory(&self) -> u64 {
        self.must(|rec| rec.available_memory)
    }

    /* ---------- naming ---------- */

    /// Set the node name; a lower-priority name never replaces a
    /// higher-priority one.
    pub fn set_name(&self, name: &str, priority: NamePriority) {
        self.must(|rec| {
            if priority >= rec.name_priority {
                rec.name = name.to_string();
                rec.name_priority = priority;
            }
        });
    }

    /// Prefix used when building breadcrumb labels.
    pub fn set_breadcrumb(&self, prefix: &str) {
        self.must(|rec| rec.breadcrumb_prefix = Some(prefix.to_string()));
    }

    /// Breadcrumb label: the prefix (if any) joined with the name.
    #[must_use]
    pub fn breadcrumb(&self) -> String {
        self.must(|rec| rec.breadcrumb())
    }

    /// Current node name.
    #[must_use]
    pub fn name(&self) -> String {
        self.must(|rec| rec.name.clone())
    }

    /* ---------- plotting / evacuation ---------- */

    /// Rendering hints for external visualization.
    pub fn set_plot_options(&self, options: PlotOptions) {
        self.must(|rec| rec.plot_options = options);
    }

    /// Current rendering hints.
    #[must_use]
    pub fn plot_options(&self) -> PlotOptions {
        self.must(|rec| rec.plot_options)
    }

    /// Ordering key for evacuation: higher priorities spill first.
    pub fn set_flush_priority(&self, priority: u32) {
        self.must(|rec| rec.flush_priority = priority);
    }

    /* ---------- datastructures ---------- */

    /// Register usage of the named shared datastructure with the given
    /// weight. Multiple nodes registering the same name share one instance
    /// and one memory assignment.
    pub fn register_datastructure_usage(&self, name: &str, weight: f64) {
        self.map()
            .register_datastructure(self.id(), name, weight)
            .expect("node record disappeared while alive");
    }

    /// Narrow the memory bounds of a registered datastructure.
    ///
    /// # Errors
    ///
    /// [`PipelineError::UnregisteredDatastructure`] if nothing registered
    /// `name` yet.
    pub fn set_datastructure_memory_limits(&self, name: &str, min: u64, max: u64) -> Result<()> {
        self.map().set_datastructure_limits(name, min, max)
    }

    /// Store the value backing a registered datastructure.
    ///
    /// # Errors
    ///
    /// [`PipelineError::UnregisteredDatastructure`] if nothing registered
    /// `name` yet.
    pub fn set_datastructure<T: Any + Send + Sync>(&self, name: &str, value: T) -> Result<()> {
        self.map()
            .set_datastructure_value(name, AnyValue::new(value))
    }

    /// Fetch a clone of the value backing a registered datastructure.
    ///
    /// # Errors
    ///
    /// [`PipelineError::UnregisteredDatastructure`] if the name is unknown
    /// or no value was stored; [`PipelineError::TypeMismatch`] if the stored
    /// value is not a `T`.
    pub fn datastructure<T: Any + Clone>(&self, name: &str) -> Result<T> {
        self.map().datastructure_value(name)?.extract::<T>(name)
    }

    /// Memory assigned to a registered datastructure for the current phase.
    ///
    /// # Errors
    ///
    /// [`PipelineError::UnregisteredDatastructure`] if the name is unknown.
    pub fn datastructure_memory(&self, name: &str) -> Result<u64> {
        self.map().datastructure_memory(name)
    }

    /* ---------- metadata forwarding ---------- */

    /// Forward a typed value under `key`, marked explicit. Explicit values
    /// are sticky: implicit writes never replace them.
    pub fn forward<T: Any + Send + Sync>(&self, key: &str, value: T) {
        self.map()
            .forward(self.id(), key, ForwardedValue::explicit(AnyValue::new(value)))
            .expect("node record disappeared while alive");
    }

    /// Forward a typed value under `key`, marked implicit. Dropped wherever
    /// an explicit value for the same key already sits.
    pub fn forward_implicit<T: Any + Send + Sync>(&self, key: &str, value: T) {
        self.map()
            .forward(self.id(), key, ForwardedValue::implicit(AnyValue::new(value)))
            .expect("node record disappeared while alive");
    }

    /// Fetch the forwarded value under `key`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::UnknownKey`] if no value reached this node;
    /// [`PipelineError::TypeMismatch`] if the stored value is not a `T`.
    pub fn fetch<T: Any + Clone>(&self, key: &str) -> Result<T> {
        self.map().fetch_value(self.id(), key)?.extract::<T>(key)
    }

    /// True if a forwarded value for `key` has reached this node.
    #[must_use]
    pub fn can_fetch(&self, key: &str) -> bool {
        self.map().can_fetch(self.id(), key)
    }

    /* ---------- progress ---------- */

    /// Declare the step budget for this node's phase.
    pub fn set_steps(&self, n: u64) {
        self.must(|rec| {
            rec.steps_total = n;
            rec.steps_left = n;
        });
    }

    /// Steps still available in the declared budget.
    #[must_use]
    pub fn steps_left(&self) -> u64 {
        self.must(|rec| rec.steps_left)
    }

    /// Charge `k` steps against the declared budget and the phase progress
    /// indicator. Exceeding the budget records one overflow diagnostic and
    /// clamps; it never fails the data path.
    pub fn step(&self, k: u64) {
        self.map()
            .charge_steps(self.id(), k)
            .expect("node record disappeared while alive");
    }

    /// A proxy progress indicator translating `sub_total` external
    /// sub-progress units into this node's declared step budget.
    #[must_use]
    pub fn proxy_progress(&self, sub_total: u64) -> ProxyProgress {
        let budget = self.must(|rec| rec.steps_total);
        ProxyProgress::new(self.token.clone(), sub_total, budget)
    }

    fn must<R>(&self, f: impl FnOnce(&mut crate::node_map::NodeRecord) -> R) -> R {
        self.map()
            .with_record(self.id(), f)
            .expect("node record disappeared while alive")
    }
}
