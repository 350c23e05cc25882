//! The shared node registry.
//!
//! A [`NodeMap`] is the central registry for every node linked into one
//! dataflow graph. It is lightweight and cheaply cloneable; all clones share
//! the same underlying state, allowing concurrent construction and inspection
//! from different builder contexts.
//!
//! # Overview
//! - Every node registers itself on construction and receives a
//!   [`Token`](crate::token::Token).
//! - Relations (push, pull, dependency edges) are stored per map, not per
//!   node, so traversal is linear in the number of edges.
//! - Relating two tokens that live in different maps links the maps first:
//!   linking is a union-find merge with path compression, idempotent and
//!   commutative. After a link, every handle resolves to the same canonical
//!   map.
//! - The map also owns the per-name shared datastructure table, the active
//!   progress sink of the running phase, and the accumulated step-overflow
//!   diagnostics.
//!
//! Per-node bookkeeping (parameters, lifecycle state, forwarded values, step
//! budget) lives here, keyed by id. Node values themselves stay with their
//! owner; moving or cloning a node can therefore never invalidate its
//! registration.

use crate::error::{PipelineError, Result};
use crate::forwarding::ForwardedValue;
use crate::graph::{Edge, Relation, Relations};
use crate::node::{NamePriority, NodeState, PlotOptions};
use crate::progress::{SharedProgress, StepOverflow};
use crate::token::{NodeId, Token};
use crate::value::AnyValue;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Per-node bookkeeping, keyed by [`NodeId`] in the map.
#[derive(Debug)]
pub(crate) struct NodeRecord {
    pub name: String,
    pub name_priority: NamePriority,
    pub breadcrumb_prefix: Option<String>,
    pub min_memory: u64,
    pub max_memory: u64,
    pub memory_fraction: f64,
    pub available_memory: u64,
    pub steps_total: u64,
    pub steps_left: u64,
    pub state: NodeState,
    pub forwarded: BTreeMap<String, ForwardedValue>,
    pub datastructures: BTreeSet<String>,
    pub plot_options: PlotOptions,
    pub flush_priority: u32,
}

impl NodeRecord {
    fn new(id: NodeId) -> Self {
        Self {
            name: format!("node{}", id.raw()),
            name_priority: NamePriority::Default,
            breadcrumb_prefix: None,
            min_memory: 0,
            max_memory: 0,
            memory_fraction: 1.0,
            available_memory: 0,
            steps_total: 0,
            steps_left: 0,
            state: NodeState::Fresh,
            forwarded: BTreeMap::new(),
            datastructures: BTreeSet::new(),
            plot_options: PlotOptions::NONE,
            flush_priority: 0,
        }
    }

    pub fn breadcrumb(&self) -> String {
        match &self.breadcrumb_prefix {
            Some(prefix) => format!("{prefix}/{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// A named, memory-budgeted slot shared by every node that registers the
/// same name within one map.
#[derive(Debug, Default)]
pub(crate) struct DatastructureSlot {
    pub weight: f64,
    pub min_memory: u64,
    pub max_memory: u64,
    pub assigned_memory: u64,
    pub value: Option<AnyValue>,
    pub registrants: BTreeSet<NodeId>,
}

/// Inner registry state; exactly one per canonical map.
#[derive(Default)]
struct MapInner {
    records: BTreeMap<NodeId, NodeRecord>,
    push_edges: BTreeSet<Edge>,
    pull_edges: BTreeSet<Edge>,
    dependency_edges: BTreeSet<(NodeId, NodeId)>,
    datastructures: BTreeMap<String, DatastructureSlot>,
    active_sink: Option<SharedProgress>,
    overflows: Vec<StepOverflow>,
}

/// Union-find cell: either the registry root or a link to the map this one
/// was merged into.
enum MapCell {
    Root(MapInner),
    Link(NodeMap),
}

/// Shared handle to a node registry.
pub struct NodeMap {
    cell: Arc<Mutex<MapCell>>,
}

impl Clone for NodeMap {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl Default for NodeMap {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for NodeMap {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.canonical().cell, &other.canonical().cell)
    }
}

impl Eq for NodeMap {}

impl std::fmt::Debug for NodeMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeMap").finish_non_exhaustive()
    }
}

impl NodeMap {
    /// Create a fresh, empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cell: Arc::new(Mutex::new(MapCell::Root(MapInner::default()))),
        }
    }

    /// Resolve this handle to the canonical map, compressing the link chain
    /// behind it.
    #[must_use]
    pub fn canonical(&self) -> NodeMap {
        let mut root = self.clone();
        loop {
            let next = match &*root.cell.lock().unwrap() {
                MapCell::Root(_) => None,
                MapCell::Link(next) => Some(next.clone()),
            };
            match next {
                None => break,
                Some(next) => root = next,
            }
        }
        // Path compression: repoint every cell on the walk at the root.
        let mut walk = self.clone();
        while !Arc::ptr_eq(&walk.cell, &root.cell) {
            let next = {
                let mut guard = walk.cell.lock().unwrap();
                match &mut *guard {
                    MapCell::Root(_) => break,
                    MapCell::Link(next) => {
                        let old = next.clone();
                        *next = root.clone();
                        old
                    }
                }
            };
            walk = next;
        }
        root
    }

    fn with<R>(&self, f: impl FnOnce(&mut MapInner) -> R) -> R {
        let root = self.canonical();
        let mut guard = root.cell.lock().unwrap();
        match &mut *guard {
            MapCell::Root(inner) => f(inner),
            // canonical() just resolved this cell to a root; nothing rewrites
            // it while we hold the graph single-threaded.
            MapCell::Link(_) => unreachable!("canonical map cell turned into a link"),
        }
    }

    /// Register a fresh node and hand back its token.
    #[must_use]
    pub fn make_token(&self) -> Token {
        let id = NodeId::fresh();
        self.with(|inner| {
            inner.records.insert(id, NodeRecord::new(id));
        });
        Token::new(id, self.canonical())
    }

    /// Merge `other` into this map. Linking is idempotent and commutative;
    /// afterwards every token of either map resolves to one canonical map.
    pub fn link(&self, other: &NodeMap) {
        let a = self.canonical();
        let b = other.canonical();
        if Arc::ptr_eq(&a.cell, &b.cell) {
            return;
        }
        let moved = {
            let mut guard = b.cell.lock().unwrap();
            match std::mem::replace(&mut *guard, MapCell::Link(a.clone())) {
                MapCell::Root(inner) => inner,
                MapCell::Link(_) => unreachable!("canonical map cell turned into a link"),
            }
        };
        a.with(|inner| {
            inner.records.extend(moved.records);
            inner.push_edges.extend(moved.push_edges);
            inner.pull_edges.extend(moved.pull_edges);
            inner.dependency_edges.extend(moved.dependency_edges);
            for (name, slot) in moved.datastructures {
                merge_slot(inner.datastructures.entry(name).or_default(), slot);
            }
            inner.overflows.extend(moved.overflows);
        });
    }

    /// Declare a relation between two tokens. Tokens living in different
    /// maps are linked first.
    pub fn relate(&self, a: &Token, b: &Token, kind: Relation) {
        self.link(&a.map());
        self.link(&b.map());
        self.with(|inner| match kind {
            Relation::Push { buffered } => {
                inner.push_edges.insert(Edge::new(a.id(), b.id(), buffered));
            }
            Relation::Pull { buffered } => {
                inner.pull_edges.insert(Edge::new(a.id(), b.id(), buffered));
            }
            Relation::DependsOn => {
                inner.dependency_edges.insert((a.id(), b.id()));
            }
        });
    }

    /// Snapshot the declared relations and the registered node set.
    #[must_use]
    pub fn relations(&self) -> Relations {
        self.with(|inner| Relations {
            nodes: inner.records.keys().copied().collect(),
            push: inner.push_edges.iter().copied().collect(),
            pull: inner.pull_edges.iter().copied().collect(),
            dependencies: inner.dependency_edges.iter().copied().collect(),
        })
    }

    /// Ids of all registered nodes, ascending.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.with(|inner| inner.records.keys().copied().collect())
    }

    pub(crate) fn with_record<R>(
        &self,
        id: NodeId,
        f: impl FnOnce(&mut NodeRecord) -> R,
    ) -> Result<R> {
        self.with(|inner| {
            inner
                .records
                .get_mut(&id)
                .map(f)
                .ok_or(PipelineError::UnknownNode { id })
        })
    }

    /// Current lifecycle state of `id`.
    pub fn state(&self, id: NodeId) -> Result<NodeState> {
        self.with_record(id, |rec| rec.state)
    }

    /// Breadcrumb label of `id` (prefix plus highest-priority name).
    pub fn breadcrumb(&self, id: NodeId) -> Result<String> {
        self.with_record(id, |rec| rec.breadcrumb())
    }

    /// Assert-and-advance the lifecycle state machine. Only the executor
    /// calls this.
    pub(crate) fn transition(
        &self,
        id: NodeId,
        expected: NodeState,
        to: NodeState,
        hook: &'static str,
    ) -> Result<()> {
        self.with(|inner| {
            let rec = inner
                .records
                .get_mut(&id)
                .ok_or(PipelineError::UnknownNode { id })?;
            if rec.state != expected {
                return Err(PipelineError::LifecycleViolation {
                    node: rec.breadcrumb(),
                    hook,
                    expected,
                    found: rec.state,
                });
            }
            rec.state = to;
            Ok(())
        })
    }

    /// Require `id` to be in `expected` without advancing (used for hooks
    /// that are not themselves states, like `go`).
    pub(crate) fn require_state(
        &self,
        id: NodeId,
        expected: NodeState,
        hook: &'static str,
    ) -> Result<()> {
        self.with(|inner| {
            let rec = inner
                .records
                .get_mut(&id)
                .ok_or(PipelineError::UnknownNode { id })?;
            if rec.state != expected {
                return Err(PipelineError::LifecycleViolation {
                    node: rec.breadcrumb(),
                    hook,
                    expected,
                    found: rec.state,
                });
            }
            Ok(())
        })
    }

    /* ---------- memory ---------- */

    pub(crate) fn node_memory_params(&self, id: NodeId) -> Result<(u64, u64, f64)> {
        self.with_record(id, |rec| (rec.min_memory, rec.max_memory, rec.memory_fraction))
    }

    pub(crate) fn node_datastructure_names(&self, id: NodeId) -> Result<Vec<String>> {
        self.with_record(id, |rec| rec.datastructures.iter().cloned().collect())
    }

    pub(crate) fn set_available_memory(&self, id: NodeId, bytes: u64) -> Result<()> {
        self.with_record(id, |rec| rec.available_memory = bytes)
    }

    pub(crate) fn flush_priority(&self, id: NodeId) -> Result<u32> {
        self.with_record(id, |rec| rec.flush_priority)
    }

    pub(crate) fn steps_total(&self, id: NodeId) -> Result<u64> {
        self.with_record(id, |rec| rec.steps_total)
    }

    /* ---------- datastructures ---------- */

    /// Register usage of the named shared datastructure on behalf of `id`.
    ///
    /// Registration is idempotent per (map, name); the effective weight is
    /// the maximum across all registrations.
    pub(crate) fn register_datastructure(&self, id: NodeId, name: &str, weight: f64) -> Result<()> {
        self.with(|inner| {
            let rec = inner
                .records
                .get_mut(&id)
                .ok_or(PipelineError::UnknownNode { id })?;
            rec.datastructures.insert(name.to_string());
            let slot = inner.datastructures.entry(name.to_string()).or_default();
            slot.weight = slot.weight.max(weight);
            if slot.max_memory == 0 && slot.registrants.is_empty() {
                slot.max_memory = u64::MAX;
            }
            slot.registrants.insert(id);
            Ok(())
        })
    }

    /// Narrow the memory bounds of a registered datastructure: the effective
    /// minimum is the max of requested minimums, the effective maximum the
    /// min of requested maximums.
    pub(crate) fn set_datastructure_limits(&self, name: &str, min: u64, max: u64) -> Result<()> {
        self.with(|inner| {
            let slot = inner.datastructures.get_mut(name).ok_or_else(|| {
                PipelineError::UnregisteredDatastructure {
                    name: name.to_string(),
                }
            })?;
            slot.min_memory = slot.min_memory.max(min);
            slot.max_memory = slot.max_memory.min(max);
            Ok(())
        })
    }

    /// Store the opaque value backing a registered datastructure.
    pub(crate) fn set_datastructure_value(&self, name: &str, value: AnyValue) -> Result<()> {
        self.with(|inner| {
            let slot = inner.datastructures.get_mut(name).ok_or_else(|| {
                PipelineError::UnregisteredDatastructure {
                    name: name.to_string(),
                }
            })?;
            slot.value = Some(value);
            Ok(())
        })
    }

    /// Fetch the opaque value backing a registered datastructure.
    pub(crate) fn datastructure_value(&self, name: &str) -> Result<AnyValue> {
        self.with(|inner| {
            let slot = inner.datastructures.get(name).ok_or_else(|| {
                PipelineError::UnregisteredDatastructure {
                    name: name.to_string(),
                }
            })?;
            slot.value
                .clone()
                .ok_or_else(|| PipelineError::UnregisteredDatastructure {
                    name: name.to_string(),
                })
        })
    }

    /// Memory assigned to a registered datastructure in the current phase.
    pub fn datastructure_memory(&self, name: &str) -> Result<u64> {
        self.with(|inner| {
            inner
                .datastructures
                .get(name)
                .map(|slot| slot.assigned_memory)
                .ok_or_else(|| PipelineError::UnregisteredDatastructure {
                    name: name.to_string(),
                })
        })
    }

    pub(crate) fn set_datastructure_memory(&self, name: &str, assigned: u64) {
        self.with(|inner| {
            if let Some(slot) = inner.datastructures.get_mut(name) {
                slot.assigned_memory = assigned;
            }
        });
    }

    pub(crate) fn datastructure_bounds(&self, name: &str) -> Result<(u64, u64, f64)> {
        self.with(|inner| {
            inner
                .datastructures
                .get(name)
                .map(|slot| (slot.min_memory, slot.max_memory, slot.weight))
                .ok_or_else(|| PipelineError::UnregisteredDatastructure {
                    name: name.to_string(),
                })
        })
    }

    /* ---------- forwarding ---------- */

    /// Write a forwarded value into `id`'s table, honoring the
    /// explicit-overrides-implicit rule locally.
    pub(crate) fn forward(&self, id: NodeId, key: &str, value: ForwardedValue) -> Result<()> {
        self.with_record(id, |rec| {
            match rec.forwarded.get(key) {
                Some(existing) if existing.explicit && !value.explicit => {}
                _ => {
                    rec.forwarded.insert(key.to_string(), value);
                }
            }
        })
    }

    pub(crate) fn fetch_value(&self, id: NodeId, key: &str) -> Result<AnyValue> {
        self.with_record(id, |rec| rec.forwarded.get(key).map(|fv| fv.value.clone()))?
            .ok_or_else(|| PipelineError::UnknownKey {
                key: key.to_string(),
            })
    }

    /// Read-only probe for a forwarded key.
    pub fn can_fetch(&self, id: NodeId, key: &str) -> bool {
        self.with(|inner| {
            inner
                .records
                .get(&id)
                .is_some_and(|rec| rec.forwarded.contains_key(key))
        })
    }

    /// Snapshot of `id`'s forwarded table, sorted by key.
    pub(crate) fn forwarded_snapshot(&self, id: NodeId) -> Result<Vec<(String, ForwardedValue)>> {
        self.with_record(id, |rec| {
            rec.forwarded
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    }

    /* ---------- progress ---------- */

    pub(crate) fn install_sink(&self, sink: SharedProgress) {
        self.with(|inner| inner.active_sink = Some(sink));
    }

    pub(crate) fn clear_sink(&self) {
        self.with(|inner| inner.active_sink = None);
    }

    /// Charge `k` steps against `id`'s remaining budget and forward the
    /// charged amount to the phase progress sink.
    ///
    /// Exceeding the budget is non-fatal: exactly one overflow diagnostic is
    /// recorded per offending call, the residual is clamped to zero, and
    /// execution continues.
    pub(crate) fn charge_steps(&self, id: NodeId, k: u64) -> Result<()> {
        let (charged, sink, overflow) = self.with(|inner| {
            let rec = inner
                .records
                .get_mut(&id)
                .ok_or(PipelineError::UnknownNode { id })?;
            let (charged, overflow) = if k > rec.steps_left {
                let diag = StepOverflow {
                    node: rec.breadcrumb(),
                    requested: k,
                    remaining: rec.steps_left,
                };
                let charged = rec.steps_left;
                rec.steps_left = 0;
                inner.overflows.push(diag.clone());
                (charged, Some(diag))
            } else {
                rec.steps_left -= k;
                (k, None)
            };
            Ok((charged, inner.active_sink.clone(), overflow))
        })?;
        if let Some(diag) = overflow {
            warn!(
                node = %diag.node,
                requested = diag.requested,
                remaining = diag.remaining,
                "step budget exceeded"
            );
        }
        if charged > 0 {
            if let Some(sink) = sink {
                sink.lock().unwrap().step(charged);
            }
        }
        Ok(())
    }

    /// All step-overflow diagnostics recorded so far.
    #[must_use]
    pub fn overflows(&self) -> Vec<StepOverflow> {
        self.with(|inner| inner.overflows.clone())
    }

    /* ---------- teardown ---------- */

    /// Drop the records of nodes whose phase has completed. Shared
    /// datastructure slots stay: they are owned by the map, not by any node.
    pub(crate) fn retire(&self, ids: &[NodeId]) {
        self.with(|inner| {
            for id in ids {
                inner.records.remove(id);
            }
        });
    }

    /* ---------- visualization ---------- */

    /// Render the declared graph as a DOT digraph for external
    /// visualization.
    ///
    /// Nodes with [`PlotOptions::SIMPLIFIED_HIDE`] are omitted; nodes with
    /// [`PlotOptions::BUFFERED`] are drawn with doubled peripheries. Push
    /// edges are solid, pull edges dotted, dependency edges gray, and
    /// buffered edges dashed.
    #[must_use]
    pub fn to_dot(&self) -> String {
        self.with(|inner| {
            let hidden: BTreeSet<NodeId> = inner
                .records
                .iter()
                .filter(|(_, rec)| rec.plot_options.contains(PlotOptions::SIMPLIFIED_HIDE))
                .map(|(id, _)| *id)
                .collect();
            let mut out = String::from("digraph pipeline {\n");
            for (id, rec) in &inner.records {
                if hidden.contains(id) {
                    continue;
                }
                let peripheries = if rec.plot_options.contains(PlotOptions::BUFFERED) {
                    ", peripheries=2"
                } else {
                    ""
                };
                out.push_str(&format!(
                    "    n{} [label=\"{}\"{peripheries}];\n",
                    id.raw(),
                    rec.breadcrumb()
                ));
            }
            let mut edge = |from: NodeId, to: NodeId, attrs: &str| {
                if !hidden.contains(&from) && !hidden.contains(&to) {
                    out.push_str(&format!("    n{} -> n{}{attrs};\n", from.raw(), to.raw()));
                }
            };
            for e in &inner.push_edges {
                edge(
                    e.from,
                    e.to,
                    if e.buffered { " [style=dashed]" } else { "" },
                );
            }
            for e in &inner.pull_edges {
                edge(
                    e.from,
                    e.to,
                    if e.buffered {
                        " [style=\"dotted,dashed\"]"
                    } else {
                        " [style=dotted]"
                    },
                );
            }
            for (from, to) in &inner.dependency_edges {
                edge(*from, *to, " [color=gray, arrowhead=open]");
            }
            out.push_str("}\n");
            out
        })
    }
}

fn merge_slot(into: &mut DatastructureSlot, from: DatastructureSlot) {
    into.weight = into.weight.max(from.weight);
    into.min_memory = into.min_memory.max(from.min_memory);
    if into.registrants.is_empty() {
        into.max_memory = from.max_memory;
    } else if !from.registrants.is_empty() {
        into.max_memory = into.max_memory.min(from.max_memory);
    }
    if into.value.is_none() {
        into.value = from.value;
    }
    into.registrants.extend(from.registrants);
}
