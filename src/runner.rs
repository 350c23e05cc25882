//! The lifecycle executor.
//!
//! A [`Runner`] owns a run: it unifies the maps of the nodes it is handed,
//! plans the phases, and drives each phase through the lifecycle state
//! machine:
//!
//! ```text
//! prepare -> (memory assignment) -> propagate -> begin -> go -> end -> evacuate?
//! ```
//!
//! `prepare`, `propagate`, and `end` run in item-flow topological order;
//! `begin` runs in reverse, so consumers are open before producers start
//! pushing and producers flush before consumers close. Exactly one
//! initiator per phase receives `go`. Every transition is asserted against
//! the state machine; a hook driven out of order is a fatal
//! [`PipelineError::LifecycleViolation`].
//!
//! Phases execute strictly sequentially on one thread; `push`/`pull`
//! between nodes are synchronous calls on the same stack. The phase
//! progress sink is installed through an RAII scope, so it is released and
//! finalized on every exit path, including error unwinds. Node records are
//! retired when their phase completes; shared datastructures stay with the
//! map.
//!
//! [`PhaseDriver`] exposes the individual lifecycle steps so embedders (and
//! tests) can drive a phase by hand; [`Runner::run`] is the packaged loop.

use crate::error::{PipelineError, Result};
use crate::memory::{self, PhaseAssignment};
use crate::node::{NodeState, PipelineNode};
use crate::node_map::NodeMap;
use crate::planner::{self, Phase, Plan};
use crate::progress::{AssignedMemory, NullProgress, PhaseReport, RunReport, SharedProgress, share};
use crate::forwarding;
use crate::token::NodeId;
use std::collections::BTreeMap;
use tracing::{info, info_span};

/// Owned collection of the nodes participating in a run, keyed by id.
pub type NodeSet = BTreeMap<NodeId, Box<dyn PipelineNode>>;

/// Drives a node graph through its phases.
pub struct Runner {
    budget: u64,
    progress: SharedProgress,
}

impl Runner {
    /// A runner distributing `budget` bytes of memory per phase, with no
    /// progress indicator attached.
    #[must_use]
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            progress: share(NullProgress),
        }
    }

    /// Attach a phase-level progress indicator.
    #[must_use]
    pub fn with_progress(mut self, progress: SharedProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Plan and execute all phases over `nodes`.
    ///
    /// The nodes' maps are linked into one; every planned id must be covered
    /// by `nodes`. Nodes are destroyed as their phase completes.
    ///
    /// # Errors
    ///
    /// Any planning error, any memory-assignment error, and any error a hook
    /// returns. Fatal errors unwind the current phase; the progress sink is
    /// finalized regardless.
    pub fn run(&self, nodes: Vec<Box<dyn PipelineNode>>) -> Result<RunReport> {
        let Some(first) = nodes.first() else {
            return Ok(RunReport::default());
        };
        let map = first.core().token().map();
        for node in &nodes {
            map.link(&node.core().token().map());
        }

        let plan = planner::plan(&map)?;
        let mut set: NodeSet = nodes
            .into_iter()
            .map(|n| (n.core().id(), n))
            .collect();
        for id in plan.node_ids() {
            if !set.contains_key(&id) {
                return Err(PipelineError::UnknownNode { id });
            }
        }

        let mut report = RunReport::default();
        for phase in &plan.phases {
            let span = info_span!("phase", index = phase.index);
            let _entered = span.enter();
            info!(nodes = phase.nodes.len(), "phase starting");

            {
                let mut driver =
                    PhaseDriver::new(&mut set, phase, &map, self.budget, self.progress.clone())?;
                driver.prepare()?;
                driver.assign_memory()?;
                driver.propagate()?;
                driver.begin()?;
                driver.dispatch_go()?;
                driver.end()?;
                driver.evacuate()?;
                report.phases.push(driver.report()?);
            }

            // The phase is over: destroy its nodes and their records.
            map.retire(&phase.nodes);
            for id in &phase.nodes {
                set.remove(id);
            }
            info!("phase finished");
        }

        report.overflows = map.overflows();
        Ok(report)
    }

    /// Plan the graph without executing it.
    ///
    /// # Errors
    ///
    /// Same planning errors as [`Runner::run`].
    pub fn plan(&self, map: &NodeMap) -> Result<Plan> {
        planner::plan(map)
    }
}

/// Installs the phase sink on the map and guarantees teardown on every exit
/// path.
struct SinkScope {
    map: NodeMap,
    sink: SharedProgress,
}

impl SinkScope {
    fn new(map: NodeMap, sink: SharedProgress) -> Self {
        map.install_sink(sink.clone());
        Self { map, sink }
    }
}

impl Drop for SinkScope {
    fn drop(&mut self) {
        self.map.clear_sink();
        self.sink.lock().unwrap().done();
    }
}

/// Step-by-step execution of one phase.
///
/// [`Runner::run`] calls the steps in their canonical order; driving them
/// out of order fails with [`PipelineError::LifecycleViolation`] instead of
/// silently running a hook against a stale state.
pub struct PhaseDriver<'a> {
    nodes: &'a mut NodeSet,
    phase: &'a Phase,
    map: NodeMap,
    budget: u64,
    successors: BTreeMap<NodeId, Vec<NodeId>>,
    assignment: Option<PhaseAssignment>,
    scope: SinkScope,
}

impl<'a> PhaseDriver<'a> {
    /// Set up a driver for `phase`, installing `sink` as the active
    /// progress indicator.
    ///
    /// # Errors
    ///
    /// [`PipelineError::UnknownNode`] if the phase names an id `nodes` does
    /// not cover.
    pub fn new(
        nodes: &'a mut NodeSet,
        phase: &'a Phase,
        map: &NodeMap,
        budget: u64,
        sink: SharedProgress,
    ) -> Result<Self> {
        for id in &phase.nodes {
            if !nodes.contains_key(id) {
                return Err(PipelineError::UnknownNode { id: *id });
            }
        }
        // Forwarded metadata follows every outgoing item-flow edge, buffered
        // ones included: a consumer in a later phase reads what its producer
        // forwarded here.
        let mut successors: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for (from, to) in map.relations().item_flow_edges() {
            successors.entry(from).or_default().push(to);
        }
        for targets in successors.values_mut() {
            targets.sort_unstable();
            targets.dedup();
        }
        let scope = SinkScope::new(map.canonical(), sink);
        Ok(Self {
            nodes,
            phase,
            map: map.canonical(),
            budget,
            successors,
            assignment: None,
            scope,
        })
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Box<dyn PipelineNode>> {
        self.nodes
            .get_mut(&id)
            .ok_or(PipelineError::UnknownNode { id })
    }

    /// `prepare` every node in item-flow topological order.
    ///
    /// # Errors
    ///
    /// Lifecycle violations and hook errors.
    pub fn prepare(&mut self) -> Result<()> {
        for id in self.phase.nodes.clone() {
            self.map
                .transition(id, NodeState::Fresh, NodeState::InPrepare, "prepare")?;
            self.node_mut(id)?.prepare()?;
            self.map
                .transition(id, NodeState::InPrepare, NodeState::AfterPrepare, "prepare")?;
        }
        Ok(())
    }

    /// Run the memory runtime over the phase; every node's
    /// `available_memory` and every datastructure's total are set when this
    /// returns.
    ///
    /// # Errors
    ///
    /// [`PipelineError::InsufficientMemory`] when minimum requests exceed
    /// the budget.
    pub fn assign_memory(&mut self) -> Result<&PhaseAssignment> {
        let assignment = memory::assign(&self.map, self.phase, self.budget)?;
        Ok(self.assignment.insert(assignment))
    }

    /// `propagate` every node in item-flow topological order, flowing each
    /// node's forwarded values along its outgoing edges before the next
    /// node runs.
    ///
    /// # Errors
    ///
    /// Lifecycle violations and hook errors.
    pub fn propagate(&mut self) -> Result<()> {
        for id in self.phase.nodes.clone() {
            self.map.transition(
                id,
                NodeState::AfterPrepare,
                NodeState::InPropagate,
                "propagate",
            )?;
            self.node_mut(id)?.propagate()?;
            self.map.transition(
                id,
                NodeState::InPropagate,
                NodeState::AfterPropagate,
                "propagate",
            )?;
            if let Some(targets) = self.successors.get(&id).cloned() {
                forwarding::flow_from(&self.map, id, &targets)?;
            }
        }
        Ok(())
    }

    /// Initialize the phase progress indicator and `begin` every node in
    /// reverse item-flow topological order.
    ///
    /// # Errors
    ///
    /// Lifecycle violations and hook errors.
    pub fn begin(&mut self) -> Result<()> {
        let mut total = 0;
        for id in &self.phase.nodes {
            total += self.map.steps_total(*id)?;
        }
        self.scope.sink.lock().unwrap().init(total);

        for id in self.phase.nodes.clone().into_iter().rev() {
            self.map
                .transition(id, NodeState::AfterPropagate, NodeState::InBegin, "begin")?;
            self.node_mut(id)?.begin()?;
            self.map
                .transition(id, NodeState::InBegin, NodeState::AfterBegin, "begin")?;
        }
        Ok(())
    }

    /// Dispatch `go` to the phase's unique initiator.
    ///
    /// # Errors
    ///
    /// [`PipelineError::NotInitiatorNode`] when the initiator did not
    /// override `go`; lifecycle violations when the phase is not fully
    /// begun.
    pub fn dispatch_go(&mut self) -> Result<()> {
        let id = self.phase.initiator;
        self.map.require_state(id, NodeState::AfterBegin, "go")?;
        self.node_mut(id)?.go()?;
        self.scope.sink.lock().unwrap().refresh();
        Ok(())
    }

    /// `end` every node in item-flow topological order.
    ///
    /// # Errors
    ///
    /// Lifecycle violations and hook errors.
    pub fn end(&mut self) -> Result<()> {
        for id in self.phase.nodes.clone() {
            self.map
                .transition(id, NodeState::AfterBegin, NodeState::InEnd, "end")?;
            self.node_mut(id)?.end()?;
            self.map
                .transition(id, NodeState::InEnd, NodeState::AfterEnd, "end")?;
        }
        Ok(())
    }

    /// Ask the producers of buffered boundary edges to spill, higher flush
    /// priorities first.
    ///
    /// # Errors
    ///
    /// Lifecycle violations and hook errors.
    pub fn evacuate(&mut self) -> Result<()> {
        let mut candidates = Vec::new();
        for id in &self.phase.evacuation_candidates {
            candidates.push((std::cmp::Reverse(self.map.flush_priority(*id)?), *id));
        }
        candidates.sort_unstable();
        for (_, id) in candidates {
            self.map.require_state(id, NodeState::AfterEnd, "evacuate")?;
            if self.node_mut(id)?.can_evacuate() {
                self.node_mut(id)?.evacuate()?;
            }
        }
        Ok(())
    }

    /// Summarize the phase for the run report.
    ///
    /// # Errors
    ///
    /// [`PipelineError::UnknownNode`] if a phase node was already retired.
    pub fn report(&self) -> Result<PhaseReport> {
        let mut nodes = Vec::new();
        let mut datastructures = Vec::new();
        if let Some(assignment) = &self.assignment {
            for (id, bytes) in &assignment.nodes {
                nodes.push(AssignedMemory {
                    consumer: self.map.breadcrumb(*id)?,
                    bytes: *bytes,
                });
            }
            for (name, bytes) in &assignment.datastructures {
                datastructures.push(AssignedMemory {
                    consumer: name.clone(),
                    bytes: *bytes,
                });
            }
        }
        let mut steps_declared = 0;
        for id in &self.phase.nodes {
            steps_declared += self.map.steps_total(*id)?;
        }
        Ok(PhaseReport {
            index: self.phase.index,
            nodes,
            datastructures,
            steps_declared,
        })
    }
}
