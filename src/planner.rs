//! Phase planning.
//!
//! The planner partitions the registered nodes into ordered *phases*:
//!
//! 1. Remove all boundary edges (dependency edges plus explicitly buffered
//!    push/pull edges). Connected components of the remaining actor graph
//!    are the phases.
//! 2. Build the phase graph whose edges are the removed boundary edges
//!    (producer phase → consumer phase). A cycle is
//!    [`PipelineError::CyclicPhases`]; so is a boundary edge whose endpoints
//!    land in the same phase, since it demands a separation the actor edges
//!    forbid.
//! 3. Order phases topologically; order nodes within each phase over the
//!    item-flow edges that stay inside it.
//! 4. Validate that each phase has exactly one initiator (a node with no
//!    incoming intra-phase actor edge) and collect the producers of
//!    buffered edges as evacuation candidates.
//!
//! Every topological tie breaks toward the ascending id, so re-planning an
//! unchanged graph yields an identical plan.

use crate::error::{PipelineError, Result};
use crate::graph::{connected_components, topological_sort};
use crate::node_map::NodeMap;
use crate::token::NodeId;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// One phase of execution: a maximal set of nodes connected by non-buffered
/// actor edges.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Phase {
    /// Position in planner order.
    pub index: usize,
    /// Member nodes in item-flow topological order.
    pub nodes: Vec<NodeId>,
    /// The unique node with no incoming intra-phase actor edge; receives
    /// `go()`.
    pub initiator: NodeId,
    /// Producers of buffered outgoing edges; asked to evacuate after `end`.
    pub evacuation_candidates: Vec<NodeId>,
}

/// A finalized execution plan: phases in dependency order.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Plan {
    /// Phases in the order the runner executes them.
    pub phases: Vec<Phase>,
}

impl Plan {
    /// Ids of every planned node, in execution order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.phases
            .iter()
            .flat_map(|p| p.nodes.iter().copied())
            .collect()
    }
}

/// Partition the map's nodes into ordered phases.
///
/// # Errors
///
/// [`PipelineError::CyclicPhases`] when the phase graph (or the item-flow
/// projection inside one phase) has a cycle;
/// [`PipelineError::NoOrMultipleInitiators`] when a phase does not have
/// exactly one initiator.
pub fn plan(map: &NodeMap) -> Result<Plan> {
    let relations = map.relations();
    let boundary = relations.boundary_edges();
    let intra_actor = relations.unbuffered_actor_edges();
    let intra_item_flow = relations.unbuffered_item_flow_edges();

    let components = connected_components(&relations.nodes, &intra_actor);
    let mut component_of: BTreeMap<NodeId, usize> = BTreeMap::new();
    for (index, component) in components.iter().enumerate() {
        for id in component {
            component_of.insert(*id, index);
        }
    }

    // Phase graph over component indices; a boundary edge inside one
    // component is unsatisfiable.
    let mut phase_edges: BTreeSet<(usize, usize)> = BTreeSet::new();
    for (producer, consumer) in &boundary {
        let from = *component_of
            .get(producer)
            .ok_or(PipelineError::UnknownNode { id: *producer })?;
        let to = *component_of
            .get(consumer)
            .ok_or(PipelineError::UnknownNode { id: *consumer })?;
        if from == to {
            return Err(PipelineError::CyclicPhases);
        }
        phase_edges.insert((from, to));
    }

    let indices: Vec<usize> = (0..components.len()).collect();
    let edge_list: Vec<(usize, usize)> = phase_edges.into_iter().collect();
    let phase_order = topological_sort(&indices, &edge_list).ok_or(PipelineError::CyclicPhases)?;

    let mut phases = Vec::with_capacity(phase_order.len());
    for (index, component_index) in phase_order.into_iter().enumerate() {
        let members: BTreeSet<NodeId> = components[component_index].iter().copied().collect();

        let member_flow: Vec<(NodeId, NodeId)> = intra_item_flow
            .iter()
            .filter(|(a, b)| members.contains(a) && members.contains(b))
            .copied()
            .collect();
        let ordered = topological_sort(&components[component_index], &member_flow)
            .ok_or(PipelineError::CyclicPhases)?;

        let called: BTreeSet<NodeId> = intra_actor
            .iter()
            .filter(|(a, b)| members.contains(a) && members.contains(b))
            .map(|(_, callee)| *callee)
            .collect();
        let initiators: Vec<NodeId> = ordered
            .iter()
            .filter(|id| !called.contains(id))
            .copied()
            .collect();
        if initiators.len() != 1 {
            return Err(PipelineError::NoOrMultipleInitiators {
                phase: index,
                found: initiators.len(),
            });
        }

        // Dependency edges carry no items; only buffered push/pull
        // producers have anything to spill.
        let mut evacuation: BTreeSet<NodeId> = BTreeSet::new();
        for edge in relations.push.iter().filter(|e| e.buffered) {
            if members.contains(&edge.from) {
                evacuation.insert(edge.from);
            }
        }
        for edge in relations.pull.iter().filter(|e| e.buffered) {
            if members.contains(&edge.to) {
                evacuation.insert(edge.to);
            }
        }

        debug!(
            phase = index,
            nodes = ordered.len(),
            initiator = initiators[0].raw(),
            "planned phase"
        );

        phases.push(Phase {
            index,
            nodes: ordered,
            initiator: initiators[0],
            evacuation_candidates: evacuation.into_iter().collect(),
        });
    }

    Ok(Plan { phases })
}
