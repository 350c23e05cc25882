//! Graph projections over the declared relations.
//!
//! Three relations are derived from the same node set:
//! - the *actor graph* (push ∪ pull, caller → callee): who calls whom at
//!   runtime;
//! - the *item-flow graph* (push ∪ reversed pull, producer → consumer): the
//!   direction items travel;
//! - the *dependency graph* (explicit edges, producer-first across phases).
//!
//! The module also carries the deterministic topological sort used by the
//! planner and the runner: Kahn's algorithm with a min-heap over ready
//! vertices, so ties always break toward the smallest key. Re-sorting an
//! unchanged graph yields an identical order.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use crate::token::NodeId;

/// Kind of relation declared between two tokens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    /// `a` pushes items to `b`. Buffered edges cross a phase boundary.
    Push {
        /// Producer must finish before the consumer begins.
        buffered: bool,
    },
    /// `a` pulls items from `b`. Buffered edges cross a phase boundary.
    Pull {
        /// Producer must finish before the consumer begins.
        buffered: bool,
    },
    /// `a`'s phase must complete before `b`'s phase starts.
    DependsOn,
}

/// A directed push or pull edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Edge {
    /// Caller side (pusher, or puller for pull edges).
    pub from: NodeId,
    /// Callee side.
    pub to: NodeId,
    /// Whether the edge crosses a phase boundary.
    pub buffered: bool,
}

impl Edge {
    pub(crate) fn new(from: NodeId, to: NodeId, buffered: bool) -> Self {
        Self { from, to, buffered }
    }
}

/// Snapshot of everything declared in a [`NodeMap`](crate::node_map::NodeMap).
#[derive(Clone, Debug, Default)]
pub struct Relations {
    /// All registered node ids, ascending.
    pub nodes: Vec<NodeId>,
    /// Push edges, caller → callee.
    pub push: Vec<Edge>,
    /// Pull edges, caller → callee.
    pub pull: Vec<Edge>,
    /// Dependency edges, producer → consumer.
    pub dependencies: Vec<(NodeId, NodeId)>,
}

impl Relations {
    /// Actor edges (caller → callee), buffered ones included.
    #[must_use]
    pub fn actor_edges(&self) -> Vec<(NodeId, NodeId)> {
        self.push
            .iter()
            .chain(self.pull.iter())
            .map(|e| (e.from, e.to))
            .collect()
    }

    /// Actor edges that stay inside a phase.
    #[must_use]
    pub fn unbuffered_actor_edges(&self) -> Vec<(NodeId, NodeId)> {
        self.push
            .iter()
            .chain(self.pull.iter())
            .filter(|e| !e.buffered)
            .map(|e| (e.from, e.to))
            .collect()
    }

    /// Item-flow edges (producer → consumer): push edges as declared, pull
    /// edges reversed.
    #[must_use]
    pub fn item_flow_edges(&self) -> Vec<(NodeId, NodeId)> {
        self.push
            .iter()
            .map(|e| (e.from, e.to))
            .chain(self.pull.iter().map(|e| (e.to, e.from)))
            .collect()
    }

    /// Item-flow edges that stay inside a phase.
    #[must_use]
    pub fn unbuffered_item_flow_edges(&self) -> Vec<(NodeId, NodeId)> {
        self.push
            .iter()
            .filter(|e| !e.buffered)
            .map(|e| (e.from, e.to))
            .chain(
                self.pull
                    .iter()
                    .filter(|e| !e.buffered)
                    .map(|e| (e.to, e.from)),
            )
            .collect()
    }

    /// Phase-boundary edges in producer → consumer direction: every
    /// dependency edge plus every buffered push/pull edge projected onto
    /// item flow.
    #[must_use]
    pub fn boundary_edges(&self) -> Vec<(NodeId, NodeId)> {
        self.push
            .iter()
            .filter(|e| e.buffered)
            .map(|e| (e.from, e.to))
            .chain(
                self.pull
                    .iter()
                    .filter(|e| e.buffered)
                    .map(|e| (e.to, e.from)),
            )
            .chain(self.dependencies.iter().copied())
            .collect()
    }
}

/// Deterministic Kahn topological sort.
///
/// Vertices not mentioned by any edge sort by their own key. Returns `None`
/// when the restriction of `edges` to `vertices` has a cycle. Ready vertices
/// are drained smallest-first, so the order is reproducible.
pub(crate) fn topological_sort<T: Copy + Ord>(
    vertices: &[T],
    edges: &[(T, T)],
) -> Option<Vec<T>> {
    let universe: BTreeSet<T> = vertices.iter().copied().collect();
    let mut indegree: BTreeMap<T, usize> = universe.iter().map(|v| (*v, 0)).collect();
    let mut successors: BTreeMap<T, Vec<T>> = BTreeMap::new();
    for (from, to) in edges {
        if !universe.contains(from) || !universe.contains(to) {
            continue;
        }
        successors.entry(*from).or_default().push(*to);
        *indegree.get_mut(to).expect("vertex in universe") += 1;
    }

    let mut ready: BinaryHeap<Reverse<T>> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(v, _)| Reverse(*v))
        .collect();
    let mut order = Vec::with_capacity(universe.len());
    while let Some(Reverse(v)) = ready.pop() {
        order.push(v);
        if let Some(next) = successors.get(&v) {
            for n in next {
                let d = indegree.get_mut(n).expect("vertex in universe");
                *d -= 1;
                if *d == 0 {
                    ready.push(Reverse(*n));
                }
            }
        }
    }

    if order.len() == universe.len() {
        Some(order)
    } else {
        None
    }
}

/// Connected components of `vertices` under the undirected closure of
/// `edges`, each component sorted ascending, components ordered by their
/// smallest member.
pub(crate) fn connected_components(
    vertices: &[NodeId],
    edges: &[(NodeId, NodeId)],
) -> Vec<Vec<NodeId>> {
    let mut adjacency: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
    for (a, b) in edges {
        adjacency.entry(*a).or_default().push(*b);
        adjacency.entry(*b).or_default().push(*a);
    }
    let mut seen: BTreeSet<NodeId> = BTreeSet::new();
    let mut components = Vec::new();
    for start in vertices {
        if seen.contains(start) {
            continue;
        }
        let mut component = BTreeSet::new();
        let mut stack = vec![*start];
        while let Some(v) = stack.pop() {
            if !seen.insert(v) {
                continue;
            }
            component.insert(v);
            if let Some(next) = adjacency.get(&v) {
                stack.extend(next.iter().copied());
            }
        }
        components.push(component.into_iter().collect());
    }
    components
}
