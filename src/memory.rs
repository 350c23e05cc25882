//! The per-phase memory runtime.
//!
//! Given a phase and a total budget, the runtime distributes memory across
//! the phase's consumers: every node is one consumer (weighted by its
//! memory fraction), and every registered datastructure is one more (shared
//! names count once, whatever the number of registrants). All consumers
//! start at their declared minimum; the remainder is split proportionally to
//! weights, clamping into `[min, max]` and redistributing the excess of
//! clamped consumers until a fixed point. Each round fixes at least one
//! consumer, so the iteration is linear in the consumer count.
//!
//! Fractional results are rounded to integers by largest remainder, never
//! exceeding the budget; on equal remainders the lower-keyed consumer rounds
//! down. All orderings ascend by (token id, name), so the same phase and
//! budget always produce the same assignment.

use crate::error::{PipelineError, Result};
use crate::node_map::NodeMap;
use crate::planner::Phase;
use crate::token::NodeId;
use ordered_float::OrderedFloat;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Identity of one memory consumer: the owning node (for datastructures,
/// the smallest registrant in the phase) plus the datastructure name.
type ConsumerKey = (NodeId, Option<String>);

/// One memory request fed to the solver.
#[derive(Clone, Debug)]
struct Request {
    key: ConsumerKey,
    min: u64,
    max: u64,
    weight: f64,
}

/// Memory assigned to one phase, by consumer.
#[derive(Clone, Debug, Default)]
pub struct PhaseAssignment {
    /// Per-node assignments, ascending by id.
    pub nodes: Vec<(NodeId, u64)>,
    /// Per-datastructure assignments, ascending by name.
    pub datastructures: Vec<(String, u64)>,
}

/// Solve the phase's allocation problem and write the results back: each
/// node's available memory and each datastructure's assigned total.
///
/// # Errors
///
/// [`PipelineError::InsufficientMemory`] when the minimum requests alone
/// exceed `budget`; [`PipelineError::UnknownNode`] when the phase names an
/// unregistered node.
pub fn assign(map: &NodeMap, phase: &Phase, budget: u64) -> Result<PhaseAssignment> {
    let mut requests = Vec::new();
    let mut datastructures: BTreeMap<String, NodeId> = BTreeMap::new();

    for id in &phase.nodes {
        let (min, max, weight) = map.node_memory_params(*id)?;
        requests.push(Request {
            key: (*id, None),
            min,
            max: max.max(min),
            weight,
        });
        for name in map.node_datastructure_names(*id)? {
            datastructures
                .entry(name)
                .and_modify(|owner| *owner = (*owner).min(*id))
                .or_insert(*id);
        }
    }
    for (name, owner) in &datastructures {
        let (min, max, weight) = map.datastructure_bounds(name)?;
        requests.push(Request {
            key: (*owner, Some(name.clone())),
            min,
            max: max.max(min),
            weight,
        });
    }
    requests.sort_by(|a, b| a.key.cmp(&b.key));

    let amounts = solve(&requests, budget)?;

    let mut assignment = PhaseAssignment::default();
    for (request, amount) in requests.iter().zip(&amounts) {
        match &request.key {
            (id, None) => {
                map.set_available_memory(*id, *amount)?;
                assignment.nodes.push((*id, *amount));
            }
            (_, Some(name)) => {
                map.set_datastructure_memory(name, *amount);
                assignment.datastructures.push((name.clone(), *amount));
            }
        }
    }
    assignment.nodes.sort_by_key(|(id, _)| *id);
    assignment.datastructures.sort_by(|a, b| a.0.cmp(&b.0));

    debug!(
        phase = phase.index,
        budget,
        consumers = requests.len(),
        "assigned phase memory"
    );
    Ok(assignment)
}

/// Proportional allocation with clamping, iterated to fixed point, then
/// rounded by largest remainder. `requests` must be sorted by key.
fn solve(requests: &[Request], budget: u64) -> Result<Vec<u64>> {
    let base: u64 = requests.iter().map(|r| r.min).sum();
    if base > budget {
        return Err(PipelineError::InsufficientMemory {
            required: base,
            budget,
        });
    }

    let mut exact: Vec<f64> = requests.iter().map(|r| r.min as f64).collect();
    let mut pool = (budget - base) as f64;
    let mut active: BTreeSet<usize> = requests
        .iter()
        .enumerate()
        .filter(|(_, r)| r.weight > 0.0 && r.max > r.min)
        .map(|(i, _)| i)
        .collect();

    while pool > 0.0 && !active.is_empty() {
        let total_weight: f64 = active.iter().map(|i| requests[*i].weight).sum();
        if total_weight <= 0.0 {
            break;
        }
        let mut clamped = Vec::new();
        for i in &active {
            let r = &requests[*i];
            let share = r.min as f64 + pool * r.weight / total_weight;
            if share >= r.max as f64 {
                clamped.push(*i);
            }
        }
        if clamped.is_empty() {
            for i in &active {
                let r = &requests[*i];
                exact[*i] = r.min as f64 + pool * r.weight / total_weight;
            }
            break;
        }
        // Fix the clamped consumers at their maximum and redistribute the
        // rest in the next round.
        for i in clamped {
            let r = &requests[i];
            exact[i] = r.max as f64;
            pool -= (r.max - r.min) as f64;
            active.remove(&i);
        }
        if pool < 0.0 {
            pool = 0.0;
        }
    }

    round_preserving_budget(requests, &exact, budget)
}

/// Largest-remainder rounding: floor everything, then hand the leftover
/// whole units to the largest fractional remainders. On a tie the
/// lower-keyed consumer rounds down (the spare unit goes to the higher
/// key). The rounded sum never exceeds `budget`.
fn round_preserving_budget(requests: &[Request], exact: &[f64], budget: u64) -> Result<Vec<u64>> {
    let mut amounts: Vec<u64> = exact.iter().map(|v| v.floor() as u64).collect();
    let floored: u64 = amounts.iter().sum();
    let total_exact: f64 = exact.iter().sum();
    let target = ((total_exact + 1e-6).floor() as u64).min(budget);
    let mut pool = target.saturating_sub(floored);

    let mut candidates: Vec<(OrderedFloat<f64>, usize)> = exact
        .iter()
        .enumerate()
        .filter(|(i, _)| amounts[*i] < requests[*i].max)
        .map(|(i, v)| (OrderedFloat(v.fract()), i))
        .collect();
    candidates.sort();
    while pool > 0 {
        let Some((_, i)) = candidates.pop() else {
            break;
        };
        if amounts[i] < requests[i].max {
            amounts[i] += 1;
            pool -= 1;
        }
    }
    Ok(amounts)
}
