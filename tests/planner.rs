use millrace::{NodeCore, NodeMap, PipelineError, plan};
use std::collections::BTreeSet;

fn cores(map: &NodeMap, n: usize) -> Vec<NodeCore> {
    (0..n).map(|_| NodeCore::new(map)).collect()
}

#[test]
fn linear_push_chain_is_one_phase() {
    let map = NodeMap::new();
    let v = cores(&map, 3);
    v[0].add_push_destination(v[1].token());
    v[1].add_push_destination(v[2].token());

    let plan = plan(&map).unwrap();

    assert_eq!(plan.phases.len(), 1);
    let phase = &plan.phases[0];
    assert_eq!(phase.nodes, vec![v[0].id(), v[1].id(), v[2].id()]);
    assert_eq!(phase.initiator, v[0].id());
    assert!(phase.evacuation_candidates.is_empty());
}

#[test]
fn buffered_push_splits_phases() {
    let map = NodeMap::new();
    let v = cores(&map, 3);
    v[0].add_push_destination(v[1].token());
    v[1].add_buffered_push_destination(v[2].token());

    let plan = plan(&map).unwrap();

    assert_eq!(plan.phases.len(), 2);
    assert_eq!(plan.phases[0].nodes, vec![v[0].id(), v[1].id()]);
    assert_eq!(plan.phases[1].nodes, vec![v[2].id()]);
    // The producer of the buffered edge is asked to evacuate.
    assert_eq!(plan.phases[0].evacuation_candidates, vec![v[1].id()]);
    // A single node is its own initiator.
    assert_eq!(plan.phases[1].initiator, v[2].id());
}

#[test]
fn pull_chain_initiator_is_the_final_consumer() {
    let map = NodeMap::new();
    let v = cores(&map, 3);
    // v2 pulls from v1, v1 pulls from v0: the consumer drives.
    v[2].add_pull_source(v[1].token());
    v[1].add_pull_source(v[0].token());

    let plan = plan(&map).unwrap();

    assert_eq!(plan.phases.len(), 1);
    let phase = &plan.phases[0];
    // Item flow still runs producer -> consumer.
    assert_eq!(phase.nodes, vec![v[0].id(), v[1].id(), v[2].id()]);
    assert_eq!(phase.initiator, v[2].id());
}

#[test]
fn buffered_pull_marks_the_producer_for_evacuation() {
    let map = NodeMap::new();
    let v = cores(&map, 2);
    v[1].add_buffered_pull_source(v[0].token());

    let plan = plan(&map).unwrap();

    assert_eq!(plan.phases.len(), 2);
    assert_eq!(plan.phases[0].nodes, vec![v[0].id()]);
    assert_eq!(plan.phases[1].nodes, vec![v[1].id()]);
    assert_eq!(plan.phases[0].evacuation_candidates, vec![v[0].id()]);
}

#[test]
fn dependency_edge_orders_phases() {
    let map = NodeMap::new();
    let v = cores(&map, 2);
    v[1].add_dependency(v[0].token());

    let plan = plan(&map).unwrap();

    assert_eq!(plan.phases.len(), 2);
    assert_eq!(plan.phases[0].nodes, vec![v[0].id()]);
    assert_eq!(plan.phases[1].nodes, vec![v[1].id()]);
    // Dependency edges carry no items: nothing to evacuate.
    assert!(plan.phases[0].evacuation_candidates.is_empty());
}

#[test]
fn dependency_cycle_is_rejected() {
    let map = NodeMap::new();
    let v = cores(&map, 2);
    v[1].add_dependency(v[0].token());
    v[0].add_dependency(v[1].token());

    let err = plan(&map).unwrap_err();
    assert!(matches!(err, PipelineError::CyclicPhases));
}

#[test]
fn item_flow_cycle_is_rejected() {
    let map = NodeMap::new();
    let v = cores(&map, 2);
    v[0].add_push_destination(v[1].token());
    v[1].add_push_destination(v[0].token());

    let err = plan(&map).unwrap_err();
    assert!(matches!(err, PipelineError::CyclicPhases));
}

#[test]
fn boundary_edge_inside_one_phase_is_rejected() {
    let map = NodeMap::new();
    let v = cores(&map, 2);
    // The plain edge forces one phase, the buffered edge demands two.
    v[0].add_push_destination(v[1].token());
    v[0].add_buffered_push_destination(v[1].token());

    let err = plan(&map).unwrap_err();
    assert!(matches!(err, PipelineError::CyclicPhases));
}

#[test]
fn two_sources_in_one_phase_are_rejected() {
    let map = NodeMap::new();
    let v = cores(&map, 3);
    v[0].add_push_destination(v[2].token());
    v[1].add_push_destination(v[2].token());

    let err = plan(&map).unwrap_err();
    match err {
        PipelineError::NoOrMultipleInitiators { phase, found } => {
            assert_eq!(phase, 0);
            assert_eq!(found, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn diamond_ties_break_by_ascending_id() {
    let map = NodeMap::new();
    let v = cores(&map, 4);
    v[0].add_push_destination(v[1].token());
    v[0].add_push_destination(v[2].token());
    v[1].add_push_destination(v[3].token());
    v[2].add_push_destination(v[3].token());

    let plan = plan(&map).unwrap();

    assert_eq!(plan.phases.len(), 1);
    assert_eq!(
        plan.phases[0].nodes,
        vec![v[0].id(), v[1].id(), v[2].id(), v[3].id()]
    );
}

#[test]
fn replanning_an_unchanged_graph_is_stable() {
    let map = NodeMap::new();
    let v = cores(&map, 5);
    v[0].add_push_destination(v[1].token());
    v[0].add_push_destination(v[2].token());
    v[1].add_push_destination(v[3].token());
    v[2].add_push_destination(v[3].token());
    v[3].add_buffered_push_destination(v[4].token());

    let first = plan(&map).unwrap();
    let second = plan(&map).unwrap();

    assert_eq!(first, second);
}

#[test]
fn every_node_lands_in_exactly_one_phase() {
    let map = NodeMap::new();
    let v = cores(&map, 6);
    v[0].add_push_destination(v[1].token());
    v[1].add_buffered_push_destination(v[2].token());
    v[3].add_dependency(v[2].token());
    // v4 and v5 stay isolated: each is its own phase.

    let plan = plan(&map).unwrap();

    let mut seen = BTreeSet::new();
    for phase in &plan.phases {
        for id in &phase.nodes {
            assert!(seen.insert(*id), "{id:?} planned twice");
        }
    }
    let all: BTreeSet<_> = v.iter().map(|c| c.id()).collect();
    assert_eq!(seen, all);
}

#[test]
fn isolated_node_is_its_own_initiator() {
    let map = NodeMap::new();
    let v = cores(&map, 1);

    let plan = plan(&map).unwrap();

    assert_eq!(plan.phases.len(), 1);
    assert_eq!(plan.phases[0].initiator, v[0].id());
}
