use millrace::{NodeCore, NodeMap, Relation};
use std::collections::HashSet;

#[test]
fn tokens_are_unique_and_ordered() {
    let map = NodeMap::new();
    let a = map.make_token();
    let b = map.make_token();

    assert_ne!(a.id(), b.id());
    assert!(a.id() < b.id());
    assert!(a.id().raw() < b.id().raw());
}

#[test]
fn ids_are_hashable_and_deduplicate() {
    let map = NodeMap::new();
    let ids: Vec<_> = (0..50).map(|_| map.make_token().id()).collect();

    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), 50);
}

#[test]
fn token_equality_requires_same_map() {
    let left = NodeMap::new();
    let right = NodeMap::new();
    let a = left.make_token();
    let b = right.make_token();

    assert_eq!(a, a.clone());
    assert_ne!(a, b);
}

#[test]
fn token_identity_survives_node_clone() {
    let map = NodeMap::new();
    let core = NodeCore::new(&map);
    let before = core.id();

    let moved = core.clone();
    drop(core);

    assert_eq!(moved.id(), before);
    // The registry entry is still live and reachable through the clone.
    moved.set_minimum_memory(5);
    assert_eq!(moved.available_memory(), 0);
}

#[test]
fn linking_merges_maps() {
    let left = NodeMap::new();
    let right = NodeMap::new();
    let a = left.make_token();
    let b = right.make_token();
    assert_ne!(a.map(), b.map());

    left.link(&right);

    assert_eq!(a.map(), b.map());
    let ids = a.map().node_ids();
    assert!(ids.contains(&a.id()));
    assert!(ids.contains(&b.id()));
}

#[test]
fn linking_twice_is_identical_to_linking_once() {
    let left = NodeMap::new();
    let right = NodeMap::new();
    let a = left.make_token();
    let b = right.make_token();

    left.link(&right);
    let after_once = a.map().node_ids();

    left.link(&right);
    right.link(&left);

    assert_eq!(a.map().node_ids(), after_once);
    assert_eq!(a.map(), b.map());
}

#[test]
fn linking_is_commutative() {
    let left = NodeMap::new();
    let right = NodeMap::new();
    let a = left.make_token();
    let b = right.make_token();

    right.link(&left);

    assert_eq!(a.map(), b.map());
    assert_eq!(a.map().node_ids(), b.map().node_ids());
}

#[test]
fn relating_across_maps_links_them_first() {
    let left = NodeMap::new();
    let right = NodeMap::new();
    let a = left.make_token();
    let b = right.make_token();

    left.relate(&a, &b, Relation::Push { buffered: false });

    assert_eq!(a.map(), b.map());
    let relations = a.map().relations();
    assert_eq!(relations.push.len(), 1);
    assert_eq!(relations.push[0].from, a.id());
    assert_eq!(relations.push[0].to, b.id());
    assert!(!relations.push[0].buffered);
}

#[test]
fn relations_deduplicate_repeated_edges() {
    let map = NodeMap::new();
    let a = map.make_token();
    let b = map.make_token();

    map.relate(&a, &b, Relation::DependsOn);
    map.relate(&a, &b, Relation::DependsOn);

    assert_eq!(map.relations().dependencies, vec![(a.id(), b.id())]);
}

#[test]
fn three_way_chain_link_collapses_to_one_map() {
    let m1 = NodeMap::new();
    let m2 = NodeMap::new();
    let m3 = NodeMap::new();
    let a = m1.make_token();
    let b = m2.make_token();
    let c = m3.make_token();

    m1.link(&m2);
    m2.link(&m3);

    assert_eq!(a.map(), c.map());
    assert_eq!(a.map().node_ids(), vec![a.id(), b.id(), c.id()]);
}
