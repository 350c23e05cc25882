//! Node identities.
//!
//! Each node registered in a [`NodeMap`](crate::node_map::NodeMap) owns a
//! [`Token`]: a unique [`NodeId`] plus a handle to the map it lives in. Two
//! tokens are equal iff they carry the same id *and* resolve to the same
//! canonical map. Ids are small, `Copy`, and hashable, so planners and the
//! runner use them as keys everywhere.
//!
//! Ids are minted from a process-wide counter. That keeps them unique across
//! maps that are later linked together, and makes creation order the
//! deterministic ascending-id tie-break the planner and memory runtime rely
//! on.

use crate::node_map::NodeMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Unique numeric identifier for a node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Mint the next fresh id.
    pub(crate) fn fresh() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Return the underlying numeric value.
    ///
    /// Useful mainly for debugging or serialization.
    #[must_use]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A node's identity: its id and the map it is registered in.
///
/// Tokens are freely clonable; a clone carries the same id, so identity is
/// preserved when a node value is moved or copied. All per-node bookkeeping
/// lives in the map, keyed by id, so nothing has to be re-pointed.
#[derive(Clone, Debug)]
pub struct Token {
    id: NodeId,
    map: NodeMap,
}

impl Token {
    pub(crate) fn new(id: NodeId, map: NodeMap) -> Self {
        Self { id, map }
    }

    /// The node's id.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The map this token is registered in (canonical handle).
    #[must_use]
    pub fn map(&self) -> NodeMap {
        self.map.canonical()
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.map.canonical() == other.map.canonical()
    }
}

impl Eq for Token {}
