//! Typed side-band metadata on the item-flow graph.
//!
//! Nodes communicate out-of-band facts (item counts, key ranges, sort
//! orders) by *forwarding* typed key/value entries. An entry is either
//! explicit (authoritative, written by a node that knows) or implicit (a
//! default that loses to any explicit entry downstream).
//!
//! Propagation happens once per phase, during the `propagate` pass: after a
//! node's own `propagate` hook ran, its table is copied along every outgoing
//! item-flow edge. A downstream node holding its own explicit entry for a
//! key is a propagation sink for that key: implicit incomings are dropped
//! there, and its own value is what continues further downstream.

use crate::error::Result;
use crate::node_map::NodeMap;
use crate::token::NodeId;
use crate::value::AnyValue;

/// A forwarded entry: the typed value plus its authority flag.
#[derive(Clone, Debug)]
pub struct ForwardedValue {
    /// The type-erased payload.
    pub value: AnyValue,
    /// Explicit entries are sticky: implicit writes never replace them.
    pub explicit: bool,
}

impl ForwardedValue {
    /// An authoritative entry.
    #[must_use]
    pub fn explicit(value: AnyValue) -> Self {
        Self {
            value,
            explicit: true,
        }
    }

    /// A default entry, replaced by any explicit one.
    #[must_use]
    pub fn implicit(value: AnyValue) -> Self {
        Self {
            value,
            explicit: false,
        }
    }
}

/// Copy `from`'s forwarded table to each of `targets`, honoring the
/// explicit-overrides-implicit rule at every hop.
///
/// # Errors
///
/// [`PipelineError::UnknownNode`](crate::PipelineError::UnknownNode) if an
/// endpoint has no live record.
pub(crate) fn flow_from(map: &NodeMap, from: NodeId, targets: &[NodeId]) -> Result<()> {
    let entries = map.forwarded_snapshot(from)?;
    for target in targets {
        for (key, entry) in &entries {
            map.forward(*target, key, entry.clone())?;
        }
    }
    Ok(())
}
