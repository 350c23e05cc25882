//! Error kinds surfaced by the framework.
//!
//! Every fatal condition the planner, memory runtime, registry, or lifecycle
//! executor can hit maps to exactly one [`PipelineError`] variant, so callers
//! can match on the kind instead of parsing message strings. Step-budget
//! overflow is deliberately *not* represented here: it is a recoverable
//! diagnostic recorded by the progress subsystem (see
//! [`StepOverflow`](crate::progress::StepOverflow)) while execution continues.
//!
//! All fatals unwind the current phase; scoped resources (the active progress
//! sink, datastructure slots) are released on the way out.

use crate::node::NodeState;
use crate::token::NodeId;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Fatal error conditions raised by the framework.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// `go()` was dispatched to (or left defaulted on) a node that is not a
    /// phase initiator.
    #[error("`go` invoked on non-initiator node `{node}`")]
    NotInitiatorNode {
        /// Breadcrumb of the offending node.
        node: String,
    },

    /// A lifecycle hook was driven out of order.
    #[error(
        "lifecycle violation on `{node}`: `{hook}` requires state {expected:?}, found {found:?}"
    )]
    LifecycleViolation {
        /// Breadcrumb of the offending node.
        node: String,
        /// The hook that was about to run.
        hook: &'static str,
        /// State the node had to be in.
        expected: NodeState,
        /// State the node was actually in.
        found: NodeState,
    },

    /// The sum of minimum memory requests exceeds the phase budget.
    #[error("insufficient memory: minimum requests total {required} bytes, budget is {budget}")]
    InsufficientMemory {
        /// Sum of all minimum requests in the phase.
        required: u64,
        /// The budget the phase was given.
        budget: u64,
    },

    /// `set`/`get` on a datastructure name nobody registered.
    #[error("datastructure `{name}` is not registered")]
    UnregisteredDatastructure {
        /// The unknown datastructure name.
        name: String,
    },

    /// A typed fetch found a value of a different type.
    #[error("type mismatch for `{what}`: requested `{requested}`, stored `{stored}`")]
    TypeMismatch {
        /// The key or datastructure name that was fetched.
        what: String,
        /// Type the caller asked for.
        requested: &'static str,
        /// Type actually stored.
        stored: &'static str,
    },

    /// The phase graph (or the item-flow projection inside a phase) has a
    /// cycle.
    #[error("phase graph contains a cycle")]
    CyclicPhases,

    /// A phase has zero or more than one initiator node.
    #[error("phase {phase} has {found} initiator node(s), expected exactly one")]
    NoOrMultipleInitiators {
        /// Index of the phase in planner order.
        phase: usize,
        /// Number of initiators found.
        found: usize,
    },

    /// An id named by an edge or plan has no live node behind it.
    #[error("no node registered for id {id:?}")]
    UnknownNode {
        /// The dangling id.
        id: NodeId,
    },

    /// `fetch` on a key that was never forwarded to this node.
    #[error("no forwarded value for key `{key}`")]
    UnknownKey {
        /// The missing key.
        key: String,
    },
}
