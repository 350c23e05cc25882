//! # Millrace
//!
//! A **phased dataflow node framework** for Rust, built for out-of-core
//! computations: graphs whose intermediate data does not fit in memory and
//! whose execution therefore splits into sequential phases separated by
//! buffered hand-offs.
//!
//! ## Key Features
//!
//! - **Declarative node graphs** - nodes declare push destinations, pull
//!   sources, and execution dependencies; three projections (actor,
//!   item-flow, dependency) are derived from one registry
//! - **Phase planning** - buffered edges and dependencies induce phase
//!   boundaries; phases and their members are ordered deterministically
//! - **Memory budgeting** - a per-phase budget is split proportionally
//!   across nodes and shared datastructures, respecting min/max requests
//! - **Metadata forwarding** - typed side-band values flow along the
//!   item-flow graph with explicit-overrides-implicit semantics
//! - **Progress accounting** - per-node step budgets feed a phase-level
//!   indicator; budget overflows are recorded, never fatal
//! - **Strict lifecycle** - `prepare → propagate → begin → go → end →
//!   evacuate`, asserted by a state machine
//!
//! ## Quick Start
//!
//! ```
//! use millrace::testing::{Journal, RecordingNode};
//! use millrace::{NodeMap, Runner};
//!
//! # fn main() -> anyhow::Result<()> {
//! let map = NodeMap::new();
//! let journal = Journal::new();
//!
//! // A two-node push pipeline: source -> sink, one phase.
//! let source = RecordingNode::new(&map, "source", &journal)
//!     .as_initiator()
//!     .with_steps(100)
//!     .with_memory(1 << 20, 8 << 20, 1.0);
//! let sink = RecordingNode::new(&map, "sink", &journal)
//!     .with_memory(1 << 20, 8 << 20, 2.0);
//! source.core().add_push_destination(sink.core().token());
//!
//! let report = Runner::new(64 << 20).run(vec![source.boxed(), sink.boxed()])?;
//! assert_eq!(report.phases.len(), 1);
//!
//! // Consumers begin before producers; producers end before consumers.
//! journal.assert_before("sink:begin", "source:begin");
//! journal.assert_before("source:end", "sink:end");
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### `NodeMap`
//!
//! The [`NodeMap`] is the shared registry behind a graph. Every node
//! registers on construction and receives a [`Token`]; relating two nodes
//! that live in different maps links the maps into one. All per-node
//! bookkeeping lives in the map, keyed by id, so node values can be moved
//! freely.
//!
//! ### Nodes
//!
//! A node is any type implementing [`PipelineNode`] and embedding a
//! [`NodeCore`]:
//!
//! ```
//! use millrace::{NodeCore, NodeMap, PipelineNode, Result};
//!
//! struct LineCounter {
//!     core: NodeCore,
//! }
//!
//! impl LineCounter {
//!     fn new(map: &NodeMap) -> Self {
//!         let core = NodeCore::new(map);
//!         core.set_steps(1_000);
//!         Self { core }
//!     }
//! }
//!
//! impl PipelineNode for LineCounter {
//!     fn core(&self) -> &NodeCore {
//!         &self.core
//!     }
//!
//!     fn core_mut(&mut self) -> &mut NodeCore {
//!         &mut self.core
//!     }
//!
//!     fn propagate(&mut self) -> Result<()> {
//!         // Tell downstream consumers what to expect.
//!         self.core.forward("n_lines", 42u64);
//!         Ok(())
//!     }
//! }
//! # let _ = LineCounter::new(&NodeMap::new());
//! ```
//!
//! Hooks not overridden fall back to their defaults; only `go` has a
//! failing default, because only a phase initiator may be driven.
//!
//! ### Phases
//!
//! An edge marked *buffered* (and every dependency edge) is a phase
//! boundary: the producer's phase runs to completion, the producer
//! evacuates if it can, and only then does the consumer's phase begin.
//! Within a phase everything is synchronous on one thread; the framework
//! introduces no parallelism.
//!
//! ### Memory
//!
//! Each phase gets the runner's budget. Every node contributes a consumer
//! (min/max bytes plus a weight), and every registered datastructure
//! contributes one more, shared across its registrants. Assignments are
//! written back before `propagate` runs and stay immutable for the phase.
//!
//! ### Progress
//!
//! Nodes declare a step budget and charge it as they work; charges flow to
//! the [`ProgressSink`](progress::ProgressSink) attached to the runner.
//! Driving a budget below zero records a
//! [`StepOverflow`](progress::StepOverflow) diagnostic and clamps - the
//! run itself continues.

pub mod error;
pub mod forwarding;
pub mod graph;
pub mod memory;
pub mod node;
pub mod node_map;
pub mod planner;
pub mod progress;
pub mod runner;
pub mod testing;
pub mod token;
pub mod value;

pub use error::{PipelineError, Result};
pub use forwarding::ForwardedValue;
pub use graph::{Edge, Relation, Relations};
pub use memory::PhaseAssignment;
pub use node::{NamePriority, NodeCore, NodeState, PipelineNode, PlotOptions};
pub use node_map::NodeMap;
pub use planner::{Phase, Plan, plan};
pub use progress::{NullProgress, ProgressSink, ProxyProgress, RunReport, StepOverflow, share};
pub use runner::{NodeSet, PhaseDriver, Runner};
pub use token::{NodeId, Token};
pub use value::{AnyValue, TypeTag};
