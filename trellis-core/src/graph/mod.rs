//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between reactive values and computations, and the scheduler that
//! settles it after writes.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent sources, derivations, reactions, and async cells
//! - Edges represent dependencies: if A reads B, there is an edge from B to A
//!
//! When a source changes, we traverse the graph to find all affected nodes
//! and mark them stale. The scheduler then determines which stale nodes
//! actually need to recompute.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a slab arena addressed by generational [`NodeId`]s
//!    rather than in reference-counted objects pointing at each other, so
//!    bidirectional edges never form ownership cycles.
//!
//! 2. The node record is a closed enum over the node kinds, so traversal
//!    code handles every kind explicitly.
//!
//! 3. We maintain both forward (dependencies) and reverse (dependents) edges
//!    to enable efficient traversal in both directions.

mod arena;
mod node;
mod scheduler;
mod snapshot;

pub use node::{NodeId, NodeKind, NodeStatus};
pub use snapshot::{snapshot, GraphSnapshot, NodeSnapshot};

pub(crate) use arena::Arena;
pub(crate) use node::{Compute, Execute, Node, NodeBody};
pub(crate) use scheduler::Scheduler;
