//! Graph Nodes
//!
//! This module defines the node records that live in the dependency graph.
//!
//! A node is a closed set of variants: sources, derivations (including
//! linked signals), reactions, and async cells. The typed state of each
//! primitive lives behind its public handle; the graph only keeps what the
//! scheduler needs to traverse and re-evaluate it.

use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use serde::Serialize;

use crate::error::Result;
use crate::reactive::ScopeId;

/// Handle to a node in the dependency graph.
///
/// The index addresses a slot in the arena; the generation distinguishes
/// the current occupant of that slot from earlier, disposed ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the arena.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this node was created.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}v{}", self.index, self.generation)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeKind {
    /// A writable leaf holding a value.
    Source,

    /// A lazily recomputed, cached function of other nodes.
    Derivation,

    /// A derivation whose value can be temporarily overridden.
    LinkedSignal,

    /// An eager side-effecting sink. Never a dependency of anything.
    Reaction,

    /// The state holder of an async cell. Behaves like a source.
    AsyncCell,
}

/// Evaluation status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeStatus {
    /// Up to date with every write seen so far.
    Clean,

    /// Some upstream node changed; must be verified before use.
    Stale,

    /// Currently being evaluated. Reaching it again means a cycle.
    Computing,

    /// Removed from the graph by scope disposal.
    Disposed,
}

/// Re-evaluation hook for derivations.
///
/// Evaluation is two-phase so a failed pass (a detected cycle) can leave
/// the cached value untouched: `run` stages a result, then the scheduler
/// either commits or discards it.
pub(crate) trait Compute {
    /// Run the user computation and stage its result.
    fn run(&self);

    /// The node named by a cycle error in the staged result, if any.
    fn staged_cycle(&self) -> Option<NodeId>;

    /// Replace the cached value with the staged one. Returns whether the
    /// value visible to readers changed.
    fn commit(&self) -> bool;

    /// Drop the staged result.
    fn discard(&self);

    /// Whether reads are served by an override instead of the computation.
    fn is_overridden(&self) -> bool {
        false
    }
}

/// Execution hook for reactions.
pub(crate) trait Execute {
    /// Invoke the cleanup returned by the previous run, if any.
    fn cleanup(&self);

    /// Run the side effect.
    fn execute(&self) -> Result<()>;

    /// Final cleanup on disposal. Runs the pending cleanup callback and
    /// releases the user closure.
    fn teardown(&self);
}

/// Variant payload of a node.
#[derive(Clone)]
pub(crate) enum NodeBody {
    Source,
    Derivation(Rc<dyn Compute>),
    Reaction(Rc<dyn Execute>),
}

/// A node in the dependency graph.
pub(crate) struct Node {
    kind: NodeKind,
    status: NodeStatus,
    body: NodeBody,

    /// Nodes that this node read during its last evaluation.
    dependencies: IndexSet<NodeId>,

    /// Nodes that read this node during their last evaluation.
    dependents: IndexSet<NodeId>,

    /// Scope the node was created in.
    owner: Option<ScopeId>,

    /// Child scope owned by a reaction; reset before every run.
    scope: Option<ScopeId>,

    /// Revision at which the visible value last changed.
    changed_at: u64,

    /// Revision at which the node was last evaluated or verified.
    verified_at: u64,

    /// Evaluate on next refresh regardless of dependency revisions.
    forced: bool,

    /// Marked stale while computing; stays stale after the evaluation ends.
    restale: bool,

    label: Option<Cow<'static, str>>,

    /// Creation order, assigned by the arena.
    sequence: u64,
}

impl Node {
    pub(crate) fn new(kind: NodeKind, body: NodeBody, owner: Option<ScopeId>) -> Self {
        let forced = !matches!(body, NodeBody::Source);
        Self {
            kind,
            status: if forced { NodeStatus::Stale } else { NodeStatus::Clean },
            body,
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
            owner,
            scope: None,
            changed_at: 0,
            verified_at: 0,
            forced,
            restale: false,
            label: None,
            sequence: 0,
        }
    }

    pub(crate) fn kind(&self) -> NodeKind {
        self.kind
    }

    pub(crate) fn status(&self) -> NodeStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: NodeStatus) {
        self.status = status;
    }

    pub(crate) fn body(&self) -> &NodeBody {
        &self.body
    }

    pub(crate) fn is_reaction(&self) -> bool {
        matches!(self.body, NodeBody::Reaction(_))
    }

    pub(crate) fn owner(&self) -> Option<ScopeId> {
        self.owner
    }

    pub(crate) fn scope(&self) -> Option<ScopeId> {
        self.scope
    }

    pub(crate) fn set_scope(&mut self, scope: ScopeId) {
        self.scope = Some(scope);
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    pub(crate) fn changed_at(&self) -> u64 {
        self.changed_at
    }

    pub(crate) fn mark_changed(&mut self, revision: u64) {
        self.changed_at = revision;
    }

    pub(crate) fn verified_at(&self) -> u64 {
        self.verified_at
    }

    pub(crate) fn is_forced(&self) -> bool {
        self.forced
    }

    /// Force re-evaluation on next refresh.
    pub(crate) fn force(&mut self) {
        self.forced = true;
    }

    /// Begin an evaluation.
    pub(crate) fn begin(&mut self) {
        self.status = NodeStatus::Computing;
        self.restale = false;
    }

    /// Finish an evaluation that produced a result at `revision`.
    pub(crate) fn settle(&mut self, revision: u64) {
        self.verified_at = revision;
        self.forced = false;
        self.status = if self.restale {
            NodeStatus::Stale
        } else {
            NodeStatus::Clean
        };
        self.restale = false;
    }

    /// Abandon an evaluation without advancing the node.
    pub(crate) fn abandon(&mut self) {
        self.forced = true;
        self.restale = false;
        self.status = NodeStatus::Stale;
    }

    /// Mark the node stale. Returns `true` when the mark is new and should
    /// propagate downstream.
    pub(crate) fn mark_stale(&mut self) -> bool {
        match self.status {
            NodeStatus::Clean => {
                self.status = NodeStatus::Stale;
                true
            }
            NodeStatus::Computing if !self.restale => {
                self.restale = true;
                true
            }
            NodeStatus::Computing | NodeStatus::Stale | NodeStatus::Disposed => false,
        }
    }

    pub(crate) fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn set_label(&mut self, label: Cow<'static, str>) {
        self.label = Some(label);
    }

    /// Add a dependency (a node that this node reads from).
    pub(crate) fn add_dependency(&mut self, node_id: NodeId) -> bool {
        self.dependencies.insert(node_id)
    }

    /// Remove a dependency.
    pub(crate) fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.shift_remove(&node_id);
    }

    /// Get all dependencies, in first-read order.
    pub(crate) fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    /// Add a dependent (a node that reads from this node).
    pub(crate) fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    /// Remove a dependent.
    pub(crate) fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }

    /// Get all dependents.
    pub(crate) fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("status", &self.status)
            .field("dependencies", &self.dependencies)
            .field("dependents", &self.dependents)
            .field("changed_at", &self.changed_at)
            .field("verified_at", &self.verified_at)
            .finish_non_exhaustive()
    }
}
