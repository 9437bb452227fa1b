//! Graph Snapshots
//!
//! A point-in-time, serializable picture of the current thread's graph for
//! debugging and devtools. Taking a snapshot never evaluates anything.

use serde::Serialize;

use crate::reactive::{with_runtime, ScopeId};

use super::node::{NodeId, NodeKind, NodeStatus};

/// One node in a [`GraphSnapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub kind: NodeKind,
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub owner: Option<ScopeId>,
    pub dependencies: Vec<NodeId>,
    pub dependents: Vec<NodeId>,
    pub changed_at: u64,
    pub verified_at: u64,
}

/// The state of a runtime's graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    /// Current revision. Advances on every effective write.
    pub revision: u64,

    /// Live nodes, in arena order.
    pub nodes: Vec<NodeSnapshot>,

    /// Reactions queued for the next pass.
    pub pending: Vec<NodeId>,

    /// Number of live scopes, including the root.
    pub scopes: usize,
}

impl GraphSnapshot {
    /// Find a node by ID.
    pub fn node(&self, id: NodeId) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Count nodes of one kind.
    pub fn count(&self, kind: NodeKind) -> usize {
        self.nodes.iter().filter(|node| node.kind == kind).count()
    }

    /// Serialize as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Capture the current thread's graph.
pub fn snapshot() -> GraphSnapshot {
    with_runtime(|rt| {
        let graph = rt.graph.borrow();
        let nodes = graph
            .iter()
            .map(|(id, node)| NodeSnapshot {
                id,
                kind: node.kind(),
                status: node.status(),
                label: node.label().map(str::to_owned),
                owner: node.owner(),
                dependencies: node.dependencies().iter().copied().collect(),
                dependents: node.dependents().iter().copied().collect(),
                changed_at: node.changed_at(),
                verified_at: node.verified_at(),
            })
            .collect();

        GraphSnapshot {
            revision: rt.scheduler.revision(),
            nodes,
            pending: rt.scheduler.pending(),
            scopes: rt.scopes.borrow().len(),
        }
    })
}
