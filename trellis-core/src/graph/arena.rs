//! Node Arena
//!
//! Nodes are stored in a slab indexed by [`NodeId`]. Edges are kept on both
//! ends (dependencies and dependents) so marking walks downstream and
//! refreshing walks upstream without any search.
//!
//! Removing a node bumps its slot's generation, so stale handles to a
//! disposed node never alias whatever occupies the slot next.

use std::collections::HashSet;

use indexmap::IndexSet;

use super::node::{Node, NodeId, NodeStatus};

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Slab storage for graph nodes.
#[derive(Default)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    inserted: u64,
}

impl Arena {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a node to the graph.
    pub(crate) fn insert(&mut self, mut node: Node) -> NodeId {
        self.live += 1;
        self.inserted += 1;
        node.set_sequence(self.inserted);
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId::new(index, slot.generation);
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeId::new(index, 0)
    }

    /// Remove a node from the graph, along with every edge touching it.
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index());
        self.live -= 1;

        for dep in node.dependencies() {
            if let Some(dep_node) = self.get_mut(*dep) {
                dep_node.remove_dependent(id);
            }
        }
        for dependent in node.dependents() {
            if let Some(dependent_node) = self.get_mut(*dependent) {
                dependent_node.remove_dependency(id);
            }
        }
        Some(node)
    }

    /// Get a reference to a live node.
    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_ref())
    }

    /// Get a mutable reference to a live node.
    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.node.as_mut())
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Status of a node; removed nodes report `Disposed`.
    pub(crate) fn status(&self, id: NodeId) -> NodeStatus {
        self.get(id).map_or(NodeStatus::Disposed, Node::status)
    }

    /// Revision at which a node's value last changed. Removed nodes never
    /// count as changed.
    pub(crate) fn changed_at(&self, id: NodeId) -> u64 {
        self.get(id).map_or(0, Node::changed_at)
    }

    /// Creation order of a node. Removed nodes sort last.
    pub(crate) fn sequence(&self, id: NodeId) -> u64 {
        self.get(id).map_or(u64::MAX, Node::sequence)
    }

    /// Add a dependency edge: `dependent` reads `dependency`.
    pub(crate) fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if !self.contains(dependency) {
            return;
        }
        let Some(dependent_node) = self.get_mut(dependent) else {
            return;
        };
        if dependent_node.add_dependency(dependency) {
            if let Some(dep_node) = self.get_mut(dependency) {
                dep_node.add_dependent(dependent);
            }
        }
    }

    /// Remove a dependency edge.
    pub(crate) fn remove_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.get_mut(dependency) {
            dep_node.remove_dependent(dependent);
        }
        if let Some(dependent_node) = self.get_mut(dependent) {
            dependent_node.remove_dependency(dependency);
        }
    }

    /// Drop every dependency of `id` that is not in `keep`.
    ///
    /// Called after an evaluation: edges read this run were added as they
    /// happened, so only the edges left over from the previous run go.
    pub(crate) fn retain_dependencies(&mut self, id: NodeId, keep: &IndexSet<NodeId>) {
        let Some(node) = self.get(id) else {
            return;
        };
        let dropped: Vec<NodeId> = node
            .dependencies()
            .iter()
            .filter(|dep| !keep.contains(*dep))
            .copied()
            .collect();
        for dep in dropped {
            tracing::trace!(node = %id, dependency = %dep, "dependency dropped");
            self.remove_edge(dep, id);
        }
    }

    /// Unlink the dependencies of `id` added since `prior` that close a
    /// cycle, i.e. that themselves depend on `id`. Other new edges stay.
    pub(crate) fn unlink_cycles_since(&mut self, id: NodeId, prior: &[NodeId]) {
        let Some(node) = self.get(id) else {
            return;
        };
        let cyclic: Vec<NodeId> = node
            .dependencies()
            .iter()
            .filter(|dep| !prior.contains(*dep) && self.reaches(id, **dep))
            .copied()
            .collect();
        for dep in cyclic {
            tracing::trace!(node = %id, dependency = %dep, "cyclic edge unlinked");
            self.remove_edge(dep, id);
        }
    }

    /// Whether `target` is a transitive dependent of `from`.
    fn reaches(&self, from: NodeId, target: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            let Some(node) = self.get(id) else {
                continue;
            };
            for &next in node.dependents() {
                if next == target {
                    return true;
                }
                if visited.insert(next) {
                    stack.push(next);
                }
            }
        }
        false
    }

    /// Number of live nodes.
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Iterate over live nodes.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let node = slot.node.as_ref()?;
            let index = u32::try_from(index).ok()?;
            Some((NodeId::new(index, slot.generation), node))
        })
    }
}
