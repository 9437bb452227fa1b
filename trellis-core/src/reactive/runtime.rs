//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects sources,
//! derivations, and reactions. It owns the dependency graph, the scope
//! tree, the scheduler state, and the tracking stack.
//!
//! # How It Works
//!
//! 1. When a node is created, it registers with the runtime under the
//!    current scope.
//!
//! 2. When a derivation or reaction reads a node, the runtime records the
//!    dependency edge in both directions.
//!
//! 3. When a source is written, the runtime:
//!    a. Bumps the revision and stamps the source as changed
//!    b. Marks every transitive dependent stale
//!    c. Queues the reactions it reached
//!    d. Runs a stabilization pass unless a batch or pass is already open
//!
//! # Threading
//!
//! The engine is single-threaded. Each thread lazily gets its own runtime,
//! so handles must stay on the thread that created them.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};

use crate::config::{DisposedAccess, RuntimeConfig};
use crate::error::{ReactiveError, Result};
use crate::graph::{Arena, Node, NodeBody, NodeId, NodeKind, NodeStatus, Scheduler};

use super::context::TrackingStack;
use super::scope::{Owned, ScopeId, ScopeTree};

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

/// Run `f` against the current thread's runtime.
pub(crate) fn with_runtime<R>(f: impl FnOnce(&Runtime) -> R) -> R {
    RUNTIME.with(f)
}

/// Per-thread reactive runtime.
///
/// Every field is behind a `Cell`/`RefCell` and borrowed only for short,
/// non-reentrant sections: user code is never called while a borrow is held.
pub(crate) struct Runtime {
    pub(crate) graph: RefCell<Arena>,
    pub(crate) scheduler: Scheduler,
    pub(crate) scopes: RefCell<ScopeTree>,
    pub(crate) current_scope: Cell<ScopeId>,
    pub(crate) tracking: TrackingStack,
    pub(crate) config: RefCell<RuntimeConfig>,
}

impl Runtime {
    fn new() -> Self {
        let scopes = ScopeTree::new();
        let root = scopes.root();
        Self {
            graph: RefCell::new(Arena::new()),
            scheduler: Scheduler::new(),
            scopes: RefCell::new(scopes),
            current_scope: Cell::new(root),
            tracking: TrackingStack::default(),
            config: RefCell::new(RuntimeConfig::default()),
        }
    }

    pub(crate) fn current_scope(&self) -> ScopeId {
        self.current_scope.get()
    }

    /// Register a new node under the current scope.
    pub(crate) fn register(&self, kind: NodeKind, body: NodeBody) -> NodeId {
        let scope = self.current_scope();
        let id = self
            .graph
            .borrow_mut()
            .insert(Node::new(kind, body, Some(scope)));
        if !self.scopes.borrow_mut().adopt(scope, Owned::Node(id)) {
            tracing::warn!(node = %id, scope = scope.raw(), "node created in a disposed scope");
        }
        tracing::trace!(node = %id, ?kind, "node registered");
        id
    }

    /// Attach a debug label to a node.
    pub(crate) fn label(&self, id: NodeId, label: Cow<'static, str>) {
        if let Some(node) = self.graph.borrow_mut().get_mut(id) {
            node.set_label(label);
        }
    }

    pub(crate) fn is_alive(&self, id: NodeId) -> bool {
        self.graph.borrow().contains(id)
    }

    pub(crate) fn status(&self, id: NodeId) -> NodeStatus {
        self.graph.borrow().status(id)
    }

    /// Register `dependency` as read by the current observer.
    pub(crate) fn track(&self, dependency: NodeId) {
        if let Some(observer) = self.tracking.record(dependency) {
            tracing::trace!(node = %observer, dependency = %dependency, "dependency tracked");
            self.graph.borrow_mut().add_edge(dependency, observer);
        }
    }

    /// Record that a writable node's visible value changed, mark its
    /// downstream stale, and stabilize unless a batch or pass is open.
    pub(crate) fn notify_changed(&self, id: NodeId) -> Result<()> {
        let revision = self.scheduler.bump_revision();
        let marked = {
            let mut graph = self.graph.borrow_mut();
            match graph.get_mut(id) {
                Some(node) => node.mark_changed(revision),
                None => return Ok(()),
            }
            self.scheduler.mark_dependents(&mut graph, id)
        };
        tracing::debug!(node = %id, revision, marked, "value changed");
        self.flush()
    }

    /// Force a derivation to re-evaluate and mark everything downstream of
    /// it stale.
    pub(crate) fn invalidate(&self, id: NodeId) -> Result<()> {
        self.scheduler.bump_revision();
        {
            let mut graph = self.graph.borrow_mut();
            let Some(node) = graph.get_mut(id) else {
                return Ok(());
            };
            node.force();
            node.mark_stale();
            if node.is_reaction() {
                self.scheduler.enqueue(id);
            }
            self.scheduler.mark_dependents(&mut graph, id);
        }
        self.flush()
    }

    /// Outcome of accessing a disposed node under the configured policy.
    pub(crate) fn disposed_access(&self, id: NodeId) -> Result<()> {
        match self.config.borrow().disposed_access {
            DisposedAccess::Lenient => {
                tracing::debug!(node = %id, "ignoring access to disposed node");
                Ok(())
            }
            DisposedAccess::Strict => Err(ReactiveError::Disposed { node: id }),
        }
    }

    /// Remove a node from the graph and release everything it holds.
    pub(crate) fn dispose_node(&self, id: NodeId) {
        let removed = self.graph.borrow_mut().remove(id);
        let Some(node) = removed else {
            return;
        };
        self.scheduler.forget(id);
        if let Some(owner) = node.owner() {
            self.scopes.borrow_mut().forget_child(owner, Owned::Node(id));
        }
        tracing::debug!(node = %id, kind = ?node.kind(), "node disposed");

        if let NodeBody::Reaction(exec) = node.body() {
            exec.teardown();
        }
        if let Some(scope) = node.scope() {
            self.dispose_scope(scope);
        }
    }
}
