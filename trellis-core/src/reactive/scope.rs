//! Scopes
//!
//! A scope is an ownership tree node. Every graph node is registered under
//! the scope that was current when it was created, and disposing a scope
//! disposes everything created inside it: child scopes first (depth-first),
//! then nodes, then the scope's own cleanup callbacks.
//!
//! Scopes also carry context values. [`provide_context`] stores a value on
//! the current scope and [`use_context`] resolves it by walking up the
//! parent chain, which is how a renderer hands state to descendants without
//! threading it through every constructor.
//!
//! ```rust,ignore
//! let scope = Scope::new();
//! scope.run(|| {
//!     let count = Source::new(0);
//!     Reaction::new(move || println!("{}", count.read()))?;
//!     on_cleanup(|| println!("unmounted"));
//!     Ok::<_, ReactiveError>(())
//! })?;
//! scope.dispose(); // runs the reaction's cleanup, then prints "unmounted"
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::graph::NodeId;

use super::runtime::{with_runtime, Runtime};

/// Identifier of a scope in the ownership tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Generate a new unique scope ID.
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Something a scope owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Owned {
    Node(NodeId),
    Scope(ScopeId),
}

#[derive(Default)]
pub(crate) struct ScopeData {
    parent: Option<ScopeId>,
    children: Vec<Owned>,
    cleanups: Vec<Box<dyn FnOnce()>>,
    contexts: HashMap<TypeId, Rc<dyn Any>>,
}

/// All live scopes of a runtime.
pub(crate) struct ScopeTree {
    scopes: HashMap<ScopeId, ScopeData>,
    root: ScopeId,
}

impl ScopeTree {
    pub(crate) fn new() -> Self {
        let root = ScopeId::next();
        let mut scopes = HashMap::new();
        scopes.insert(root, ScopeData::default());
        Self { scopes, root }
    }

    pub(crate) fn root(&self) -> ScopeId {
        self.root
    }

    pub(crate) fn contains(&self, id: ScopeId) -> bool {
        self.scopes.contains_key(&id)
    }

    pub(crate) fn create(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId::next();
        let parent = parent.filter(|p| self.scopes.contains_key(p));
        if let Some(parent) = parent {
            self.adopt(parent, Owned::Scope(id));
        }
        self.scopes.insert(
            id,
            ScopeData {
                parent,
                ..ScopeData::default()
            },
        );
        id
    }

    /// Register `child` under `scope`. Returns `false` if the scope is gone.
    pub(crate) fn adopt(&mut self, scope: ScopeId, child: Owned) -> bool {
        match self.scopes.get_mut(&scope) {
            Some(data) => {
                data.children.push(child);
                true
            }
            None => false,
        }
    }

    pub(crate) fn forget_child(&mut self, scope: ScopeId, child: Owned) {
        if let Some(data) = self.scopes.get_mut(&scope) {
            data.children.retain(|owned| *owned != child);
        }
    }

    pub(crate) fn remove(&mut self, id: ScopeId) -> Option<ScopeData> {
        let data = self.scopes.remove(&id)?;
        if let Some(parent) = data.parent {
            self.forget_child(parent, Owned::Scope(id));
        }
        Some(data)
    }

    /// Empty a scope in place, handing back what it owned.
    pub(crate) fn drain(&mut self, id: ScopeId) -> Option<ScopeData> {
        let data = self.scopes.get_mut(&id)?;
        Some(ScopeData {
            parent: data.parent,
            children: std::mem::take(&mut data.children),
            cleanups: std::mem::take(&mut data.cleanups),
            contexts: std::mem::take(&mut data.contexts),
        })
    }

    pub(crate) fn push_cleanup(&mut self, id: ScopeId, cleanup: Box<dyn FnOnce()>) -> bool {
        match self.scopes.get_mut(&id) {
            Some(data) => {
                data.cleanups.push(cleanup);
                true
            }
            None => false,
        }
    }

    pub(crate) fn provide(&mut self, id: ScopeId, value: Rc<dyn Any>, type_id: TypeId) -> bool {
        match self.scopes.get_mut(&id) {
            Some(data) => {
                data.contexts.insert(type_id, value);
                true
            }
            None => false,
        }
    }

    /// Resolve a context value from `id` upwards.
    pub(crate) fn lookup(&self, mut id: ScopeId, type_id: TypeId) -> Option<Rc<dyn Any>> {
        loop {
            let data = self.scopes.get(&id)?;
            if let Some(value) = data.contexts.get(&type_id) {
                return Some(Rc::clone(value));
            }
            id = data.parent?;
        }
    }

    pub(crate) fn parent(&self, id: ScopeId) -> Option<ScopeId> {
        self.scopes.get(&id).and_then(|data| data.parent)
    }

    pub(crate) fn len(&self) -> usize {
        self.scopes.len()
    }
}

impl Runtime {
    /// Dispose a scope and everything it owns.
    pub(crate) fn dispose_scope(&self, id: ScopeId) {
        let removed = self.scopes.borrow_mut().remove(id);
        if let Some(data) = removed {
            tracing::debug!(scope = id.raw(), owned = data.children.len(), "disposing scope");
            self.dispose_contents(data);
        }
    }

    /// Dispose everything a scope owns but keep the scope itself.
    pub(crate) fn reset_scope(&self, id: ScopeId) {
        let drained = self.scopes.borrow_mut().drain(id);
        if let Some(data) = drained {
            self.dispose_contents(data);
        }
    }

    fn dispose_contents(&self, data: ScopeData) {
        let ScopeData {
            children,
            cleanups,
            contexts,
            ..
        } = data;

        for owned in children.iter().rev() {
            if let Owned::Scope(scope) = owned {
                self.dispose_scope(*scope);
            }
        }
        for owned in children.iter().rev() {
            if let Owned::Node(node) = owned {
                self.dispose_node(*node);
            }
        }
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }
        drop(contexts);
    }
}

/// Handle to a scope in the ownership tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scope {
    id: ScopeId,
}

impl Scope {
    /// Create a scope as a child of the current scope.
    pub fn new() -> Self {
        with_runtime(|rt| {
            let parent = rt.current_scope();
            Self {
                id: rt.scopes.borrow_mut().create(Some(parent)),
            }
        })
    }

    /// Create a scope as a child of `parent`.
    pub fn child_of(parent: Scope) -> Self {
        with_runtime(|rt| Self {
            id: rt.scopes.borrow_mut().create(Some(parent.id)),
        })
    }

    /// Create a scope with no parent. It lives until disposed explicitly.
    pub fn detached() -> Self {
        with_runtime(|rt| Self {
            id: rt.scopes.borrow_mut().create(None),
        })
    }

    /// The scope new nodes are currently registered under.
    pub fn current() -> Self {
        with_runtime(|rt| Self {
            id: rt.current_scope(),
        })
    }

    /// The thread's root scope.
    pub fn root() -> Self {
        with_runtime(|rt| Self {
            id: rt.scopes.borrow().root(),
        })
    }

    pub(crate) fn from_id(id: ScopeId) -> Self {
        Self { id }
    }

    /// Get the scope's ID.
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// The parent scope, if this scope has one and is still alive.
    pub fn parent(&self) -> Option<Scope> {
        with_runtime(|rt| rt.scopes.borrow().parent(self.id)).map(Self::from_id)
    }

    /// Run `f` with this scope as the current scope.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = ScopeGuard::enter(self.id);
        f()
    }

    /// Dispose the scope, everything created in it, and its descendants.
    ///
    /// Disposing the root scope clears it in place: the root itself
    /// stays available for new nodes.
    pub fn dispose(self) {
        with_runtime(|rt| {
            if self.id == rt.scopes.borrow().root() {
                rt.reset_scope(self.id);
            } else {
                rt.dispose_scope(self.id);
            }
        });
    }

    /// Whether the scope has been disposed.
    pub fn is_disposed(&self) -> bool {
        with_runtime(|rt| !rt.scopes.borrow().contains(self.id))
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

/// Restores the previous current scope when dropped.
pub(crate) struct ScopeGuard {
    previous: ScopeId,
}

impl ScopeGuard {
    pub(crate) fn enter(scope: ScopeId) -> Self {
        let previous = with_runtime(|rt| rt.current_scope.replace(scope));
        Self { previous }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let _ = with_runtime(|rt| rt.current_scope.set(self.previous));
    }
}

/// Create a scope under `parent`, or a detached scope when `parent` is `None`.
pub fn create_scope(parent: Option<Scope>) -> Scope {
    match parent {
        Some(parent) => Scope::child_of(parent),
        None => Scope::detached(),
    }
}

/// Run `f` with `scope` as the current scope.
pub fn run_in_scope<R>(scope: Scope, f: impl FnOnce() -> R) -> R {
    scope.run(f)
}

/// Dispose `scope` and everything it owns.
pub fn dispose_scope(scope: Scope) {
    scope.dispose();
}

/// Register a callback that runs when the current scope is disposed.
///
/// Inside a reaction, the current scope is the reaction's own scope, so the
/// callback also runs right before the reaction's next run.
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    with_runtime(|rt| {
        let scope = rt.current_scope();
        if !rt.scopes.borrow_mut().push_cleanup(scope, Box::new(f)) {
            tracing::warn!(scope = scope.raw(), "cleanup registered on a disposed scope was dropped");
        }
    });
}

/// Store a context value on the current scope.
pub fn provide_context<T: 'static>(value: T) {
    with_runtime(|rt| {
        let scope = rt.current_scope();
        let stored = rt
            .scopes
            .borrow_mut()
            .provide(scope, Rc::new(value), TypeId::of::<T>());
        if !stored {
            tracing::warn!(scope = scope.raw(), "context provided on a disposed scope was dropped");
        }
    });
}

/// Look up a context value from the current scope upwards.
pub fn use_context<T: Clone + 'static>() -> Option<T> {
    with_runtime(|rt| {
        let scope = rt.current_scope();
        let value = rt.scopes.borrow().lookup(scope, TypeId::of::<T>())?;
        value.downcast_ref::<T>().cloned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn scopes_nest_under_the_current_scope() {
        let outer = Scope::new();
        let inner = outer.run(Scope::new);
        assert_eq!(inner.parent(), Some(outer));
        assert_eq!(outer.parent(), Some(Scope::root()));
        assert_eq!(create_scope(None).parent(), None);
    }

    #[test]
    fn run_restores_the_previous_scope() {
        let scope = Scope::new();
        let before = Scope::current();
        run_in_scope(scope, || assert_eq!(Scope::current(), scope));
        assert_eq!(Scope::current(), before);
    }

    #[test]
    fn disposal_is_depth_first_and_cleanups_run_in_reverse() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let outer = Scope::new();

        outer.run(|| {
            let log = order.clone();
            on_cleanup(move || log.borrow_mut().push("outer-first"));
            let inner = Scope::new();
            let log = order.clone();
            inner.run(|| on_cleanup(move || log.borrow_mut().push("inner")));
            let log = order.clone();
            on_cleanup(move || log.borrow_mut().push("outer-second"));
        });

        dispose_scope(outer);
        assert_eq!(*order.borrow(), vec!["inner", "outer-second", "outer-first"]);
        assert!(outer.is_disposed());
    }

    #[test]
    fn disposing_a_parent_disposes_children() {
        let parent = Scope::new();
        let child = Scope::child_of(parent);
        let grandchild = Scope::child_of(child);

        parent.dispose();
        assert!(child.is_disposed());
        assert!(grandchild.is_disposed());
    }

    #[test]
    fn detached_scopes_survive_unrelated_disposal() {
        let parent = Scope::new();
        let detached = parent.run(Scope::detached);
        parent.dispose();
        assert!(!detached.is_disposed());
        detached.dispose();
    }

    #[test]
    fn context_resolves_up_the_tree() {
        #[derive(Clone, Debug, PartialEq)]
        struct Theme(&'static str);

        let outer = Scope::new();
        outer.run(|| {
            provide_context(Theme("dark"));
            let inner = Scope::new();
            inner.run(|| {
                assert_eq!(use_context::<Theme>(), Some(Theme("dark")));
                provide_context(Theme("light"));
                assert_eq!(use_context::<Theme>(), Some(Theme("light")));
            });
            assert_eq!(use_context::<Theme>(), Some(Theme("dark")));
        });
        assert_eq!(use_context::<Theme>(), None);
    }

    #[test]
    fn root_disposal_clears_in_place() {
        let flag = Rc::new(RefCell::new(false));
        let seen = flag.clone();
        Scope::root().run(|| on_cleanup(move || *seen.borrow_mut() = true));

        Scope::root().dispose();
        assert!(*flag.borrow());
        assert!(!Scope::root().is_disposed());
    }
}
