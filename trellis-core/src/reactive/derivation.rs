//! Derivation Implementation
//!
//! A Derivation is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Derivations Work
//!
//! 1. Nothing runs at creation. The computation runs on first read.
//!
//! 2. While clean, reads return the cached value.
//!
//! 3. When a dependency changes, the derivation is marked stale.
//!
//! 4. On the next read, the runtime first brings the derivation's own
//!    dependencies up to date. If none of them changed value, the cached
//!    result is kept without running the computation.
//!
//! 5. If the computation does run and produces a value equal to the cached
//!    one, readers downstream are not disturbed.
//!
//! # Why This Matters
//!
//! - A source changes
//! - 10 derivations depend on it
//! - Only the derivations actually read (by a reaction or by user code)
//!   recompute; the rest stay stale at no cost
//!
//! # Errors
//!
//! A computation built with [`Derivation::try_new`] may fail. The error is
//! cached like a value and handed to every reader until a dependency
//! change lets the computation run again.

use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{ReactiveError, Result};
use crate::graph::{Compute, NodeBody, NodeId, NodeKind};

use super::runtime::{with_runtime, Runtime};

type ComputeFn<T> = Box<dyn Fn() -> Result<T>>;
type EqualsFn<T> = Box<dyn Fn(&T, &T) -> bool>;

/// The cached result of a derivation.
pub(crate) enum Cached<T> {
    Uninitialized,
    Value(T),
    Errored(ReactiveError),
}

/// Typed state of a derivation, shared between its handles and the graph.
pub(crate) struct DerivationState<T> {
    compute: ComputeFn<T>,
    equals: EqualsFn<T>,
    pub(crate) cached: RefCell<Cached<T>>,
    staged: RefCell<Option<Result<T>>>,

    /// Set while a linked signal serves a written value.
    pub(crate) overridden: RefCell<Option<T>>,
}

impl<T: 'static> DerivationState<T> {
    pub(crate) fn new(compute: ComputeFn<T>, equals: EqualsFn<T>) -> Self {
        Self {
            compute,
            equals,
            cached: RefCell::new(Cached::Uninitialized),
            staged: RefCell::new(None),
            overridden: RefCell::new(None),
        }
    }

    pub(crate) fn equals(&self, a: &T, b: &T) -> bool {
        (self.equals)(a, b)
    }

    /// Borrow the visible value: the override if one is set, else the cache.
    pub(crate) fn with_visible<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        if let Some(value) = self.overridden.borrow().as_ref() {
            return f(Some(value));
        }
        match &*self.cached.borrow() {
            Cached::Value(value) => f(Some(value)),
            Cached::Uninitialized | Cached::Errored(_) => f(None),
        }
    }
}

impl<T: Clone + 'static> DerivationState<T> {
    /// The value a reader sees right now.
    pub(crate) fn current(&self, id: NodeId) -> Result<T> {
        if let Some(value) = self.overridden.borrow().as_ref() {
            return Ok(value.clone());
        }
        match &*self.cached.borrow() {
            Cached::Value(value) => Ok(value.clone()),
            Cached::Errored(err) => Err(err.clone()),
            // Only reachable for a node disposed before it ever computed.
            Cached::Uninitialized => Err(ReactiveError::Disposed { node: id }),
        }
    }
}

impl<T: 'static> Compute for DerivationState<T> {
    fn run(&self) {
        let result = (self.compute)();
        *self.staged.borrow_mut() = Some(result);
    }

    fn staged_cycle(&self) -> Option<NodeId> {
        match &*self.staged.borrow() {
            Some(Err(ReactiveError::CyclicDependency { node })) => Some(*node),
            _ => None,
        }
    }

    fn commit(&self) -> bool {
        let Some(result) = self.staged.borrow_mut().take() else {
            return false;
        };
        let changed = match (&*self.cached.borrow(), &result) {
            (Cached::Value(old), Ok(new)) => !(self.equals)(old, new),
            _ => true,
        };
        if changed {
            *self.cached.borrow_mut() = match result {
                Ok(value) => Cached::Value(value),
                Err(err) => Cached::Errored(err),
            };
        }
        changed
    }

    fn discard(&self) {
        self.staged.borrow_mut().take();
    }

    fn is_overridden(&self) -> bool {
        self.overridden.borrow().is_some()
    }
}

impl Runtime {
    /// Track and bring a derivation-like node up to date, then read it.
    pub(crate) fn read_derived<T: Clone + 'static>(
        &self,
        id: NodeId,
        state: &DerivationState<T>,
    ) -> Result<T> {
        if !self.is_alive(id) {
            self.disposed_access(id)?;
            return state.current(id);
        }
        self.track(id);
        let refreshed = self.refresh(id);
        if !self.tracking.is_evaluating() {
            self.flush_detached();
        }
        refreshed?;
        state.current(id)
    }
}

/// A lazily computed, cached value derived from other nodes.
///
/// # Example
///
/// ```rust,ignore
/// let first = Source::new("Ada".to_string());
/// let last = Source::new("Lovelace".to_string());
/// let full = Derivation::new(move || format!("{} {}", first.read(), last.read()));
///
/// assert_eq!(full.read()?, "Ada Lovelace");
/// ```
pub struct Derivation<T: 'static> {
    id: NodeId,
    state: Rc<DerivationState<T>>,
}

impl<T: PartialEq + 'static> Derivation<T> {
    /// Create a derivation that compares results with `PartialEq`.
    ///
    /// The computation is not run immediately. It runs on first read.
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        Self::with_equals(compute, |a, b| a == b)
    }

    /// Create a derivation from a fallible computation.
    ///
    /// An `Err` is cached and returned to every reader until the
    /// computation runs again.
    pub fn try_new<E>(compute: impl Fn() -> Result<T, E> + 'static) -> Self
    where
        E: Into<ReactiveError>,
    {
        Self::build(
            Box::new(move || compute().map_err(Into::<ReactiveError>::into)),
            Box::new(|a: &T, b: &T| a == b),
        )
    }
}

impl<T: 'static> Derivation<T> {
    /// Create a derivation with a custom equality check on results.
    pub fn with_equals(
        compute: impl Fn() -> T + 'static,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        Self::build(Box::new(move || Ok(compute())), Box::new(equals))
    }

    fn build(compute: ComputeFn<T>, equals: EqualsFn<T>) -> Self {
        let state = Rc::new(DerivationState::new(compute, equals));
        let body = NodeBody::Derivation(Rc::clone(&state) as Rc<dyn Compute>);
        let id = with_runtime(|rt| rt.register(NodeKind::Derivation, body));
        Self { id, state }
    }

    /// Attach a label shown in graph snapshots and logs.
    pub fn with_label(self, label: impl Into<Cow<'static, str>>) -> Self {
        with_runtime(|rt| rt.label(self.id, label.into()));
        self
    }

    /// Get the derivation's node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Whether the derivation's scope has been disposed.
    pub fn is_disposed(&self) -> bool {
        !with_runtime(|rt| rt.is_alive(self.id))
    }
}

impl<T: Clone + 'static> Derivation<T> {
    /// Get the current value, recomputing first if a dependency changed.
    ///
    /// Registers a dependency when called inside an evaluation. Returns the
    /// cached error if the computation failed, and
    /// [`CyclicDependency`](ReactiveError::CyclicDependency) if the
    /// derivation is read while it is being computed.
    pub fn read(&self) -> Result<T> {
        with_runtime(|rt| rt.read_derived(self.id, &self.state))
    }

    /// Get the cached value without registering a dependency or
    /// recomputing. `None` before the first computation or after an error.
    pub fn peek(&self) -> Option<T> {
        self.state.with_visible(|value| value.cloned())
    }
}

impl<T: 'static> Clone for Derivation<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: 'static> fmt::Debug for Derivation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = with_runtime(|rt| rt.status(self.id));
        f.debug_struct("Derivation")
            .field("id", &self.id)
            .field("status", &status)
            .finish_non_exhaustive()
    }
}
