//! Source Implementation
//!
//! A Source is the fundamental reactive primitive. It holds a value and is
//! the only way new information enters the graph.
//!
//! # How Sources Work
//!
//! 1. When a source is read inside an evaluation (derivation or reaction),
//!    the runtime records an edge from the source to the evaluating node.
//!
//! 2. When a source is written with a value that differs from the current
//!    one (per its `equals`), every transitive dependent is marked stale
//!    and a stabilization pass runs.
//!
//! 3. Writing an equal value is a no-op: nothing is marked, nothing runs.
//!
//! # Memory Layout
//!
//! The graph node only holds edges and bookkeeping. The typed value lives
//! behind the handle in an `Rc`, so clones of a handle share it and a
//! disposed source can still hand out its last value.

use std::borrow::Cow;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::Result;
use crate::graph::{NodeBody, NodeId, NodeKind};

use super::runtime::with_runtime;

type EqualsFn<T> = Box<dyn Fn(&T, &T) -> bool>;

struct SourceState<T> {
    value: RefCell<T>,
    equals: EqualsFn<T>,
}

/// A writable reactive value of type `T`.
///
/// # Example
///
/// ```rust,ignore
/// let count = Source::new(0);
///
/// // Read the value
/// let value = count.read();
///
/// // Write a new value (marks dependents and runs reactions)
/// count.write(5)?;
/// ```
pub struct Source<T: 'static> {
    id: NodeId,
    state: Rc<SourceState<T>>,
}

impl<T: PartialEq + 'static> Source<T> {
    /// Create a new source that compares values with `PartialEq`.
    pub fn new(value: T) -> Self {
        Self::with_equals(value, |a, b| a == b)
    }
}

impl<T: 'static> Source<T> {
    /// Create a new source with a custom equality check.
    ///
    /// A write is ignored when `equals(current, new)` returns `true`. Pass
    /// `|_, _| false` to make every write propagate.
    pub fn with_equals(value: T, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self::register(NodeKind::Source, value, Box::new(equals))
    }

    pub(crate) fn register(kind: NodeKind, value: T, equals: EqualsFn<T>) -> Self {
        let id = with_runtime(|rt| rt.register(kind, NodeBody::Source));
        Self {
            id,
            state: Rc::new(SourceState {
                value: RefCell::new(value),
                equals,
            }),
        }
    }

    /// Attach a label shown in graph snapshots and logs.
    pub fn with_label(self, label: impl Into<Cow<'static, str>>) -> Self {
        with_runtime(|rt| rt.label(self.id, label.into()));
        self
    }

    /// Get the source's node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Borrow the current value, registering a dependency when called
    /// inside an evaluation.
    ///
    /// The source must not be written from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        with_runtime(|rt| rt.track(self.id));
        f(&self.state.value.borrow())
    }

    /// Borrow the current value without registering a dependency.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.state.value.borrow())
    }

    /// Replace the value and propagate if it changed.
    ///
    /// Returns the first error raised by a reaction during the pass this
    /// write triggered. Inside a batch or a running pass the propagation is
    /// deferred and this always returns `Ok`.
    pub fn write(&self, value: T) -> Result<()> {
        with_runtime(|rt| {
            if !rt.is_alive(self.id) {
                return rt.disposed_access(self.id);
            }
            let unchanged = (self.state.equals)(&self.state.value.borrow(), &value);
            if unchanged {
                tracing::trace!(node = %self.id, "write skipped: value unchanged");
                return Ok(());
            }
            *self.state.value.borrow_mut() = value;
            rt.notify_changed(self.id)
        })
    }

    /// Mutate the value in place and propagate.
    ///
    /// The equality check is skipped: an in-place update always counts as
    /// a change.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> Result<()> {
        self.with_mut(f).map(drop)
    }

    /// Mutate the value in place, propagate, and hand back what `f`
    /// returned.
    ///
    /// Like [`Source::update`], this always counts as a change. On a
    /// disposed source under the lenient policy `f` is not called and the
    /// result is `Ok(None)`.
    ///
    /// ```rust,ignore
    /// let queue = Source::new(vec![1, 2, 3]);
    /// let head = queue.with_mut(|items| items.remove(0))?;
    /// assert_eq!(head, Some(1));
    /// ```
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<Option<R>> {
        with_runtime(|rt| {
            if !rt.is_alive(self.id) {
                return rt.disposed_access(self.id).map(|()| None);
            }
            let result = f(&mut self.state.value.borrow_mut());
            rt.notify_changed(self.id)?;
            Ok(Some(result))
        })
    }

    /// Revision at which the value last changed.
    pub fn version(&self) -> u64 {
        with_runtime(|rt| rt.graph.borrow().changed_at(self.id))
    }

    /// Whether the source's scope has been disposed.
    pub fn is_disposed(&self) -> bool {
        !with_runtime(|rt| rt.is_alive(self.id))
    }
}

impl<T: Clone + 'static> Source<T> {
    /// Get the current value, registering a dependency when called inside
    /// an evaluation.
    ///
    /// A disposed source returns the last value it held.
    pub fn read(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value without registering a dependency.
    pub fn read_untracked(&self) -> T {
        self.with_untracked(T::clone)
    }
}

impl<T: 'static> Clone for Source<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Source<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.id)
            .field("value", &*self.state.value.borrow())
            .finish()
    }
}

/// A valueless source: something happened, without saying what.
///
/// Useful for invalidating computations that read external state the graph
/// cannot see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    id: NodeId,
}

impl Trigger {
    pub fn new() -> Self {
        Self {
            id: with_runtime(|rt| rt.register(NodeKind::Source, NodeBody::Source)),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Register a dependency on this trigger.
    pub fn track(&self) {
        with_runtime(|rt| rt.track(self.id));
    }

    /// Mark everything that tracked this trigger stale and propagate.
    pub fn notify(&self) -> Result<()> {
        with_runtime(|rt| {
            if !rt.is_alive(self.id) {
                return rt.disposed_access(self.id);
            }
            rt.notify_changed(self.id)
        })
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::new()
    }
}
