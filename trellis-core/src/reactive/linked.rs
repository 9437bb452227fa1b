//! Linked Signals
//!
//! A linked signal is a derivation that can be written. Writing it
//! overrides the computed value until [`LinkedSignal::reset`] hands control
//! back to the computation.
//!
//! Typical use is a form field seeded from upstream data: the user edits
//! it locally, and a "revert" button resets it to whatever upstream says
//! now.
//!
//! While overridden, the signal keeps the dependency edges of its last
//! computation but ignores upstream changes. Upstream writes never discard
//! an override; only `reset` does.

use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

use crate::error::{ReactiveError, Result};
use crate::graph::{Compute, NodeBody, NodeId, NodeKind};

use super::derivation::{Cached, DerivationState};
use super::runtime::with_runtime;

/// Whether a linked signal is serving its computation or a written value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkedMode {
    Computed,
    Overridden,
}

/// A writable derivation.
///
/// ```rust,ignore
/// let upstream = Source::new(1);
/// let u = upstream.clone();
/// let field = LinkedSignal::new(move || u.read() * 10);
///
/// field.set(7)?;
/// assert_eq!(field.read()?, 7);
///
/// field.reset()?;
/// assert_eq!(field.read()?, 10);
/// ```
pub struct LinkedSignal<T: 'static> {
    id: NodeId,
    state: Rc<DerivationState<T>>,
}

impl<T: PartialEq + 'static> LinkedSignal<T> {
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        Self::with_equals(compute, |a, b| a == b)
    }

    /// Create a linked signal from a fallible computation.
    pub fn try_new<E>(compute: impl Fn() -> Result<T, E> + 'static) -> Self
    where
        E: Into<ReactiveError>,
    {
        Self::build(DerivationState::new(
            Box::new(move || compute().map_err(Into::<ReactiveError>::into)),
            Box::new(|a: &T, b: &T| a == b),
        ))
    }
}

impl<T: 'static> LinkedSignal<T> {
    pub fn with_equals(
        compute: impl Fn() -> T + 'static,
        equals: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        Self::build(DerivationState::new(
            Box::new(move || Ok(compute())),
            Box::new(equals),
        ))
    }

    fn build(state: DerivationState<T>) -> Self {
        let state = Rc::new(state);
        let body = NodeBody::Derivation(Rc::clone(&state) as Rc<dyn Compute>);
        let id = with_runtime(|rt| rt.register(NodeKind::LinkedSignal, body));
        Self { id, state }
    }

    /// Attach a label shown in graph snapshots and logs.
    pub fn with_label(self, label: impl Into<Cow<'static, str>>) -> Self {
        with_runtime(|rt| rt.label(self.id, label.into()));
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn mode(&self) -> LinkedMode {
        if self.state.overridden.borrow().is_some() {
            LinkedMode::Overridden
        } else {
            LinkedMode::Computed
        }
    }

    /// Override the computed value.
    ///
    /// Dependents are only disturbed if `value` differs from what readers
    /// saw last.
    pub fn set(&self, value: T) -> Result<()> {
        with_runtime(|rt| {
            if !rt.is_alive(self.id) {
                return rt.disposed_access(self.id);
            }
            let changed = self
                .state
                .with_visible(|current| current.map_or(true, |old| !self.state.equals(old, &value)));
            *self.state.overridden.borrow_mut() = Some(value);
            tracing::debug!(node = %self.id, changed, "linked signal overridden");
            if changed {
                rt.notify_changed(self.id)
            } else {
                Ok(())
            }
        })
    }

    /// Drop the override and recompute from the underlying expression on
    /// the next read. A no-op when not overridden.
    pub fn reset(&self) -> Result<()> {
        with_runtime(|rt| {
            if !rt.is_alive(self.id) {
                return rt.disposed_access(self.id);
            }
            let Some(previous) = self.state.overridden.borrow_mut().take() else {
                return Ok(());
            };
            // Compare the recomputed value against what readers last saw.
            *self.state.cached.borrow_mut() = Cached::Value(previous);
            tracing::debug!(node = %self.id, "linked signal reset");
            rt.invalidate(self.id)
        })
    }

    /// Whether the signal's scope has been disposed.
    pub fn is_disposed(&self) -> bool {
        !with_runtime(|rt| rt.is_alive(self.id))
    }
}

impl<T: Clone + 'static> LinkedSignal<T> {
    /// The override if one is set, else the computed value.
    pub fn read(&self) -> Result<T> {
        with_runtime(|rt| rt.read_derived(self.id, &self.state))
    }
}

impl<T: 'static> Clone for LinkedSignal<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: 'static> fmt::Debug for LinkedSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedSignal")
            .field("id", &self.id)
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}
