//! Error types for the reactive engine.
//!
//! Every fallible operation in the crate returns [`Result`]. Errors are
//! cheap to clone: a derivation that failed caches its error and hands a
//! copy to every reader until one of its dependencies changes.

use std::error::Error as StdError;
use std::rc::Rc;

use thiserror::Error;

use crate::graph::NodeId;

/// Convenience alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors produced by the reactive engine.
#[derive(Debug, Clone, Error)]
pub enum ReactiveError {
    /// A node was read while it was already being computed.
    ///
    /// Every node touched by the failing evaluation is left `Stale`, so a
    /// later write that breaks the cycle lets the next read retry.
    #[error("cyclic dependency detected at {node}")]
    CyclicDependency {
        /// The node that was revisited.
        node: NodeId,
    },

    /// A disposed node was accessed under the strict disposal policy.
    #[error("{node} has been disposed")]
    Disposed {
        /// The disposed node.
        node: NodeId,
    },

    /// A user computation failed.
    #[error("computation failed: {0}")]
    Compute(Rc<dyn StdError>),

    /// A stabilization pass ran more reactions than the configured limit.
    ///
    /// This almost always means two reactions keep writing each other's
    /// dependencies.
    #[error("propagation did not settle after {runs} reaction runs")]
    RunawayPropagation {
        /// Number of reaction runs performed before giving up.
        runs: usize,
    },
}

impl ReactiveError {
    /// Wrap an arbitrary error as a computation failure.
    pub fn compute<E>(error: E) -> Self
    where
        E: StdError + 'static,
    {
        Self::Compute(Rc::new(error))
    }

    /// Build a computation failure from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Compute(Rc::new(Message(message.into())))
    }

    /// Whether this error reports a dependency cycle.
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::CyclicDependency { .. })
    }
}

/// Errors compare by kind and message. Wrapped errors have no identity of
/// their own, so two failures with the same text are equal.
impl PartialEq for ReactiveError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::CyclicDependency { node: a }, Self::CyclicDependency { node: b })
            | (Self::Disposed { node: a }, Self::Disposed { node: b }) => a == b,
            (Self::RunawayPropagation { runs: a }, Self::RunawayPropagation { runs: b }) => a == b,
            (Self::Compute(a), Self::Compute(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

impl From<String> for ReactiveError {
    fn from(message: String) -> Self {
        Self::msg(message)
    }
}

impl From<&str> for ReactiveError {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);
