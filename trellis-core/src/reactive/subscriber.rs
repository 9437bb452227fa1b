//! Raw Subscriptions
//!
//! [`subscribe_raw`] is the one imperative way out of the graph. It lets a
//! host bridge mirror a node's value into a foreign system (a UI toolkit's
//! own state, a channel, a log) without writing a reaction by hand.
//!
//! The callback runs untracked, once per stabilization pass in which the
//! node's value changed. It is not called for the value current at
//! subscription time.

use std::cell::Cell;

use crate::error::Result;
use crate::graph::NodeId;

use super::async_cell::{AsyncCell, AsyncState};
use super::batch::untrack;
use super::derivation::Derivation;
use super::linked::LinkedSignal;
use super::reaction::Reaction;
use super::source::{Source, Trigger};
use super::split::ReadSource;

/// A node whose value can be observed with [`subscribe_raw`].
pub trait Observable {
    type Value;

    /// The node a subscription depends on.
    fn node_id(&self) -> NodeId;

    /// Read the value with tracking.
    fn observe(&self) -> Self::Value;
}

impl<T: Clone + 'static> Observable for Source<T> {
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn observe(&self) -> T {
        self.read()
    }
}

impl<T: Clone + 'static> Observable for ReadSource<T> {
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn observe(&self) -> T {
        self.read()
    }
}

impl<T: Clone + 'static> Observable for Derivation<T> {
    type Value = Result<T>;

    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn observe(&self) -> Result<T> {
        self.read()
    }
}

impl<T: Clone + 'static> Observable for LinkedSignal<T> {
    type Value = Result<T>;

    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn observe(&self) -> Result<T> {
        self.read()
    }
}

impl<T: Clone + 'static> Observable for AsyncCell<T> {
    type Value = AsyncState<T>;

    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn observe(&self) -> AsyncState<T> {
        self.read()
    }
}

impl Observable for Trigger {
    type Value = ();

    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn observe(&self) {
        self.track();
    }
}

/// Handle returned by [`subscribe_raw`].
#[derive(Debug, Clone)]
pub struct Subscription {
    node: NodeId,
    reaction: Reaction,
}

impl Subscription {
    /// The observed node.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Stop delivering values. Idempotent.
    pub fn unsubscribe(&self) {
        self.reaction.dispose();
    }

    pub fn is_active(&self) -> bool {
        !self.reaction.is_disposed()
    }
}

/// Call `callback` with the node's new value whenever it changes.
///
/// The subscription is owned by the current scope and ends when that scope
/// is disposed or [`Subscription::unsubscribe`] is called.
///
/// ```rust,ignore
/// let count = Source::new(0);
/// let sub = subscribe_raw(&count, |value| host.set_count(value))?;
/// count.write(1)?; // host.set_count(1)
/// sub.unsubscribe();
/// ```
pub fn subscribe_raw<N, F>(node: &N, callback: F) -> Result<Subscription>
where
    N: Observable + Clone + 'static,
    F: FnMut(N::Value) + 'static,
{
    let observed = node.clone();
    let mut callback = callback;
    let first = Cell::new(true);

    let reaction = Reaction::new(move || {
        let value = observed.observe();
        if first.replace(false) {
            return;
        }
        untrack(|| callback(value));
    })?;
    tracing::debug!(node = %node.node_id(), reaction = %reaction.id(), "raw subscription created");

    Ok(Subscription {
        node: node.node_id(),
        reaction,
    })
}
