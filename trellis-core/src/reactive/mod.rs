//! Reactive Primitives
//!
//! This module implements the public reactive system: sources, derivations,
//! reactions, and the primitives built from them. Together with the
//! scheduler in [`graph`](crate::graph) they form Trellis's fine-grained
//! reactivity.
//!
//! # Concepts
//!
//! ## Sources
//!
//! A [`Source`] is a container for mutable state. When a source is read
//! during an evaluation (a derivation computing or a reaction running),
//! the evaluating node automatically becomes a dependent. When the source
//! is written with a different value, every dependent is marked stale.
//!
//! ## Derivations
//!
//! A [`Derivation`] is a derived value that caches its result. It is lazy:
//! it runs only when read, and only if something it read changed. A
//! [`LinkedSignal`] is a derivation that can also be written.
//!
//! ## Reactions
//!
//! A [`Reaction`] is a side-effecting computation that re-runs whenever
//! its dependencies change. Reactions synchronize reactive state with the
//! outside world. [`AsyncCell`] uses one to drive an async producer, and
//! [`subscribe_raw`] uses one to hand values to a plain callback.
//!
//! [`watch`] is a reaction split into a tracked expression and an
//! untracked callback that fires only when the expression's value changes.
//!
//! ## Scopes
//!
//! Every node is owned by the [`Scope`] that was current when it was
//! created. Disposing a scope disposes everything it owns.
//!
//! # Implementation Notes
//!
//! Each thread has its own runtime holding the graph and a stack of
//! tracking frames. When a node is read, the runtime checks the top frame
//! and, if a node is evaluating, records the edge.

mod async_cell;
mod batch;
mod context;
mod derivation;
mod linked;
mod reaction;
mod runtime;
mod scope;
mod source;
mod split;
mod subscriber;
mod watch;

pub use async_cell::{AsyncCell, AsyncState, AsyncStatus, Spawn, TokioSpawner};
pub use batch::{batch, untrack};
pub use context::is_tracking;
pub use derivation::Derivation;
pub use linked::{LinkedMode, LinkedSignal};
pub use reaction::{Cleanup, IntoOutcome, Reaction};
pub use scope::{
    create_scope, dispose_scope, on_cleanup, provide_context, run_in_scope, use_context, Scope,
    ScopeId,
};
pub use source::{Source, Trigger};
pub use split::{ReadSource, WriteSource};
pub use subscriber::{subscribe_raw, Observable, Subscription};
pub use watch::watch;

pub(crate) use batch::BatchGuard;
pub(crate) use context::ObserverGuard;
pub(crate) use runtime::{with_runtime, Runtime};
pub(crate) use scope::ScopeGuard;
