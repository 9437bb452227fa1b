//! Trellis Core
//!
//! This crate provides the reactivity core of the Trellis UI framework.
//! It implements:
//!
//! - Reactive primitives (sources, derivations, reactions, linked signals)
//! - Glitch-free, lazy stabilization of the dependency graph
//! - Scoped ownership and disposal
//! - Async cells bridging futures into the graph
//!
//! Renderers, server-side rendering and framework adapters all sit on top
//! of the operations exported here.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: the public primitives, tracking context and scopes
//! - `graph`: the node arena, the stabilization scheduler, and snapshots
//! - `config`: per-thread runtime configuration
//! - `error`: the error type shared by every fallible operation
//!
//! The engine is single-threaded: every thread has its own runtime and
//! handles must stay on the thread that created them.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{Derivation, Reaction, Source};
//!
//! // Create a source
//! let count = Source::new(0);
//!
//! // Create a derived value
//! let c = count.clone();
//! let doubled = Derivation::new(move || c.read() * 2);
//!
//! // Create a reaction
//! let (c, d) = (count.clone(), doubled.clone());
//! Reaction::new(move || {
//!     println!("Count: {}, Doubled: {}", c.read(), d.read()?);
//!     Ok::<_, ReactiveError>(())
//! })?;
//!
//! // Update the source
//! count.write(5)?;
//! // Reaction runs once, prints: "Count: 5, Doubled: 10"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{config, configure, DisposedAccess, RuntimeConfig};
pub use error::{ReactiveError, Result};
pub use graph::{snapshot, GraphSnapshot, NodeId, NodeKind, NodeSnapshot, NodeStatus};
pub use reactive::{
    batch, create_scope, dispose_scope, is_tracking, on_cleanup, provide_context, run_in_scope,
    subscribe_raw, untrack, use_context, watch, AsyncCell, AsyncState, AsyncStatus, Cleanup,
    Derivation, IntoOutcome, LinkedMode, LinkedSignal, Observable, Reaction, ReadSource, Scope,
    ScopeId, Source, Spawn, Subscription, TokioSpawner, Trigger, WriteSource,
};
