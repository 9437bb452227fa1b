//! Runtime Configuration
//!
//! Each thread owns one reactive runtime, and each runtime carries a
//! [`RuntimeConfig`]. Install a config with [`configure`] before creating
//! nodes; reading it back is cheap.
//!
//! ```rust,ignore
//! use trellis_core::{configure, DisposedAccess, RuntimeConfig};
//!
//! configure(
//!     RuntimeConfig::default()
//!         .with_disposed_access(DisposedAccess::Strict)
//!         .with_max_reaction_runs(10_000),
//! );
//! ```

use std::fmt;
use std::rc::Rc;

use crate::reactive::{with_runtime, Spawn, TokioSpawner};

/// Default limit on reaction runs within a single stabilization pass.
pub const DEFAULT_MAX_REACTION_RUNS: usize = 100_000;

/// How the engine treats access to nodes whose scope was disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisposedAccess {
    /// Writes are silently ignored and reads return the last known value.
    #[default]
    Lenient,

    /// Writes and derivation reads fail with [`ReactiveError::Disposed`].
    ///
    /// [`ReactiveError::Disposed`]: crate::ReactiveError::Disposed
    Strict,
}

/// Per-thread runtime settings.
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Upper bound on reaction runs in one stabilization pass.
    pub max_reaction_runs: usize,

    /// Policy for reading or writing disposed nodes.
    pub disposed_access: DisposedAccess,

    /// Executor used to drive [`AsyncCell`](crate::AsyncCell) producers.
    pub spawner: Rc<dyn Spawn>,
}

impl RuntimeConfig {
    /// Set the runaway-propagation limit.
    pub fn with_max_reaction_runs(mut self, runs: usize) -> Self {
        self.max_reaction_runs = runs.max(1);
        self
    }

    /// Set the disposed-node access policy.
    pub fn with_disposed_access(mut self, policy: DisposedAccess) -> Self {
        self.disposed_access = policy;
        self
    }

    /// Set the executor that runs async producers.
    pub fn with_spawner<S>(mut self, spawner: S) -> Self
    where
        S: Spawn + 'static,
    {
        self.spawner = Rc::new(spawner);
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_reaction_runs: DEFAULT_MAX_REACTION_RUNS,
            disposed_access: DisposedAccess::default(),
            spawner: Rc::new(TokioSpawner),
        }
    }
}

impl fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("max_reaction_runs", &self.max_reaction_runs)
            .field("disposed_access", &self.disposed_access)
            .finish_non_exhaustive()
    }
}

/// Replace the current thread's runtime configuration.
pub fn configure(config: RuntimeConfig) {
    tracing::debug!(?config, "runtime reconfigured");
    with_runtime(|rt| *rt.config.borrow_mut() = config);
}

/// A copy of the current thread's runtime configuration.
pub fn config() -> RuntimeConfig {
    with_runtime(|rt| rt.config.borrow().clone())
}
