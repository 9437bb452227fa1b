//! Reaction Implementation
//!
//! A Reaction is a side-effecting computation that re-runs whenever a node
//! it read changes.
//!
//! # How Reactions Work
//!
//! 1. When created, the reaction runs immediately to establish its initial
//!    dependencies.
//!
//! 2. When a dependency changes, the reaction is queued. It runs at most
//!    once per stabilization pass, after every derivation it reads has
//!    settled, and only if one of them actually changed value.
//!
//! 3. Every run rebuilds the dependency set from scratch, so a branch not
//!    taken this run stops triggering the reaction.
//!
//! # Differences from Derivation
//!
//! - Derivations return a value; reactions do not and are never read.
//! - Derivations are lazy (compute on read); reactions are eager.
//!
//! # Cleanup
//!
//! A run may return a [`Cleanup`]. It is invoked before the next run and
//! when the reaction is disposed. Each reaction also owns a child scope:
//! nodes, `on_cleanup` callbacks and contexts created during a run belong
//! to that run and are disposed before the next one.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::{ReactiveError, Result};
use crate::graph::{Execute, NodeBody, NodeId, NodeKind};

use super::batch::untrack;
use super::runtime::with_runtime;

/// A callback run before a reaction's next run and on its disposal.
pub struct Cleanup(Box<dyn FnOnce()>);

impl Cleanup {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Box::new(f))
    }

    fn invoke(self) {
        (self.0)()
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup")
    }
}

/// Values a reaction body may return.
///
/// Implemented for `()`, [`Cleanup`], `Option<Cleanup>`, and `Result`s of
/// those whose error converts into [`ReactiveError`].
pub trait IntoOutcome {
    fn into_outcome(self) -> Result<Option<Cleanup>>;
}

impl IntoOutcome for () {
    fn into_outcome(self) -> Result<Option<Cleanup>> {
        Ok(None)
    }
}

impl IntoOutcome for Cleanup {
    fn into_outcome(self) -> Result<Option<Cleanup>> {
        Ok(Some(self))
    }
}

impl IntoOutcome for Option<Cleanup> {
    fn into_outcome(self) -> Result<Option<Cleanup>> {
        Ok(self)
    }
}

impl<T, E> IntoOutcome for std::result::Result<T, E>
where
    T: IntoOutcome,
    E: Into<ReactiveError>,
{
    fn into_outcome(self) -> Result<Option<Cleanup>> {
        match self {
            Ok(outcome) => outcome.into_outcome(),
            Err(err) => Err(err.into()),
        }
    }
}

type RunFn = Box<dyn FnMut() -> Result<Option<Cleanup>>>;

struct ReactionState {
    /// Taken out while running, so a reentrant run finds nothing to do.
    run: RefCell<Option<RunFn>>,
    cleanup: RefCell<Option<Cleanup>>,
    torn_down: Cell<bool>,
    runs: Cell<usize>,
}

impl Execute for ReactionState {
    fn cleanup(&self) {
        let pending = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = pending {
            cleanup.invoke();
        }
    }

    fn execute(&self) -> Result<()> {
        let Some(run) = self.run.borrow_mut().take() else {
            return Ok(());
        };
        self.runs.set(self.runs.get() + 1);
        let mut running = Running {
            state: self,
            run: Some(run),
        };
        let outcome = match running.run.as_mut() {
            Some(run) => run(),
            None => Ok(None),
        };
        drop(running);
        *self.cleanup.borrow_mut() = outcome?;
        Ok(())
    }

    fn teardown(&self) {
        self.torn_down.set(true);
        let run = self.run.borrow_mut().take();
        drop(run);
        self.cleanup();
    }
}

/// Holds the body while it runs and puts it back afterwards, also when the
/// body unwinds. A reaction torn down mid-run drops it instead.
struct Running<'a> {
    state: &'a ReactionState,
    run: Option<RunFn>,
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        if !self.state.torn_down.get() {
            *self.state.run.borrow_mut() = self.run.take();
        }
    }
}

/// An eager side effect that re-runs when the nodes it reads change.
///
/// # Example
///
/// ```rust,ignore
/// let count = Source::new(0);
/// let c = count.clone();
///
/// let reaction = Reaction::new(move || {
///     println!("Count is: {}", c.read());
/// })?;
///
/// count.write(5)?;  // Prints: "Count is: 5"
/// ```
#[derive(Clone)]
pub struct Reaction {
    id: NodeId,
    state: Rc<ReactionState>,
}

impl Reaction {
    /// Create a reaction and run it once.
    ///
    /// If the first run fails the reaction is disposed and the error is
    /// returned. Created inside a batch or a running pass, the reaction
    /// still runs immediately; what its run writes propagates later.
    pub fn new<F, O>(mut run: F) -> Result<Self>
    where
        F: FnMut() -> O + 'static,
        O: IntoOutcome,
    {
        let state = Rc::new(ReactionState {
            run: RefCell::new(Some(Box::new(move || run().into_outcome()))),
            cleanup: RefCell::new(None),
            torn_down: Cell::new(false),
            runs: Cell::new(0),
        });
        let exec: Rc<dyn Execute> = state.clone();

        with_runtime(|rt| {
            let id = rt.register(NodeKind::Reaction, NodeBody::Reaction(Rc::clone(&exec)));
            let scope = rt.scopes.borrow_mut().create(Some(rt.current_scope()));
            if let Some(node) = rt.graph.borrow_mut().get_mut(id) {
                node.set_scope(scope);
            }
            rt.start_reaction(id, &exec)?;
            Ok(Self { id, state })
        })
    }

    /// Create a reaction that runs `f` once, untracked, and never again.
    ///
    /// It still owns a scope: nodes and `on_cleanup` callbacks created by
    /// `f`, and a returned [`Cleanup`], are released when the reaction is
    /// disposed.
    pub fn once<F, O>(f: F) -> Result<Self>
    where
        F: FnOnce() -> O + 'static,
        O: IntoOutcome,
    {
        let mut pending = Some(f);
        Self::new(move || match pending.take() {
            Some(f) => untrack(f).into_outcome(),
            None => Ok(None),
        })
    }

    /// Attach a label shown in graph snapshots and logs.
    pub fn with_label(self, label: impl Into<Cow<'static, str>>) -> Self {
        with_runtime(|rt| rt.label(self.id, label.into()));
        self
    }

    /// Get the reaction's node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Dispose of the reaction.
    ///
    /// Invokes the pending cleanup and disposes everything its last run
    /// created. After disposal, the reaction will not run again.
    pub fn dispose(&self) {
        with_runtime(|rt| rt.dispose_node(self.id));
    }

    /// Check if the reaction has been disposed.
    pub fn is_disposed(&self) -> bool {
        !with_runtime(|rt| rt.is_alive(self.id))
    }

    /// Get the number of times the reaction has run.
    pub fn run_count(&self) -> usize {
        self.state.runs.get()
    }
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("id", &self.id)
            .field("run_count", &self.run_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
