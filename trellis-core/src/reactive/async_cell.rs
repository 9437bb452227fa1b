//! Async Cells
//!
//! An async cell bridges a future-producing function into the graph. It
//! is two nodes under one handle:
//!
//! - a state node, read like a source, holding [`AsyncState`];
//! - a driver reaction that calls the producer factory with tracking on,
//!   so the cell re-fetches whenever something the factory read changes.
//!
//! Every driver run increments the cell's generation and spawns the new
//! future. A completion whose generation is no longer current was
//! superseded by a newer request and is dropped, so the state always
//! reflects the latest request no matter in which order futures finish.
//!
//! Futures run on the configured [`Spawn`] implementation, which defaults
//! to [`TokioSpawner`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;

use crate::error::{ReactiveError, Result};
use crate::graph::{NodeBody, NodeId, NodeKind};

use super::reaction::Reaction;
use super::runtime::with_runtime;

/// Runs the futures produced by async cells.
pub trait Spawn {
    fn spawn(&self, future: LocalBoxFuture<'static, ()>);
}

/// Spawns onto the current tokio `LocalSet` with
/// [`tokio::task::spawn_local`].
///
/// With no tokio runtime on the thread at all, the future is dropped with a
/// warning and the cell stays pending.
///
/// # Panics
///
/// Panics when a tokio runtime is running but no `LocalSet` is: cells must
/// be driven from inside `LocalSet::run_until` (or a `LocalSet` being
/// awaited).
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

impl Spawn for TokioSpawner {
    fn spawn(&self, future: LocalBoxFuture<'static, ()>) {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!("no tokio runtime on this thread; async request dropped");
            return;
        }
        tokio::task::spawn_local(future);
    }
}

/// The state of an async cell.
#[derive(Debug, Clone, PartialEq)]
pub enum AsyncState<T> {
    Pending,
    Resolved(T),
    Rejected(ReactiveError),
}

/// Discriminant of [`AsyncState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncStatus {
    Pending,
    Resolved,
    Rejected,
}

impl<T> AsyncState<T> {
    pub fn status(&self) -> AsyncStatus {
        match self {
            Self::Pending => AsyncStatus::Pending,
            Self::Resolved(_) => AsyncStatus::Resolved,
            Self::Rejected(_) => AsyncStatus::Rejected,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Resolved(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ReactiveError> {
        match self {
            Self::Rejected(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

type Producer<T> = Box<dyn Fn() -> LocalBoxFuture<'static, Result<T>>>;

struct AsyncInner<T> {
    id: NodeId,
    state: RefCell<AsyncState<T>>,
    generation: Cell<u64>,
    producer: Producer<T>,
}

impl<T: 'static> AsyncInner<T> {
    /// Driver body: start a new request and forget about older ones.
    fn fetch(self: &Rc<Self>) {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);

        let future = (self.producer)();
        self.write_state(AsyncState::Pending, |old| !old.is_pending());
        tracing::debug!(node = %self.id, generation, "async request started");

        let spawner = with_runtime(|rt| Rc::clone(&rt.config.borrow().spawner));
        let inner = Rc::clone(self);
        spawner.spawn(
            async move {
                let result = future.await;
                inner.complete(generation, result);
            }
            .boxed_local(),
        );
    }

    fn complete(&self, generation: u64, result: Result<T>) {
        let current = self.generation.get();
        if generation != current {
            tracing::debug!(node = %self.id, generation, current, "discarding superseded async result");
            return;
        }
        let next = match result {
            Ok(value) => AsyncState::Resolved(value),
            Err(err) => AsyncState::Rejected(err),
        };
        self.write_state(next, |_| true);
    }

    /// Replace the state through the normal write path.
    fn write_state(&self, next: AsyncState<T>, changed: impl FnOnce(&AsyncState<T>) -> bool) {
        with_runtime(|rt| {
            if !rt.is_alive(self.id) {
                tracing::debug!(node = %self.id, "async cell disposed; dropping state update");
                return;
            }
            if !changed(&self.state.borrow()) {
                return;
            }
            *self.state.borrow_mut() = next;
            if let Err(err) = rt.notify_changed(self.id) {
                tracing::warn!(node = %self.id, error = %err, "propagating async state failed");
            }
        });
    }
}

/// A source-like node fed by an asynchronous producer.
///
/// ```rust,ignore
/// let user_id = Source::new(1);
/// let id = user_id.clone();
/// let user = AsyncCell::new(move || {
///     let id = id.read();
///     async move { fetch_user(id).await }
/// })?;
///
/// match user.read() {
///     AsyncState::Pending => render_spinner(),
///     AsyncState::Resolved(user) => render(user),
///     AsyncState::Rejected(err) => render_error(err),
/// }
/// ```
pub struct AsyncCell<T: 'static> {
    inner: Rc<AsyncInner<T>>,
    driver: Reaction,
}

impl<T: 'static> AsyncCell<T> {
    /// Create a cell and start its first request.
    ///
    /// `producer` runs synchronously with dependency tracking on. Only
    /// reads made before it returns its future are tracked; reads inside
    /// the future are not.
    ///
    /// # Panics
    ///
    /// With the default [`TokioSpawner`], panics if called inside a tokio
    /// runtime but outside a `LocalSet`. Install another [`Spawn`] through
    /// [`RuntimeConfig::with_spawner`](crate::RuntimeConfig::with_spawner)
    /// to drive cells elsewhere.
    pub fn new<F, Fut, E>(producer: F) -> Result<Self>
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + 'static,
        E: Into<ReactiveError>,
    {
        let id = with_runtime(|rt| rt.register(NodeKind::AsyncCell, NodeBody::Source));
        let inner = Rc::new(AsyncInner {
            id,
            state: RefCell::new(AsyncState::Pending),
            generation: Cell::new(0),
            producer: Box::new(move || {
                let future = producer();
                async move { future.await.map_err(Into::<ReactiveError>::into) }.boxed_local()
            }),
        });

        let driving = Rc::clone(&inner);
        let driver = Reaction::new(move || driving.fetch())?;
        Ok(Self { inner, driver })
    }

    /// Get the state node's ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Number of requests started so far.
    pub fn generation(&self) -> u64 {
        self.inner.generation.get()
    }

    /// Borrow the current state, registering a dependency.
    pub fn with<R>(&self, f: impl FnOnce(&AsyncState<T>) -> R) -> R {
        with_runtime(|rt| rt.track(self.inner.id));
        f(&self.inner.state.borrow())
    }

    pub fn is_pending(&self) -> bool {
        self.with(AsyncState::is_pending)
    }

    /// Start a new request now, superseding any in flight.
    ///
    /// Spawns like [`AsyncCell::new`] and panics under the same conditions.
    pub fn refetch(&self) -> Result<()> {
        with_runtime(|rt| {
            if !rt.is_alive(self.driver.id()) {
                return rt.disposed_access(self.inner.id);
            }
            rt.invalidate(self.driver.id())
        })
    }

    /// Edit a resolved value locally, e.g. for an optimistic update.
    /// Does nothing unless the cell is resolved.
    pub fn mutate(&self, f: impl FnOnce(&mut T)) -> Result<()> {
        with_runtime(|rt| {
            if !rt.is_alive(self.inner.id) {
                return rt.disposed_access(self.inner.id);
            }
            match &mut *self.inner.state.borrow_mut() {
                AsyncState::Resolved(value) => f(value),
                _ => return Ok(()),
            }
            rt.notify_changed(self.inner.id)
        })
    }

    /// Dispose the cell. Requests in flight complete into nothing.
    pub fn dispose(&self) {
        self.driver.dispose();
        with_runtime(|rt| rt.dispose_node(self.inner.id));
    }

    pub fn is_disposed(&self) -> bool {
        !with_runtime(|rt| rt.is_alive(self.inner.id))
    }
}

impl<T: Clone + 'static> AsyncCell<T> {
    /// Get the current state, registering a dependency.
    pub fn read(&self) -> AsyncState<T> {
        self.with(AsyncState::clone)
    }
}

impl<T: 'static> Clone for AsyncCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            driver: self.driver.clone(),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for AsyncCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCell")
            .field("id", &self.inner.id)
            .field("generation", &self.generation())
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}
