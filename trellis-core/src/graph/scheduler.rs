//! Stabilization Scheduler
//!
//! The scheduler settles the graph after writes so that no observer ever
//! sees some of its inputs updated and others not.
//!
//! # Algorithm
//!
//! Stabilization is a two-phase mark-and-sweep over the affected subgraph:
//!
//! 1. **Mark.** A write bumps the global revision, stamps the written node
//!    with it, and walks `dependents` marking every reachable node stale.
//!    Reactions reached this way are queued; nothing runs yet.
//!    Reactions run in creation order, so a parent always runs before the
//!    reactions its own runs created and may dispose them first.
//! 2. **Sweep.** For each queued reaction, its stale derivations are
//!    refreshed by recursive demand: refreshing a derivation first
//!    refreshes its own stale dependencies, so evaluation follows the
//!    dependency order without a global topological sort.
//! 3. **Run.** A queued reaction runs only if one of its dependencies
//!    changed at a revision newer than the reaction's last run. A
//!    derivation that recomputes to an equal value keeps its old
//!    `changed_at`, which cuts the cascade off right there.
//!
//! Writes made while a pass is running only mark and queue; the pass loops
//! over its queue until it drains, so it never recurses into itself.
//!
//! A node reached again while it is `Computing` is a cycle. Every
//! evaluation on the cycle is abandoned and left stale.

use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;

use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::error::{ReactiveError, Result};
use crate::reactive::{BatchGuard, ObserverGuard, Runtime, ScopeGuard};

use super::arena::Arena;
use super::node::{Execute, Node, NodeBody, NodeId, NodeStatus};

type Dependencies = SmallVec<[NodeId; 8]>;

/// Scheduler bookkeeping: revision counter, batch depth, and the queue of
/// reactions awaiting the next sweep.
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    revision: Cell<u64>,
    batch_depth: Cell<usize>,
    flushing: Cell<bool>,
    pending: RefCell<IndexSet<NodeId>>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The current revision.
    pub(crate) fn revision(&self) -> u64 {
        self.revision.get()
    }

    /// Advance to a new revision. Called for every effective write.
    pub(crate) fn bump_revision(&self) -> u64 {
        let next = self.revision.get() + 1;
        self.revision.set(next);
        next
    }

    pub(crate) fn enqueue(&self, id: NodeId) {
        self.pending.borrow_mut().insert(id);
    }

    /// Drop a node from the queue (it was disposed).
    pub(crate) fn forget(&self, id: NodeId) {
        self.pending.borrow_mut().shift_remove(&id);
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.borrow().is_empty()
    }

    /// Reactions awaiting the next sweep, in the order they were queued.
    pub(crate) fn pending(&self) -> Vec<NodeId> {
        self.pending.borrow().iter().copied().collect()
    }

    fn take_pending(&self) -> IndexSet<NodeId> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }

    pub(crate) fn begin_batch(&self) {
        self.batch_depth.set(self.batch_depth.get() + 1);
    }

    /// Close one batch level. Returns `true` when the outermost batch closed.
    pub(crate) fn end_batch(&self) -> bool {
        let depth = self.batch_depth.get().saturating_sub(1);
        self.batch_depth.set(depth);
        depth == 0
    }

    pub(crate) fn is_batching(&self) -> bool {
        self.batch_depth.get() > 0
    }

    pub(crate) fn is_flushing(&self) -> bool {
        self.flushing.get()
    }

    /// Mark every transitive dependent of `origin` stale and queue the
    /// reactions among them, breadth first in link order. Returns how many
    /// nodes were newly marked.
    pub(crate) fn mark_dependents(&self, graph: &mut Arena, origin: NodeId) -> usize {
        let mut pending = self.pending.borrow_mut();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<NodeId> = graph
            .get(origin)
            .map(|node| node.dependents().iter().copied().collect())
            .unwrap_or_default();
        let mut marked = 0;

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            let Some(node) = graph.get_mut(id) else {
                continue;
            };
            if node.mark_stale() {
                marked += 1;
            }
            if node.is_reaction() && node.status() != NodeStatus::Disposed {
                pending.insert(id);
            }
            queue.extend(node.dependents().iter().copied());
        }
        marked
    }
}

/// Marks a stabilization pass as running for its lifetime.
struct PassGuard<'a> {
    scheduler: &'a Scheduler,
}

impl<'a> PassGuard<'a> {
    fn enter(scheduler: &'a Scheduler) -> Self {
        scheduler.flushing.set(true);
        Self { scheduler }
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.flushing.set(false);
    }
}

/// A node evaluation in progress.
///
/// Dropped without [`Evaluation::complete`], the node is abandoned: left
/// stale and forced, and any edge this attempt added that closes a cycle
/// is unlinked again. That covers failed cycles and computations that
/// unwind.
struct Evaluation<'a> {
    runtime: &'a Runtime,
    id: NodeId,
    prior: Dependencies,
    done: bool,
}

impl<'a> Evaluation<'a> {
    fn begin(runtime: &'a Runtime, id: NodeId, prior: Dependencies) -> Self {
        runtime.update_node(id, Node::begin);
        Self {
            runtime,
            id,
            prior,
            done: false,
        }
    }

    fn complete(mut self) {
        self.done = true;
    }
}

impl Drop for Evaluation<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let Ok(mut graph) = self.runtime.graph.try_borrow_mut() else {
            return;
        };
        graph.unlink_cycles_since(self.id, &self.prior);
        if let Some(node) = graph.get_mut(self.id) {
            node.abandon();
        }
        tracing::trace!(node = %self.id, "evaluation abandoned");
    }
}

impl Runtime {
    /// Run a stabilization pass over the queued reactions.
    ///
    /// Does nothing while a batch is open, while another pass is running
    /// (that pass will pick the new work up), or while a node is evaluating.
    /// Returns the first error raised by a reaction; the remaining reactions
    /// still run so the graph settles.
    pub(crate) fn flush(&self) -> Result<()> {
        if self.scheduler.is_batching()
            || self.scheduler.is_flushing()
            || self.tracking.is_evaluating()
            || !self.scheduler.has_pending()
        {
            return Ok(());
        }

        let _pass = PassGuard::enter(&self.scheduler);
        let limit = self.config.borrow().max_reaction_runs;
        let mut runs = 0usize;
        let mut round = 0usize;
        let mut first_error: Option<ReactiveError> = None;

        loop {
            let mut queue = self.scheduler.take_pending();
            if queue.is_empty() {
                break;
            }
            round += 1;
            {
                let graph = self.graph.borrow();
                queue.sort_by(|a, b| graph.sequence(*a).cmp(&graph.sequence(*b)));
            }
            tracing::debug!(round, reactions = queue.len(), "stabilization round");

            // Sweep: bring every derivation the queued reactions read up to date.
            let mut failed = HashSet::new();
            for &id in &queue {
                if let Err(err) = self.settle_dependencies(id) {
                    failed.insert(id);
                    first_error.get_or_insert(err);
                }
            }

            for id in queue {
                if failed.contains(&id) {
                    continue;
                }
                runs += 1;
                if runs > limit {
                    let abandoned = self.scheduler.take_pending();
                    tracing::warn!(runs = limit, abandoned = abandoned.len(), "propagation did not settle");
                    return Err(ReactiveError::RunawayPropagation { runs: limit });
                }
                if let Err(err) = self.update_reaction(id) {
                    first_error.get_or_insert(err);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Flush after an operation that may have queued reactions from inside
    /// an evaluation, logging instead of returning the pass's error.
    pub(crate) fn flush_detached(&self) {
        if let Err(err) = self.flush() {
            tracing::warn!(error = %err, "deferred stabilization pass failed");
        }
    }

    /// Refresh the stale dependencies of a queued reaction.
    fn settle_dependencies(&self, id: NodeId) -> Result<()> {
        let deps: Dependencies = {
            let graph = self.graph.borrow();
            match graph.get(id) {
                Some(node) if node.status() == NodeStatus::Stale => {
                    node.dependencies().iter().copied().collect()
                }
                _ => return Ok(()),
            }
        };
        deps.into_iter().try_for_each(|dep| self.refresh(dep))
    }

    /// Bring a derivation up to date, recomputing it only if one of its
    /// dependencies changed since it was last verified.
    pub(crate) fn refresh(&self, id: NodeId) -> Result<()> {
        let (compute, deps, verified_at, forced) = {
            let graph = self.graph.borrow();
            let Some(node) = graph.get(id) else {
                return Ok(());
            };
            match node.status() {
                NodeStatus::Clean | NodeStatus::Disposed => return Ok(()),
                NodeStatus::Computing => {
                    tracing::warn!(node = %id, "cyclic dependency detected");
                    self.tracking.poison_until(id);
                    return Err(ReactiveError::CyclicDependency { node: id });
                }
                NodeStatus::Stale => {}
            }
            // Sources never go stale; reactions are run by the pass.
            let NodeBody::Derivation(compute) = node.body() else {
                return Ok(());
            };
            let deps: Dependencies = node.dependencies().iter().copied().collect();
            (Rc::clone(compute), deps, node.verified_at(), node.is_forced())
        };

        let started = self.scheduler.revision();
        let evaluation = Evaluation::begin(self, id, deps.clone());
        let guard = ObserverGuard::enter(Some(id));

        if compute.is_overridden() {
            guard.finish();
            evaluation.complete();
            self.update_node(id, |node| node.settle(started));
            return Ok(());
        }

        if !forced {
            for dep in &deps {
                if let Err(err) = self.refresh(*dep) {
                    guard.finish();
                    return Err(err);
                }
            }
            let changed = {
                let graph = self.graph.borrow();
                deps.iter().any(|dep| graph.changed_at(*dep) > verified_at)
            };
            if !changed {
                guard.finish();
                evaluation.complete();
                self.update_node(id, |node| node.settle(started));
                tracing::trace!(node = %id, "derivation verified without recomputing");
                return Ok(());
            }
        }

        compute.run();
        let frame = guard.finish();
        if let Some(node) = compute.staged_cycle().or(frame.poisoned.then_some(id)) {
            compute.discard();
            return Err(ReactiveError::CyclicDependency { node });
        }
        evaluation.complete();

        let changed = compute.commit();
        let mut graph = self.graph.borrow_mut();
        graph.retain_dependencies(id, &frame.reads);
        if let Some(node) = graph.get_mut(id) {
            if changed {
                node.mark_changed(started);
            }
            node.settle(started);
        }
        tracing::trace!(node = %id, changed, "derivation recomputed");
        Ok(())
    }

    /// Verify a queued reaction and run it if any input changed.
    fn update_reaction(&self, id: NodeId) -> Result<()> {
        let (exec, deps, verified_at, forced) = {
            let graph = self.graph.borrow();
            let Some(node) = graph.get(id) else {
                return Ok(());
            };
            if node.status() != NodeStatus::Stale {
                return Ok(());
            }
            let NodeBody::Reaction(exec) = node.body() else {
                return Ok(());
            };
            let deps: Dependencies = node.dependencies().iter().copied().collect();
            (Rc::clone(exec), deps, node.verified_at(), node.is_forced())
        };

        for dep in &deps {
            self.refresh(*dep)?;
        }

        let changed = forced || {
            let graph = self.graph.borrow();
            deps.iter().any(|dep| graph.changed_at(*dep) > verified_at)
        };
        if !changed {
            let revision = self.scheduler.revision();
            self.update_node(id, |node| node.settle(revision));
            tracing::trace!(node = %id, "reaction inputs unchanged");
            return Ok(());
        }
        self.run_reaction(id, &exec)
    }

    /// Run a reaction inside its own tracking frame and scope.
    pub(crate) fn run_reaction(&self, id: NodeId, exec: &Rc<dyn Execute>) -> Result<()> {
        let (scope, prior) = {
            let graph = self.graph.borrow();
            let Some(node) = graph.get(id) else {
                return Ok(());
            };
            let prior: Dependencies = node.dependencies().iter().copied().collect();
            (node.scope(), prior)
        };
        let evaluation = Evaluation::begin(self, id, prior);
        let started = self.scheduler.revision();

        exec.cleanup();
        if let Some(scope) = scope {
            self.reset_scope(scope);
        }

        let (result, frame) = {
            let _scope = scope.map(ScopeGuard::enter);
            let guard = ObserverGuard::enter(Some(id));
            let result = exec.execute();
            (result, guard.finish())
        };
        evaluation.complete();

        let alive = {
            let mut graph = self.graph.borrow_mut();
            graph.retain_dependencies(id, &frame.reads);
            match graph.get_mut(id) {
                Some(node) => {
                    node.settle(started);
                    true
                }
                None => false,
            }
        };
        if !alive {
            // Disposed during its own run: release what the run just produced.
            exec.teardown();
        }
        tracing::trace!(node = %id, ok = result.is_ok(), "reaction ran");
        result
    }

    /// Run a freshly created reaction for the first time. A reaction whose
    /// first run fails is disposed.
    pub(crate) fn start_reaction(&self, id: NodeId, exec: &Rc<dyn Execute>) -> Result<()> {
        let batch = BatchGuard::enter();
        let result = self.run_reaction(id, exec);
        if let Err(err) = &result {
            tracing::debug!(node = %id, error = %err, "initial reaction run failed");
            self.dispose_node(id);
        }
        let flushed = batch.close();
        result.and(flushed)
    }

    /// Close one batch level and flush once the outermost one closes.
    pub(crate) fn end_batch(&self) -> Result<()> {
        if self.scheduler.end_batch() {
            self.flush()
        } else {
            Ok(())
        }
    }

    fn update_node(&self, id: NodeId, f: impl FnOnce(&mut Node)) {
        if let Some(node) = self.graph.borrow_mut().get_mut(id) {
            f(node);
        }
    }
}
