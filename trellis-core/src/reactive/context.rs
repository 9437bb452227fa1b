//! Tracking Context
//!
//! The tracking context records which node is currently evaluating, so
//! that reads can register dependency edges automatically.
//!
//! # Implementation
//!
//! Every runtime keeps a stack of frames. Entering an evaluation pushes a
//! frame for the evaluating node; [`untrack`](crate::untrack) pushes an
//! empty frame so nested reads register nothing. Frames are popped by an
//! RAII guard, so the stack stays balanced even if user code panics.

use std::cell::RefCell;

use indexmap::IndexSet;

use crate::graph::NodeId;

use super::runtime::with_runtime;

/// One entry of the tracking stack.
#[derive(Debug, Default)]
pub(crate) struct Frame {
    /// The node being evaluated, or `None` inside `untrack`.
    pub(crate) observer: Option<NodeId>,

    /// Nodes read during this evaluation, in first-read order.
    pub(crate) reads: IndexSet<NodeId>,

    /// Set when this evaluation took part in a dependency cycle.
    pub(crate) poisoned: bool,
}

/// The per-runtime stack of tracking frames.
#[derive(Debug, Default)]
pub(crate) struct TrackingStack {
    frames: RefCell<Vec<Frame>>,
}

impl TrackingStack {
    pub(crate) fn push(&self, observer: Option<NodeId>) {
        self.frames.borrow_mut().push(Frame {
            observer,
            ..Frame::default()
        });
    }

    pub(crate) fn pop(&self) -> Option<Frame> {
        self.frames.borrow_mut().pop()
    }

    /// The node that a read right now would be attributed to.
    pub(crate) fn current_observer(&self) -> Option<NodeId> {
        self.frames.borrow().last().and_then(|frame| frame.observer)
    }

    /// Whether any node is mid-evaluation. `untrack` frames do not count.
    pub(crate) fn is_evaluating(&self) -> bool {
        self.frames.borrow().iter().any(|frame| frame.observer.is_some())
    }

    /// Record a read in the top frame. Returns the observer to link, if the
    /// read is new for this evaluation.
    pub(crate) fn record(&self, dependency: NodeId) -> Option<NodeId> {
        let mut frames = self.frames.borrow_mut();
        let frame = frames.last_mut()?;
        let observer = frame.observer?;
        if observer == dependency {
            return None;
        }
        frame.reads.insert(dependency).then_some(observer)
    }

    /// Poison every frame from the top of the stack down to and including
    /// the frame evaluating `node`.
    pub(crate) fn poison_until(&self, node: NodeId) {
        let mut frames = self.frames.borrow_mut();
        for frame in frames.iter_mut().rev() {
            frame.poisoned = true;
            if frame.observer == Some(node) {
                break;
            }
        }
    }
}

/// Guard that pops its frame when dropped.
///
/// Use [`finish`](Self::finish) to take the frame's collected reads.
pub(crate) struct ObserverGuard {
    observer: Option<NodeId>,
    active: bool,
}

impl ObserverGuard {
    /// Push a frame for `observer` onto the current runtime's stack.
    pub(crate) fn enter(observer: Option<NodeId>) -> Self {
        with_runtime(|rt| rt.tracking.push(observer));
        Self {
            observer,
            active: true,
        }
    }

    /// Pop the frame and hand back what it collected.
    pub(crate) fn finish(mut self) -> Frame {
        self.active = false;
        let frame = with_runtime(|rt| rt.tracking.pop()).unwrap_or_default();
        debug_assert_eq!(
            frame.observer, self.observer,
            "tracking frame mismatch: expected {:?}, got {:?}",
            self.observer, frame.observer
        );
        frame
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        if self.active {
            let _ = with_runtime(|rt| rt.tracking.pop());
        }
    }
}

/// Whether a read performed right now would register a dependency.
pub fn is_tracking() -> bool {
    with_runtime(|rt| rt.tracking.current_observer().is_some())
}
