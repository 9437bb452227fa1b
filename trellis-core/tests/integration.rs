//! Integration Tests for the Reactive System
//!
//! These tests verify that sources, derivations, reactions and the
//! scheduler work together correctly through the public API only.

use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use tracing_subscriber::EnvFilter;
use trellis_core::{
    batch, configure, snapshot, subscribe_raw, untrack, watch, AsyncCell, AsyncState, Cleanup,
    Derivation, DisposedAccess, LinkedSignal, NodeKind, NodeStatus, Reaction, ReactiveError,
    RuntimeConfig, Scope, Source,
};

/// Send engine logs to the test output. `RUST_LOG=trellis_core=trace`
/// shows every edge change.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

fn counter() -> (Rc<Cell<usize>>, Rc<Cell<usize>>) {
    let count = Rc::new(Cell::new(0));
    (Rc::clone(&count), count)
}

fn bump(count: &Cell<usize>) {
    count.set(count.get() + 1);
}

/// Test that a diamond runs its reaction once per write, with both arms
/// already updated.
#[test]
fn diamond_is_glitch_free() {
    init_tracing();
    let a = Source::new(1);

    let a1 = a.clone();
    let b = Derivation::new(move || a1.read() * 2);
    let a2 = a.clone();
    let c = Derivation::new(move || a2.read() + 1);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let (b1, c1, log) = (b.clone(), c.clone(), Rc::clone(&seen));
    let d = Reaction::new(move || -> trellis_core::Result<()> {
        log.borrow_mut().push((b1.read()?, c1.read()?));
        Ok(())
    })
    .unwrap();

    a.write(10).unwrap();

    assert_eq!(d.run_count(), 2);
    // Never (20, 2) or (2, 11): both arms move together.
    assert_eq!(*seen.borrow(), vec![(2, 2), (20, 11)]);
}

/// The worked example: an equal write is a no-op, a real write runs the
/// reaction exactly once.
#[test]
fn sum_of_two_derivations() {
    let a = Source::new(1);
    let a1 = a.clone();
    let b = Derivation::new(move || a1.read() * 2);
    let a2 = a.clone();
    let c = Derivation::new(move || a2.read() + 1);

    let log = Rc::new(RefCell::new(Vec::new()));
    let (b1, c1, l) = (b.clone(), c.clone(), Rc::clone(&log));
    let reaction = Reaction::new(move || -> trellis_core::Result<()> {
        l.borrow_mut().push(b1.read()? + c1.read()?);
        Ok(())
    })
    .unwrap();

    a.write(1).unwrap();
    assert_eq!(*log.borrow(), vec![3]);

    a.write(5).unwrap();
    assert_eq!(*log.borrow(), vec![3, 16]);
    assert_eq!(reaction.run_count(), 2);
}

/// Test that writing an equal value recomputes and runs nothing.
#[test]
fn equal_write_short_circuits() {
    let source = Source::new(7);
    let (computes, compute_count) = counter();
    let s = source.clone();
    let derived = Derivation::new(move || {
        bump(&computes);
        s.read() + 1
    });

    let (runs, run_count) = counter();
    let d = derived.clone();
    let _reaction = Reaction::new(move || {
        bump(&runs);
        let _ = d.read();
    })
    .unwrap();

    assert_eq!((compute_count.get(), run_count.get()), (1, 1));
    source.write(7).unwrap();
    assert_eq!((compute_count.get(), run_count.get()), (1, 1));
}

/// Test that derivations never compute before their first read.
#[test]
fn derivations_are_lazy() {
    let source = Source::new(1);
    let (computes, compute_count) = counter();
    let s = source.clone();
    let derived = Derivation::new(move || {
        bump(&computes);
        s.read() * 3
    });

    source.write(2).unwrap();
    source.write(3).unwrap();
    assert_eq!(compute_count.get(), 0);

    assert_eq!(derived.read().unwrap(), 9);
    assert_eq!(compute_count.get(), 1);

    // Stale but unread: still no work.
    source.write(4).unwrap();
    assert_eq!(compute_count.get(), 1);
}

/// Test that three writes inside a batch run each reaction once.
#[test]
fn batch_coalesces_writes() {
    let x = Source::new(0);
    let y = Source::new(0);
    let z = Source::new(0);

    let (runs, run_count) = counter();
    let (x1, y1, z1) = (x.clone(), y.clone(), z.clone());
    let _sum = Reaction::new(move || {
        bump(&runs);
        let _ = x1.read() + y1.read() + z1.read();
    })
    .unwrap();

    batch(|| -> trellis_core::Result<()> {
        x.write(1)?;
        y.write(2)?;
        z.write(3)
    })
    .unwrap()
    .unwrap();

    assert_eq!(run_count.get(), 2);
}

/// Test that disposing a reaction's scope stops it for good.
#[test]
fn disposal_halts_propagation() {
    let source = Source::new(0);
    let (runs, run_count) = counter();
    let (cleanups, cleanup_count) = counter();

    let scope = Scope::new();
    let s = source.clone();
    scope.run(|| {
        Reaction::new(move || {
            bump(&runs);
            s.read();
            let cleanups = Rc::clone(&cleanups);
            Cleanup::new(move || bump(&cleanups))
        })
        .unwrap();
    });

    source.write(1).unwrap();
    assert_eq!(run_count.get(), 2);

    scope.dispose();
    assert_eq!(cleanup_count.get(), 2);

    source.write(2).unwrap();
    source.write(3).unwrap();
    assert_eq!(run_count.get(), 2);
}

/// Test that disposal from inside a running reaction is honoured.
#[test]
fn reaction_can_dispose_its_own_scope() {
    let source = Source::new(0);
    let (runs, run_count) = counter();

    let scope = Scope::new();
    let s = source.clone();
    scope.run(|| {
        Reaction::new(move || {
            bump(&runs);
            if s.read() == 1 {
                scope.dispose();
            }
        })
        .unwrap();
    });

    source.write(1).unwrap();
    source.write(2).unwrap();
    assert_eq!(run_count.get(), 2);
    assert!(scope.is_disposed());
}

/// Test linked signal override and reset.
#[test]
fn linked_signal_override_and_reset() {
    let options = Source::new(vec!["a", "b", "c"]);
    let o = options.clone();
    let selected = LinkedSignal::new(move || o.read()[0]);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let (sel, log) = (selected.clone(), Rc::clone(&seen));
    let _reaction = Reaction::new(move || -> trellis_core::Result<()> {
        log.borrow_mut().push(sel.read()?);
        Ok(())
    })
    .unwrap();

    selected.set("b").unwrap();
    assert_eq!(selected.read().unwrap(), "b");

    // Upstream change does not discard the override.
    options.write(vec!["x", "y"]).unwrap();
    assert_eq!(selected.read().unwrap(), "b");

    selected.reset().unwrap();
    assert_eq!(selected.read().unwrap(), "x");
    assert_eq!(*seen.borrow(), vec!["a", "b", "x"]);
}

/// Test that a cycle reports an error, leaves the nodes stale, and that a
/// write breaking the cycle lets the next read succeed.
#[test]
fn cycles_fail_and_recover() {
    init_tracing();
    let looped = Source::new(true);
    let slot: Rc<RefCell<Option<Derivation<i32>>>> = Rc::new(RefCell::new(None));

    let (l, back) = (looped.clone(), Rc::clone(&slot));
    let first = Derivation::try_new(move || {
        if !l.read() {
            return Ok(1);
        }
        let second = back.borrow().clone();
        match second {
            Some(second) => second.read().map(|v| v + 1),
            None => Ok(0),
        }
    });
    let f = first.clone();
    let second = Derivation::try_new(move || f.read().map(|v| v * 10));
    *slot.borrow_mut() = Some(second.clone());

    let err = second.read().unwrap_err();
    assert!(err.is_cycle());

    let snap = snapshot();
    assert_eq!(snap.node(first.id()).unwrap().status, NodeStatus::Stale);
    assert_eq!(snap.node(second.id()).unwrap().status, NodeStatus::Stale);
    // The edge that closed the loop is gone; upstream edges remain.
    assert_eq!(snap.node(first.id()).unwrap().dependencies, vec![looped.id()]);
    assert_eq!(snap.node(second.id()).unwrap().dependencies, vec![first.id()]);

    looped.write(false).unwrap();
    assert_eq!(second.read().unwrap(), 10);
    assert_eq!(first.read().unwrap(), 1);
}

/// Test that a reaction which swallowed a cycle error still hears about
/// the write that breaks the cycle.
#[test]
fn reaction_recovers_after_a_cycle_is_broken() {
    init_tracing();
    let looped = Source::new(true);
    let slot: Rc<RefCell<Option<Derivation<i32>>>> = Rc::new(RefCell::new(None));

    let (l, back) = (looped.clone(), Rc::clone(&slot));
    let first = Derivation::try_new(move || {
        if !l.read() {
            return Ok(1);
        }
        let second = back.borrow().clone();
        match second {
            Some(second) => second.read().map(|v| v + 1),
            None => Ok(0),
        }
    });
    let f = first.clone();
    let second = Derivation::try_new(move || f.read().map(|v| v * 10));
    *slot.borrow_mut() = Some(second.clone());

    let seen = Rc::new(RefCell::new(Vec::new()));
    let (s, log) = (second.clone(), Rc::clone(&seen));
    let _reaction = Reaction::new(move || log.borrow_mut().push(s.read().ok())).unwrap();
    assert_eq!(*seen.borrow(), vec![None]);

    looped.write(false).unwrap();
    assert_eq!(*seen.borrow(), vec![None, Some(10)]);
}

/// Test that a failing derivation's error is delivered to its readers.
#[test]
fn errored_derivation_rethrows_to_dependents() {
    let input = Source::new("12".to_string());
    let i = input.clone();
    let parsed = Derivation::try_new(move || i.with(|text| text.parse::<i32>()).map_err(ReactiveError::compute));
    let p = parsed.clone();
    let doubled = Derivation::try_new(move || p.read().map(|n| n * 2));

    assert_eq!(doubled.read().unwrap(), 24);

    input.write("twelve".to_string()).unwrap();
    let err = doubled.read().unwrap_err();
    assert!(err.to_string().contains("invalid digit"));

    input.write("5".to_string()).unwrap();
    assert_eq!(doubled.read().unwrap(), 10);
}

/// Test that a reaction error reaches the writer, while other reactions
/// in the same pass still run.
#[test]
fn reaction_errors_propagate_to_the_write() {
    let source = Source::new(0);
    let s1 = source.clone();
    let _failing = Reaction::new(move || -> trellis_core::Result<()> {
        if s1.read() > 0 {
            return Err("rejected".into());
        }
        Ok(())
    })
    .unwrap();

    let (runs, run_count) = counter();
    let s2 = source.clone();
    let _healthy = Reaction::new(move || {
        bump(&runs);
        s2.read();
    })
    .unwrap();

    let err = source.write(1).unwrap_err();
    assert_eq!(err, ReactiveError::msg("rejected"));
    assert_eq!(run_count.get(), 2);
}

/// Test that reactions writing each other forever hit the runaway guard.
#[test]
fn runaway_propagation_is_bounded() {
    init_tracing();
    configure(RuntimeConfig::default().with_max_reaction_runs(50));

    let ping = Source::new(0);
    let p = ping.clone();
    let _echo = Reaction::new(move || -> trellis_core::Result<()> {
        let value = p.read();
        p.write(value + 1)
    })
    .unwrap_err();

    let err = ping.write(100).unwrap_err();
    assert!(matches!(err, ReactiveError::RunawayPropagation { runs: 50 }));
    configure(RuntimeConfig::default());
}

/// Test that conditional reads rebuild the dependency set every run.
#[test]
fn dynamic_dependencies_are_rebuilt() {
    let use_left = Source::new(true);
    let left = Source::new("left");
    let right = Source::new("right");

    let (u, l, r) = (use_left.clone(), left.clone(), right.clone());
    let (runs, run_count) = counter();
    let _reaction = Reaction::new(move || {
        bump(&runs);
        if u.read() {
            l.read();
        } else {
            r.read();
        }
    })
    .unwrap();

    right.write("ignored").unwrap();
    assert_eq!(run_count.get(), 1);

    use_left.write(false).unwrap();
    assert_eq!(run_count.get(), 2);

    left.write("now ignored").unwrap();
    assert_eq!(run_count.get(), 2);
    right.write("seen").unwrap();
    assert_eq!(run_count.get(), 3);
}

/// Test that writes made by a reaction extend the pass that ran it.
#[test]
fn writes_from_reactions_are_picked_up() {
    let celsius = Source::new(0.0_f64);
    let fahrenheit = Source::new(32.0_f64);

    let (c, f) = (celsius.clone(), fahrenheit.clone());
    let _sync = Reaction::new(move || f.write(c.read() * 9.0 / 5.0 + 32.0)).unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let (f2, log) = (fahrenheit.clone(), Rc::clone(&seen));
    let _display = Reaction::new(move || log.borrow_mut().push(f2.read())).unwrap();

    celsius.write(100.0).unwrap();
    assert_eq!(*seen.borrow(), vec![32.0, 212.0]);
}

/// Test the lenient and strict policies for disposed nodes.
#[test]
fn disposed_access_policies() {
    init_tracing();
    let scope = Scope::new();
    let (source, derived) = scope.run(|| {
        let source = Source::new(2);
        let s = source.clone();
        (source, Derivation::new(move || s.read() * 2))
    });
    assert_eq!(derived.read().unwrap(), 4);
    scope.dispose();

    // Lenient: last known values, writes ignored.
    assert!(source.write(3).is_ok());
    assert_eq!(source.read(), 2);
    assert_eq!(derived.read().unwrap(), 4);

    configure(RuntimeConfig::default().with_disposed_access(DisposedAccess::Strict));
    assert!(matches!(source.write(3), Err(ReactiveError::Disposed { .. })));
    assert!(matches!(derived.read(), Err(ReactiveError::Disposed { .. })));
    configure(RuntimeConfig::default());
}

/// Test that untracked reads inside a derivation never invalidate it.
#[test]
fn untrack_inside_derivation() {
    let tracked = Source::new(1);
    let peeked = Source::new(100);
    let (computes, compute_count) = counter();
    let (t, p) = (tracked.clone(), peeked.clone());
    let derived = Derivation::new(move || {
        bump(&computes);
        t.read() + untrack(|| p.read())
    });

    assert_eq!(derived.read().unwrap(), 101);
    peeked.write(200).unwrap();
    assert_eq!(derived.read().unwrap(), 101);
    tracked.write(2).unwrap();
    assert_eq!(derived.read().unwrap(), 202);
    assert_eq!(compute_count.get(), 2);
}

/// Test that subscriptions mirror changes and stop on unsubscribe.
#[test]
fn subscribe_raw_mirrors_changes() {
    let source = Source::new(1);
    let s = source.clone();
    let squared = Derivation::new(move || s.read() * s.read());

    let mirror = Rc::new(RefCell::new(Vec::new()));
    let m = Rc::clone(&mirror);
    let sub = subscribe_raw(&squared, move |value| m.borrow_mut().push(value.unwrap())).unwrap();

    source.write(2).unwrap();
    source.write(-2).unwrap();
    source.write(3).unwrap();
    sub.unsubscribe();
    source.write(4).unwrap();

    assert_eq!(*mirror.borrow(), vec![4, 9]);
}

/// Test that a disposed scope tears down every node kind it owns.
#[test]
fn scope_disposal_removes_nodes_from_the_graph() {
    let scope = Scope::new();
    scope.run(|| {
        let source = Source::new(0);
        let s = source.clone();
        let derived = Derivation::new(move || s.read());
        Reaction::new(move || {
            let _ = derived.read();
        })
        .unwrap();
    });

    let before = snapshot();
    assert_eq!(before.count(NodeKind::Reaction), 1);
    scope.dispose();
    assert!(snapshot().nodes.is_empty());
}

/// Test last-request-wins ordering on a real tokio `LocalSet`.
#[tokio::test]
async fn async_cell_last_request_wins() {
    use tokio::sync::oneshot;

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let query = Source::new(1);
            let senders: Rc<RefCell<Vec<oneshot::Sender<i32>>>> = Rc::new(RefCell::new(Vec::new()));

            let (q, tx) = (query.clone(), Rc::clone(&senders));
            let cell = AsyncCell::new(move || {
                let _ = q.read();
                let (sender, receiver) = oneshot::channel();
                tx.borrow_mut().push(sender);
                async move { receiver.await.map_err(ReactiveError::compute) }
            })
            .unwrap();

            let states = Rc::new(RefCell::new(Vec::new()));
            let log = Rc::clone(&states);
            let _sub = subscribe_raw(&cell, move |state| log.borrow_mut().push(state)).unwrap();

            query.write(2).unwrap();
            assert_eq!(cell.generation(), 2);

            let mut pending = senders.borrow_mut().drain(..).collect::<Vec<_>>();
            let first = pending.remove(0);
            let second = pending.remove(0);

            // The second request resolves first; the first resolves late.
            second.send(20).unwrap();
            tokio::task::yield_now().await;
            first.send(10).unwrap();
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;

            assert_eq!(cell.read(), AsyncState::Resolved(20));
            assert_eq!(*states.borrow(), vec![AsyncState::Resolved(20)]);
        })
        .await;
}

/// Test that a rejected producer lands in the state instead of erroring.
#[tokio::test]
async fn async_cell_rejection_is_state() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let cell = AsyncCell::new(|| async { Err::<u8, _>("service unavailable") }).unwrap();
            assert!(cell.is_pending());

            tokio::task::yield_now().await;
            tokio::task::yield_now().await;

            let state = cell.read();
            assert!(state.value().is_none());
            assert_eq!(
                state.error().map(ToString::to_string).as_deref(),
                Some("computation failed: service unavailable")
            );
        })
        .await;
}

/// Test that a parent reaction disposes the child it created before that
/// child can react to the same write.
#[test]
fn parent_reaction_unmounts_child_before_it_runs() {
    let show = Source::new(true);
    let log = Rc::new(RefCell::new(Vec::new()));

    let (s, parent_log) = (show.clone(), Rc::clone(&log));
    let _parent = Reaction::new(move || {
        let visible = s.read();
        parent_log.borrow_mut().push(format!("parent {visible}"));
        if visible {
            let (s, child_log) = (s.clone(), Rc::clone(&parent_log));
            Reaction::new(move || child_log.borrow_mut().push(format!("child {}", s.read())))
                .unwrap();
        }
    })
    .unwrap();
    assert_eq!(*log.borrow(), vec!["parent true", "child true"]);
    log.borrow_mut().clear();

    show.write(false).unwrap();
    assert_eq!(*log.borrow(), vec!["parent false"]);
}

/// Test that creation order wins even when the parent reads through a
/// derivation and the child reads the source directly.
#[test]
fn parent_reading_through_a_derivation_still_runs_first() {
    let show = Source::new(true);
    let s = show.clone();
    let visible = Derivation::new(move || s.read());
    let log = Rc::new(RefCell::new(Vec::new()));

    let (v, s, parent_log) = (visible.clone(), show.clone(), Rc::clone(&log));
    let _parent = Reaction::new(move || {
        let visible = v.read().unwrap_or(false);
        parent_log.borrow_mut().push(format!("parent {visible}"));
        if visible {
            let (s, child_log) = (s.clone(), Rc::clone(&parent_log));
            Reaction::new(move || child_log.borrow_mut().push(format!("child {}", s.read())))
                .unwrap();
        }
    })
    .unwrap();
    log.borrow_mut().clear();

    show.write(false).unwrap();
    assert_eq!(*log.borrow(), vec!["parent false"]);
}

/// Test that sibling reactions run in the order they were created.
#[test]
fn sibling_reactions_run_in_creation_order() {
    let source = Source::new(0);
    let order = Rc::new(RefCell::new(Vec::new()));

    let _reactions: Vec<Reaction> = (0..3)
        .map(|i| {
            let (s, log) = (source.clone(), Rc::clone(&order));
            Reaction::new(move || {
                if s.read() > 0 {
                    log.borrow_mut().push(i);
                }
            })
            .unwrap()
        })
        .collect();

    source.write(1).unwrap();
    assert_eq!(*order.borrow(), vec![0, 1, 2]);
}

/// Test that a derivation whose computation panicked is not left
/// computing, and recomputes once its input moves on.
#[test]
fn panicking_derivation_recovers_on_the_next_write() {
    init_tracing();
    let source = Source::new(0);
    let s = source.clone();
    let derived = Derivation::new(move || {
        let value = s.read();
        assert_ne!(value, 1, "derivation rejects 1");
        value
    });
    assert_eq!(derived.read().unwrap(), 0);

    source.write(1).unwrap();
    let d = derived.clone();
    assert!(catch_unwind(AssertUnwindSafe(|| d.read())).is_err());
    assert_eq!(snapshot().node(derived.id()).unwrap().status, NodeStatus::Stale);

    source.write(2).unwrap();
    assert_eq!(derived.read().unwrap(), 2);
}

/// Test that a reaction whose run panicked runs again on the next write.
#[test]
fn panicking_reaction_runs_again_on_the_next_write() {
    init_tracing();
    let source = Source::new(0);
    let seen = Rc::new(RefCell::new(Vec::new()));

    let (s, log) = (source.clone(), Rc::clone(&seen));
    let reaction = Reaction::new(move || {
        let value = s.read();
        assert_ne!(value, 1, "reaction rejects 1");
        log.borrow_mut().push(value);
    })
    .unwrap();

    assert!(catch_unwind(AssertUnwindSafe(|| source.write(1))).is_err());
    source.write(2).unwrap();

    assert_eq!(*seen.borrow(), vec![0, 2]);
    assert_eq!(reaction.run_count(), 3);
}

/// Test that a reaction panicking on its first run does not leave
/// propagation deferred for everything created afterwards.
#[test]
fn panic_on_creation_does_not_leave_a_batch_open() {
    init_tracing();
    let unwound = catch_unwind(|| Reaction::new(|| -> Result<(), ReactiveError> { panic!("boom") }));
    assert!(unwound.is_err());

    let source = Source::new(0);
    let (runs, count) = counter();
    let s = source.clone();
    let _reaction = Reaction::new(move || {
        s.read();
        bump(&count);
    })
    .unwrap();

    source.write(1).unwrap();
    assert_eq!(runs.get(), 2);
}

/// Test that a host bridge can hold only the read half of a source while
/// application code writes through the other half.
#[test]
fn split_halves_bridge_to_a_host() {
    let (count, set_count) = Source::new(0).split();
    let mirrored = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&mirrored);
    let _sub = subscribe_raw(&count, move |value| log.borrow_mut().push(value)).unwrap();

    let history = Rc::new(RefCell::new(Vec::new()));
    let (c, changes) = (count.clone(), Rc::clone(&history));
    let _watcher = watch(move || c.read() / 10, move |bucket, previous| {
        changes.borrow_mut().push((bucket, previous));
    })
    .unwrap();

    set_count.write(4).unwrap();
    set_count.with_mut(|n| *n += 8).unwrap();
    batch(|| set_count.write(13)).unwrap().unwrap();

    assert_eq!(*mirrored.borrow(), vec![4, 12, 13]);
    assert_eq!(*history.borrow(), vec![(0, None), (1, Some(0))]);
}
