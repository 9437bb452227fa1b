//! Batching and untracked reads.

use super::context::ObserverGuard;
use super::runtime::with_runtime;
use crate::error::Result;

/// Closes a batch level on drop. A batch unwound by a panic closes without
/// flushing; the queued work runs with the next pass.
pub(crate) struct BatchGuard {
    open: bool,
}

impl BatchGuard {
    pub(crate) fn enter() -> Self {
        with_runtime(|rt| rt.scheduler.begin_batch());
        Self { open: true }
    }

    pub(crate) fn close(mut self) -> Result<()> {
        self.open = false;
        with_runtime(|rt| rt.end_batch())
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if self.open {
            with_runtime(|rt| rt.scheduler.end_batch());
        }
    }
}

/// Run `f` with propagation deferred, then stabilize once.
///
/// Writes inside `f` mark their dependents but run no reactions; when the
/// outermost batch returns, a single pass runs every affected reaction at
/// most once. Derivations read inside `f` already see the new values.
///
/// Returns `f`'s result, or the first error raised by a reaction during
/// the closing pass.
///
/// ```rust,ignore
/// batch(|| {
///     first.write("Grace".into())?;
///     last.write("Hopper".into())
/// })??;
/// ```
pub fn batch<R>(f: impl FnOnce() -> R) -> Result<R> {
    let guard = BatchGuard::enter();
    let value = f();
    guard.close()?;
    Ok(value)
}

/// Run `f` without registering any dependency for reads made inside it.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _guard = ObserverGuard::enter(None);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Derivation, Reaction, Source};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn writes_in_a_batch_run_reactions_once() {
        let a = Source::new(0);
        let b = Source::new(0);
        let (ra, rb) = (a.clone(), b.clone());
        let reaction = Reaction::new(move || {
            ra.read();
            rb.read();
        })
        .unwrap();

        batch(|| {
            a.write(1).unwrap();
            b.write(1).unwrap();
            a.write(2).unwrap();
            assert_eq!(reaction.run_count(), 1);
        })
        .unwrap();
        assert_eq!(reaction.run_count(), 2);
    }

    #[test]
    fn nested_batches_flush_at_the_outermost() {
        let a = Source::new(0);
        let ra = a.clone();
        let reaction = Reaction::new(move || {
            ra.read();
        })
        .unwrap();

        batch(|| {
            batch(|| a.write(1).unwrap()).unwrap();
            assert_eq!(reaction.run_count(), 1);
        })
        .unwrap();
        assert_eq!(reaction.run_count(), 2);
    }

    #[test]
    fn derivations_read_inside_a_batch_are_current() {
        let a = Source::new(1);
        let ra = a.clone();
        let doubled = Derivation::new(move || ra.read() * 2);

        batch(|| {
            a.write(5).unwrap();
            assert_eq!(doubled.read().unwrap(), 10);
        })
        .unwrap();
    }

    #[test]
    fn untracked_reads_register_nothing() {
        let tracked = Source::new(0);
        let ignored = Source::new(0);
        let calls = Rc::new(Cell::new(0));
        let (t, i, counter) = (tracked.clone(), ignored.clone(), Rc::clone(&calls));

        let _reaction = Reaction::new(move || {
            t.read();
            untrack(|| i.read());
            counter.set(counter.get() + 1);
        })
        .unwrap();

        ignored.write(1).unwrap();
        assert_eq!(calls.get(), 1);
        tracked.write(1).unwrap();
        assert_eq!(calls.get(), 2);
    }
}
