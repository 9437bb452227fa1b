//! Watchers
//!
//! [`watch`] splits a reaction into what it observes and what it does. The
//! observed expression is tracked; the callback is not, and it only fires
//! when the expression's value actually differs from the last one seen.

use crate::error::Result;

use super::batch::untrack;
use super::reaction::Reaction;

/// Run `callback(value, previous)` now and whenever `expr` yields a
/// different value.
///
/// `expr` runs tracked. `callback` runs untracked, so reads inside it do
/// not re-trigger the watcher. The first call receives `None` as the
/// previous value.
///
/// ```rust,ignore
/// let count = Source::new(0);
/// let c = count.clone();
/// let _watcher = watch(move || c.read(), |value, previous| {
///     println!("count went from {previous:?} to {value}");
/// })?;
/// ```
pub fn watch<T, F, C>(expr: F, mut callback: C) -> Result<Reaction>
where
    T: Clone + PartialEq + 'static,
    F: Fn() -> T + 'static,
    C: FnMut(T, Option<T>) + 'static,
{
    let mut last: Option<T> = None;
    Reaction::new(move || {
        let value = expr();
        if last.as_ref() == Some(&value) {
            return;
        }
        let previous = last.replace(value.clone());
        untrack(|| callback(value, previous));
    })
}
