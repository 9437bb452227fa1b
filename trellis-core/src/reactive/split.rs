//! Read and Write Halves
//!
//! A source can be handed out as two capability handles. A [`ReadSource`]
//! can be read and observed but never written; a [`WriteSource`] can be
//! written but never read. Giving a component only the half it needs keeps
//! every write to a piece of state in one known place.
//!
//! Both halves share the source's node, so they are disposed with it.

use std::fmt;

use crate::error::Result;
use crate::graph::NodeId;

use super::source::Source;

impl<T: 'static> Source<T> {
    /// Split the source into its read and write halves.
    ///
    /// ```rust,ignore
    /// let (count, set_count) = Source::new(0).split();
    /// set_count.write(1)?;
    /// assert_eq!(count.read(), 1);
    /// ```
    pub fn split(self) -> (ReadSource<T>, WriteSource<T>) {
        (self.read_only(), WriteSource { source: self })
    }

    /// A read-only handle to this source.
    pub fn read_only(&self) -> ReadSource<T> {
        ReadSource {
            source: self.clone(),
        }
    }

    /// A write-only handle to this source.
    pub fn write_only(&self) -> WriteSource<T> {
        WriteSource {
            source: self.clone(),
        }
    }
}

/// The read half of a [`Source`].
pub struct ReadSource<T: 'static> {
    source: Source<T>,
}

impl<T: 'static> ReadSource<T> {
    pub fn id(&self) -> NodeId {
        self.source.id()
    }

    /// Borrow the current value, registering a dependency.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.source.with(f)
    }

    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.source.with_untracked(f)
    }

    /// Revision at which the value last changed.
    pub fn version(&self) -> u64 {
        self.source.version()
    }

    pub fn is_disposed(&self) -> bool {
        self.source.is_disposed()
    }
}

impl<T: Clone + 'static> ReadSource<T> {
    pub fn read(&self) -> T {
        self.source.read()
    }

    pub fn read_untracked(&self) -> T {
        self.source.read_untracked()
    }
}

impl<T: 'static> Clone for ReadSource<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for ReadSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadSource").field(&self.source).finish()
    }
}

/// The write half of a [`Source`].
pub struct WriteSource<T: 'static> {
    source: Source<T>,
}

impl<T: 'static> WriteSource<T> {
    pub fn id(&self) -> NodeId {
        self.source.id()
    }

    /// See [`Source::write`].
    pub fn write(&self, value: T) -> Result<()> {
        self.source.write(value)
    }

    /// See [`Source::update`].
    pub fn update(&self, f: impl FnOnce(&mut T)) -> Result<()> {
        self.source.update(f)
    }

    /// See [`Source::with_mut`].
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<Option<R>> {
        self.source.with_mut(f)
    }

    pub fn is_disposed(&self) -> bool {
        self.source.is_disposed()
    }
}

impl<T: 'static> Clone for WriteSource<T> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
        }
    }
}

impl<T: 'static> fmt::Debug for WriteSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteSource")
            .field("id", &self.source.id())
            .finish_non_exhaustive()
    }
}
