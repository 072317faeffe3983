//! Rotating cursor over an ordered list.
//!
//! A [`RingCursor`] starts [`Unlocked`]. Locking it checks that it is non-empty and yields a
//! [`Locked`] cursor whose contents are frozen and which only supports reading the current
//! item and advancing (wrapping at the end). Code that drives attempts holds a locked cursor,
//! so it cannot reorder or drop candidates mid-flight.

use std::marker::PhantomData;

use thiserror::Error;

/// Marker for a cursor whose contents may still change.
#[derive(Debug, Clone, Copy)]
pub struct Unlocked;

/// Marker for a frozen, non-empty cursor.
#[derive(Debug, Clone, Copy)]
pub struct Locked;

/// Cursor errors.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum RingError {
    /// A cursor with no items cannot be locked.
    #[error("cannot lock an empty ring cursor")]
    Empty,
}

/// Ordered items plus a wrapping position.
#[derive(Debug, Clone)]
pub struct RingCursor<T, S = Unlocked> {
    /// Items in rotation order.
    items: Vec<T>,
    /// Position of the current item; `< items.len()` whenever the cursor is locked.
    index: usize,
    /// Type-state marker.
    _state: PhantomData<S>,
}

impl<T> Default for RingCursor<T, Unlocked> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T, S> RingCursor<T, S> {
    /// Returns all items in rotation order.
    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Returns the number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true when there are no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the current position.
    #[must_use]
    pub const fn current_index(&self) -> usize {
        self.index
    }
}

impl<T> RingCursor<T, Unlocked> {
    /// Creates a cursor positioned at the first item.
    #[must_use]
    pub const fn new(items: Vec<T>) -> Self {
        Self {
            items,
            index: 0,
            _state: PhantomData,
        }
    }

    /// Freezes the contents.
    ///
    /// # Errors
    ///
    /// Returns [`RingError::Empty`] when there is nothing to rotate over.
    pub fn lock(self) -> Result<RingCursor<T, Locked>, RingError> {
        if self.items.is_empty() {
            return Err(RingError::Empty);
        }
        Ok(RingCursor {
            index: self.index.checked_rem(self.items.len()).unwrap_or(0),
            items: self.items,
            _state: PhantomData,
        })
    }
}

impl<T> RingCursor<T, Locked> {
    /// Returns the current item.
    #[must_use]
    #[allow(clippy::indexing_slicing)]
    pub fn current(&self) -> &T {
        // Locked cursors are non-empty and keep `index < len`.
        &self.items[self.index]
    }

    /// Moves to the next item, wrapping after the last, and returns it.
    pub fn advance(&mut self) -> &T {
        self.index = self
            .index
            .checked_add(1)
            .filter(|next| *next < self.items.len())
            .unwrap_or(0);
        self.current()
    }
}
