//! Generation-checked handle types for arena slots.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// A handle to a value stored in an [`Arena`](super::Arena).
///
/// The generation is bumped every time a slot is freed, so a handle to a
/// removed value never resolves to whatever later reuses the slot.
#[repr(C)]
pub struct SlotId<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SlotId<T> {
    /// Creates a handle from a slot index and generation.
    ///
    /// # Panics
    /// Panics if `index >= u32::MAX`.
    #[inline]
    pub(crate) fn new(index: usize, generation: u32) -> Self {
        assert!(
            index < u32::MAX as usize,
            "slot index must be less than u32::MAX"
        );
        Self {
            index: index as u32,
            generation,
            _marker: PhantomData,
        }
    }

    /// Returns the slot index as a usize.
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

// Manual impls: derives would require `T: Clone` and friends.

impl<T> Clone for SlotId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SlotId<T> {}

impl<T> PartialEq for SlotId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for SlotId<T> {}

impl<T> PartialOrd for SlotId<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for SlotId<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index
            .cmp(&other.index)
            .then(self.generation.cmp(&other.generation))
    }
}

impl<T> Hash for SlotId<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for SlotId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotId({}v{})", self.index, self.generation)
    }
}
