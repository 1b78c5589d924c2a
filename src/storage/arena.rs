//! Heap-backed arena with a freelist and generation-checked handles.

use std::mem;
use std::ops::{Index, IndexMut};

use super::entry::{Entry, Slot};
use super::index_types::SlotId;

/// Sentinel for an empty freelist.
const NO_FREE_SLOT: usize = usize::MAX;

/// Stores values in slots addressed by [`SlotId`].
///
/// Removing a value bumps the slot generation and pushes the slot on the
/// freelist; the next insert reuses it under the new generation.
#[derive(Debug, Clone)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    /// Logical element count (occupied slots only).
    len: usize,
    /// Head of the freelist (index of the next available slot).
    next: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
            next: NO_FREE_SLOT,
        }
    }

    /// Inserts a value, returning its handle.
    pub fn insert(&mut self, value: T) -> SlotId<T> {
        self.len += 1;
        if self.next == NO_FREE_SLOT {
            let index = self.slots.len();
            self.slots.push(Slot {
                generation: 0,
                entry: Entry::Occupied(value),
            });
            return SlotId::new(index, 0);
        }

        // Reusing a vacant slot from the freelist
        let index = self.next;
        let slot = &mut self.slots[index];
        self.next = match slot.entry {
            Entry::Vacant(next) => next,
            Entry::Occupied(_) => unreachable!("freelist points at an occupied slot"),
        };
        slot.entry = Entry::Occupied(value);
        SlotId::new(index, slot.generation)
    }

    /// Gets a reference to the value behind `id` if the handle is still live.
    pub fn get(&self, id: SlotId<T>) -> Option<&T> {
        match self.slots.get(id.index()) {
            Some(Slot {
                generation,
                entry: Entry::Occupied(value),
            }) if *generation == id.generation() => Some(value),
            _ => None,
        }
    }

    /// Gets a mutable reference to the value behind `id` if the handle is still live.
    pub fn get_mut(&mut self, id: SlotId<T>) -> Option<&mut T> {
        match self.slots.get_mut(id.index()) {
            Some(Slot {
                generation,
                entry: Entry::Occupied(value),
            }) if *generation == id.generation() => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, id: SlotId<T>) -> bool {
        self.get(id).is_some()
    }

    /// Removes the value behind `id`, returning it if the handle was live.
    pub fn try_remove(&mut self, id: SlotId<T>) -> Option<T> {
        let next_free = self.next;
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation() || matches!(slot.entry, Entry::Vacant(_)) {
            return None;
        }
        let prev = mem::replace(&mut slot.entry, Entry::Vacant(next_free));
        slot.generation = slot.generation.wrapping_add(1);
        self.next = id.index();
        self.len -= 1;
        match prev {
            Entry::Occupied(value) => Some(value),
            Entry::Vacant(_) => None,
        }
    }

    /// Returns the number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates over occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId<T>, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match &slot.entry {
                Entry::Occupied(value) => Some((SlotId::new(index, slot.generation), value)),
                Entry::Vacant(_) => None,
            })
    }
}

impl<T> Index<SlotId<T>> for Arena<T> {
    type Output = T;

    fn index(&self, id: SlotId<T>) -> &Self::Output {
        match self.get(id) {
            Some(value) => value,
            None => panic!("stale arena handle {id:?}"),
        }
    }
}

impl<T> IndexMut<SlotId<T>> for Arena<T> {
    fn index_mut(&mut self, id: SlotId<T>) -> &mut Self::Output {
        match self.get_mut(id) {
            Some(value) => value,
            None => panic!("stale arena handle {id:?}"),
        }
    }
}
