//! Entry enum for arena slots.

/// Internal entry representation for arena slots.
#[derive(Debug, Clone)]
pub enum Entry<T> {
    /// Slot is free; stores the index of the next free slot in the freelist.
    Vacant(usize),
    /// Slot is occupied by a value.
    Occupied(T),
}

/// A slot pairs an entry with the generation that currently owns it.
#[derive(Debug, Clone)]
pub struct Slot<T> {
    pub generation: u32,
    pub entry: Entry<T>,
}
