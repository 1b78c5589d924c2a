//! Storage layer for the share tree.
//!
//! Directory and file nodes live in arenas and are addressed by
//! generation-checked handles, so a detached or destroyed subtree never
//! leaves a dangling reference behind:
//! - `index_types` - Handle type (`SlotId`)
//! - `entry` - Internal slot representation
//! - `arena` - Freelist arena (`Arena<T>`)

mod arena;
mod entry;
mod index_types;

pub use arena::Arena;
pub use index_types::SlotId;
