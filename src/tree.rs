//! The share tree: the in-memory mirror of every shared directory.
//!
//! ## Module Structure
//!
//! - `content_type` - File categories and the per-directory type mask
//! - `node` - Directory and file nodes, root data, dual-case names
//! - `share_tree` - Arena-backed tree with its content index and name bloom
//! - `traverse` - Depth-first traversal into a `DirectoryEntrySink`

mod content_type;
mod node;
mod share_tree;
mod traverse;

pub use content_type::{categorize, extension_of, ContentTypes, FileCategory};
pub use node::{DirId, DirectoryNode, DualName, FileId, FileNode, ShareRoot};
pub use share_tree::ShareTree;
pub use traverse::{DirectoryEntrySink, FileEntryRef};
