//! Share index for a peer-to-peer file-sharing client.
//!
//! This crate keeps an in-memory mirror of the shared directories and
//! answers peer searches against it:
//! - Arena-backed share tree with a content hash index and name bloom filter
//! - Root registry with virtual names and profile visibility
//! - Incremental refresh (scan off-lock, diff, splice)
//! - Substring and attribute search with relevance ranking
//! - Temporary shares and a compressed share cache

pub mod cancel;
pub mod config;
pub mod data;
pub mod error;
pub mod indices;
pub mod manager;
pub mod persistence;
pub mod profile;
pub mod refresh;
pub mod roots;
pub mod search;
pub mod storage;
pub mod temp_share;
pub mod tree;
pub mod types;

// Re-export main types
pub use cancel::CancellationToken;
pub use config::{EntryFilter, ShareSettings};
pub use data::{ShareIndexData, ShareStats};
pub use error::{Result, ShareError};
pub use manager::ShareManager;
pub use profile::{ProfileFilter, ProfileSet, ProfileToken, DEFAULT_PROFILE};
pub use refresh::{
    DownloadQueue, HashLookup, HashProvider, NoDownloads, RefreshHandle, RefreshReport,
    RefreshScope, RefreshState,
};
pub use roots::{RootInfo, RootOptions};
pub use search::{MatchMode, SearchQuery, SearchResult, SearchResults, SearchStats};
pub use temp_share::{TempShare, TempShareOutcome};
pub use tree::{DirId, DirectoryEntrySink, FileEntryRef, FileId};
pub use types::ContentHash;
