//! Interfaces the refresh engine consumes from the rest of the client.

use std::path::Path;

use crate::types::ContentHash;

/// Answer of the hashing subsystem for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashLookup {
    Known(ContentHash),
    /// Hashing was scheduled; the result arrives later through
    /// `ShareManager::hash_completed`.
    Pending,
}

/// Supplies content hashes for scanned files.
///
/// Called from scanner threads without any share lock held, so it may
/// block on its own storage.
pub trait HashProvider: Send + Sync {
    fn hash_lookup(&self, path: &Path, size: u64, last_write: u64) -> HashLookup;
}

/// Download queue view used to keep files being written out of the share.
pub trait DownloadQueue: Send + Sync {
    fn is_path_queued(&self, path: &Path) -> bool;
}

/// A queue with nothing in it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDownloads;

impl DownloadQueue for NoDownloads {
    fn is_path_queued(&self, _path: &Path) -> bool {
        false
    }
}
