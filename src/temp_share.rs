//! Temporary shares: single files lent to one peer, outside the share tree.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{Result, ShareError};
use crate::types::{unix_now_secs, ContentHash};

/// Result of adding a temporary share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempShareOutcome {
    Added,
    /// An entry with the same key and hash was replaced.
    Replaced,
    /// The content is already in the share tree; nothing was recorded.
    AlreadyShared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempShare {
    /// Peer the file is lent to. Empty means any requester.
    pub key: String,
    pub path: PathBuf,
    /// File name of `path`, as reported to peers.
    pub name: String,
    pub size: u64,
    pub hash: ContentHash,
    pub added_at: u64,
}

impl TempShare {
    pub fn visible_to(&self, requester: Option<&str>) -> bool {
        self.key.is_empty() || requester == Some(self.key.as_str())
    }

    /// Virtual path reported in search results.
    pub fn adc_path(&self) -> String {
        format!("/tmp/{}", self.name)
    }
}

/// Temporary shares keyed by content hash.
#[derive(Debug, Default)]
pub struct TempShares {
    by_hash: BTreeMap<ContentHash, Vec<TempShare>>,
}

impl TempShares {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with `InvalidInput` when `path` has no file name.
    pub fn add(
        &mut self,
        key: &str,
        path: PathBuf,
        size: u64,
        hash: ContentHash,
    ) -> Result<TempShareOutcome> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ShareError::InvalidInput(format!(
                    "temporary share without a file name: {}",
                    path.display()
                ))
            })?;
        let entry = TempShare {
            key: key.to_string(),
            path,
            name,
            size,
            hash,
            added_at: unix_now_secs(),
        };
        let shares = self.by_hash.entry(hash).or_default();
        match shares.iter_mut().find(|existing| existing.key == key) {
            Some(existing) => {
                *existing = entry;
                Ok(TempShareOutcome::Replaced)
            }
            None => {
                shares.push(entry);
                Ok(TempShareOutcome::Added)
            }
        }
    }

    pub fn remove(&mut self, key: &str, hash: &ContentHash) -> bool {
        let Some(shares) = self.by_hash.get_mut(hash) else {
            return false;
        };
        let before = shares.len();
        shares.retain(|share| share.key != key);
        let removed = shares.len() != before;
        if shares.is_empty() {
            self.by_hash.remove(hash);
        }
        removed
    }

    /// First entry for `hash` that `requester` may download.
    pub fn find(&self, hash: &ContentHash, requester: Option<&str>) -> Option<&TempShare> {
        self.by_hash
            .get(hash)?
            .iter()
            .find(|share| share.visible_to(requester))
    }

    pub fn list(&self) -> Vec<TempShare> {
        self.by_hash.values().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_hash.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> ContentHash {
        ContentHash::new([byte; 24])
    }

    #[test]
    fn keys_restrict_visibility() {
        let mut shares = TempShares::new();
        shares
            .add("peer-a", PathBuf::from("/tmp/x/file.bin"), 3, hash(1))
            .unwrap();
        assert!(shares.find(&hash(1), Some("peer-a")).is_some());
        assert!(shares.find(&hash(1), Some("peer-b")).is_none());
        assert!(shares.find(&hash(1), None).is_none());

        shares
            .add("", PathBuf::from("/tmp/x/open.bin"), 3, hash(2))
            .unwrap();
        assert!(shares.find(&hash(2), Some("anyone")).is_some());
        assert_eq!(shares.find(&hash(2), None).unwrap().adc_path(), "/tmp/open.bin");
    }

    #[test]
    fn same_key_and_hash_replaces() {
        let mut shares = TempShares::new();
        assert_eq!(
            shares.add("k", PathBuf::from("/a"), 1, hash(1)).unwrap(),
            TempShareOutcome::Added
        );
        assert_eq!(
            shares.add("k", PathBuf::from("/b"), 2, hash(1)).unwrap(),
            TempShareOutcome::Replaced
        );
        shares.add("other", PathBuf::from("/c"), 2, hash(1)).unwrap();
        assert_eq!(shares.len(), 2);

        assert!(shares.remove("k", &hash(1)));
        assert!(!shares.remove("k", &hash(1)));
        assert_eq!(shares.list().len(), 1);
        assert!(shares.remove("other", &hash(1)));
        assert!(shares.is_empty());
    }

    #[test]
    fn paths_without_a_file_name_are_rejected() {
        let mut shares = TempShares::new();
        for path in ["/", "/data/.."] {
            assert!(matches!(
                shares.add("k", PathBuf::from(path), 1, hash(1)),
                Err(ShareError::InvalidInput(_))
            ));
        }
        assert!(shares.is_empty());
    }
}
