//! Content-hash multimap from hash to the files carrying it.

use std::collections::BTreeMap;

use thin_vec::ThinVec;

use crate::tree::FileId;
use crate::types::ContentHash;

/// Maps each content hash to every file in the tree with that hash.
///
/// Entries are unique per (hash, file); since a file has exactly one real
/// path this is the same as uniqueness per (hash, real path). Inserting a
/// pair twice or removing a pair that is not present means the index has
/// drifted from the tree, and panics.
#[derive(Debug, Default)]
pub struct ContentIndex {
    entries: BTreeMap<ContentHash, ThinVec<FileId>>,
    len: usize,
}

impl ContentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, hash: ContentHash, file: FileId) {
        let files = self.entries.entry(hash).or_default();
        assert!(
            !files.contains(&file),
            "content index already holds {file:?} under {hash}"
        );
        files.push(file);
        self.len += 1;
    }

    pub fn remove(&mut self, hash: &ContentHash, file: FileId) {
        let removed = match self.entries.get_mut(hash) {
            Some(files) => match files.iter().position(|existing| *existing == file) {
                Some(pos) => {
                    files.remove(pos);
                    if files.is_empty() {
                        self.entries.remove(hash);
                    }
                    true
                }
                None => false,
            },
            None => false,
        };
        assert!(removed, "content index is missing {file:?} under {hash}");
        self.len -= 1;
    }

    /// Returns every file carrying `hash`, oldest entry first.
    pub fn lookup(&self, hash: &ContentHash) -> &[FileId] {
        self.entries
            .get(hash)
            .map(|files| files.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains_hash(&self, hash: &ContentHash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn contains(&self, hash: &ContentHash, file: FileId) -> bool {
        self.lookup(hash).contains(&file)
    }

    pub fn hashes(&self) -> impl Iterator<Item = &ContentHash> {
        self.entries.keys()
    }

    /// Total number of (hash, file) entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn unique_hashes(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.len = 0;
    }
}
