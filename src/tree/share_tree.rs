//! The share tree: directory and file arenas plus the indices kept in sync
//! with them.
//!
//! All insertions and removals go through this type so the content index
//! and the name bloom filter never drift from the nodes they describe.

use std::path::PathBuf;

use super::content_type::{categorize, ContentTypes};
use super::node::{DirId, DirectoryNode, DualName, FileId, FileNode, ShareRoot};
use crate::error::{Result, ShareError};
use crate::indices::{ContentIndex, NameBloom};
use crate::storage::Arena;
use crate::types::ContentHash;

#[derive(Debug, Default)]
pub struct ShareTree {
    directories: Arena<DirectoryNode>,
    files: Arena<FileNode>,
    content: ContentIndex,
    bloom: NameBloom,
}

impl ShareTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn directory(&self, id: DirId) -> Option<&DirectoryNode> {
        self.directories.get(id)
    }

    pub fn file(&self, id: FileId) -> Option<&FileNode> {
        self.files.get(id)
    }

    pub fn content_index(&self) -> &ContentIndex {
        &self.content
    }

    pub fn bloom(&self) -> &NameBloom {
        &self.bloom
    }

    /// Number of live directory nodes, roots included.
    pub fn directory_nodes(&self) -> usize {
        self.directories.len()
    }

    pub fn file_nodes(&self) -> usize {
        self.files.len()
    }

    /// Creates a detached root directory named after the last component of
    /// its real path.
    pub fn create_root(&mut self, root: ShareRoot, last_write: u64) -> DirId {
        let name = root
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.path.to_string_lossy().into_owned());
        self.bloom.add(root.virtual_name_lower());
        let mut node = DirectoryNode::new(&name, None, last_write);
        self.bloom.add(node.lower_name());
        node.root = Some(Box::new(root));
        self.directories.insert(node)
    }

    pub(crate) fn root_mut(&mut self, dir: DirId) -> Option<&mut ShareRoot> {
        self.directories.get_mut(dir)?.root.as_deref_mut()
    }

    pub(crate) fn rename_root(&mut self, dir: DirId, virtual_name: &str) -> bool {
        let Some(root) = self.root_mut(dir) else {
            return false;
        };
        root.set_virtual_name(virtual_name);
        let lower = root.virtual_name_lower().to_string();
        self.bloom.add(&lower);
        true
    }

    pub fn find_directory(&self, parent: DirId, lower_name: &str) -> Option<DirId> {
        let node = self.directories.get(parent)?;
        node.directories
            .binary_search_by(|child| self.directories[*child].lower_name().cmp(lower_name))
            .ok()
            .map(|pos| node.directories[pos])
    }

    pub fn find_file(&self, dir: DirId, lower_name: &str) -> Option<FileId> {
        let node = self.directories.get(dir)?;
        node.files
            .binary_search_by(|file| self.files[*file].lower_name().cmp(lower_name))
            .ok()
            .map(|pos| node.files[pos])
    }

    /// Creates a child directory.
    ///
    /// Fails with `DuplicateName` if a sibling with the same lowercase name
    /// exists.
    pub fn insert_directory(
        &mut self,
        parent: DirId,
        name: &str,
        last_write: u64,
    ) -> Result<DirId> {
        let id = self.link_directory(parent, name, last_write)?;
        let Self {
            directories, bloom, ..
        } = self;
        bloom.add(directories[id].lower_name());
        Ok(id)
    }

    /// `insert_directory` without touching the bloom filter.
    pub(crate) fn link_directory(
        &mut self,
        parent: DirId,
        name: &str,
        last_write: u64,
    ) -> Result<DirId> {
        let node = DirectoryNode::new(name, Some(parent), last_write);
        let parent_node = self
            .directories
            .get(parent)
            .ok_or_else(|| ShareError::NotFound(format!("directory {parent:?}")))?;
        let pos = match parent_node.directories.binary_search_by(|child| {
            self.directories[*child].lower_name().cmp(node.lower_name())
        }) {
            Ok(_) => return Err(ShareError::DuplicateName(name.to_string())),
            Err(pos) => pos,
        };

        let id = self.directories.insert(node);
        self.directories[parent].directories.insert(pos, id);
        self.add_content_types(parent, ContentTypes::DIRECTORY);
        Ok(id)
    }

    /// Inserts a file, replacing any file with the same lowercase name.
    pub fn insert_file(
        &mut self,
        dir: DirId,
        name: &str,
        size: u64,
        hash: ContentHash,
        last_write: u64,
    ) -> Result<FileId> {
        let id = self.link_file(dir, name, size, hash, last_write)?;
        let Self { files, bloom, .. } = self;
        bloom.add(files[id].lower_name());
        Ok(id)
    }

    /// `insert_file` without touching the bloom filter.
    pub(crate) fn link_file(
        &mut self,
        dir: DirId,
        name: &str,
        size: u64,
        hash: ContentHash,
        last_write: u64,
    ) -> Result<FileId> {
        let name = DualName::new(name);
        let dir_node = self
            .directories
            .get(dir)
            .ok_or_else(|| ShareError::NotFound(format!("directory {dir:?}")))?;
        let search = dir_node
            .files
            .binary_search_by(|file| self.files[*file].lower_name().cmp(name.lower()));

        let pos = match search {
            Ok(pos) => {
                let old = dir_node.files[pos];
                if let Some(removed) = self.take_file(old) {
                    let dir_node = &mut self.directories[dir];
                    dir_node.size -= removed.size;
                    dir_node.files.remove(pos);
                }
                pos
            }
            Err(pos) => pos,
        };

        let category = categorize(name.lower());
        let id = self.files.insert(FileNode {
            name,
            size,
            hash,
            last_write,
            parent: dir,
        });
        self.content.insert(hash, id);

        let dir_node = &mut self.directories[dir];
        dir_node.files.insert(pos, id);
        dir_node.size += size;
        if let Some(category) = category {
            self.add_content_types(dir, category.flag());
        }
        Ok(id)
    }

    /// Updates a file in place, re-indexing it when the hash changes.
    pub fn update_file(
        &mut self,
        file: FileId,
        size: u64,
        hash: ContentHash,
        last_write: u64,
    ) -> Result<()> {
        let node = self
            .files
            .get_mut(file)
            .ok_or_else(|| ShareError::NotFound(format!("file {file:?}")))?;
        let old_hash = node.hash;
        let old_size = node.size;
        let parent = node.parent;
        node.hash = hash;
        node.size = size;
        node.last_write = last_write;

        if old_hash != hash {
            self.content.remove(&old_hash, file);
            self.content.insert(hash, file);
        }
        let dir_node = &mut self.directories[parent];
        dir_node.size = dir_node.size - old_size + size;
        Ok(())
    }

    /// Removes one file from its directory and the content index.
    pub fn remove_file(&mut self, file: FileId) -> bool {
        let Some(removed) = self.take_file(file) else {
            return false;
        };
        if let Some(dir_node) = self.directories.get_mut(removed.parent) {
            dir_node.size -= removed.size;
            if let Some(pos) = dir_node.files.iter().position(|id| *id == file) {
                dir_node.files.remove(pos);
            }
        }
        true
    }

    /// Destroys a directory and everything below it, unindexing every file,
    /// then detaches it from its parent.
    ///
    /// Works on roots and on nodes that never received root data. Returns
    /// the number of directories and files destroyed.
    pub fn remove_subtree(&mut self, dir: DirId) -> usize {
        let Some(node) = self.directories.get(dir) else {
            return 0;
        };
        let parent = node.parent;
        let removed = self.destroy_directory(dir);
        if let Some(parent_node) = parent.and_then(|parent| self.directories.get_mut(parent)) {
            if let Some(pos) = parent_node.directories.iter().position(|id| *id == dir) {
                parent_node.directories.remove(pos);
            }
        }
        removed
    }

    fn destroy_directory(&mut self, dir: DirId) -> usize {
        let Some(node) = self.directories.try_remove(dir) else {
            return 0;
        };
        let mut removed = 1;
        for file in node.files {
            if self.take_file(file).is_some() {
                removed += 1;
            }
        }
        for child in node.directories {
            removed += self.destroy_directory(child);
        }
        removed
    }

    /// Frees a file slot and drops its content index entry. Directory lists
    /// are left to the caller.
    fn take_file(&mut self, file: FileId) -> Option<FileNode> {
        let removed = self.files.try_remove(file)?;
        self.content.remove(&removed.hash, file);
        Some(removed)
    }

    pub(crate) fn set_last_write(&mut self, dir: DirId, last_write: u64) {
        if let Some(node) = self.directories.get_mut(dir) {
            node.last_write = last_write;
        }
    }

    /// ORs `flags` into a directory and its ancestors.
    fn add_content_types(&mut self, dir: DirId, flags: ContentTypes) {
        let mut current = Some(dir);
        while let Some(id) = current {
            let Some(node) = self.directories.get_mut(id) else {
                break;
            };
            // Ancestors are supersets, so they already carry the flags too.
            if node.content_types.contains(flags) {
                break;
            }
            node.content_types |= flags;
            current = node.parent;
        }
    }

    // -----------------------------------------------------------------------
    // Aggregates
    // -----------------------------------------------------------------------

    /// Total size of every file below `dir`.
    pub fn total_size(&self, dir: DirId) -> u64 {
        let Some(node) = self.directories.get(dir) else {
            return 0;
        };
        node.size
            + node
                .directories
                .iter()
                .map(|child| self.total_size(*child))
                .sum::<u64>()
    }

    /// Number of files below `dir`.
    pub fn file_count(&self, dir: DirId) -> usize {
        let Some(node) = self.directories.get(dir) else {
            return 0;
        };
        node.files.len()
            + node
                .directories
                .iter()
                .map(|child| self.file_count(*child))
                .sum::<usize>()
    }

    /// Number of directories below `dir`, not counting `dir` itself.
    pub fn dir_count(&self, dir: DirId) -> usize {
        let Some(node) = self.directories.get(dir) else {
            return 0;
        };
        node.directories.len()
            + node
                .directories
                .iter()
                .map(|child| self.dir_count(*child))
                .sum::<usize>()
    }

    // -----------------------------------------------------------------------
    // Paths
    // -----------------------------------------------------------------------

    /// Walks parent links up to the topmost directory.
    pub fn root_of(&self, dir: DirId) -> Option<DirId> {
        let mut current = dir;
        loop {
            match self.directories.get(current)?.parent {
                Some(parent) => current = parent,
                None => return Some(current),
            }
        }
    }

    /// Virtual path of a directory, `/` separated with a trailing `/`,
    /// starting at the root's virtual name.
    pub fn adc_path(&self, dir: DirId) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = Some(dir);
        while let Some(id) = current {
            let node = self.directories.get(id)?;
            segments.push(node.virtual_name());
            current = node.parent;
        }

        let mut path = String::from("/");
        for segment in segments.iter().rev() {
            path.push_str(segment);
            path.push('/');
        }
        Some(path)
    }

    pub fn file_adc_path(&self, file: FileId) -> Option<String> {
        let node = self.files.get(file)?;
        let mut path = self.adc_path(node.parent)?;
        path.push_str(node.name());
        Some(path)
    }

    /// Real filesystem path of a directory with `suffix` appended.
    ///
    /// Returns `None` when the topmost ancestor carries no root data.
    pub fn real_path(&self, dir: DirId, suffix: &str) -> Option<PathBuf> {
        let mut segments = Vec::new();
        let mut current = dir;
        let root = loop {
            let node = self.directories.get(current)?;
            match node.parent {
                Some(parent) => {
                    segments.push(node.name());
                    current = parent;
                }
                None => break node.root()?,
            }
        };

        let mut path = root.path.clone();
        for segment in segments.iter().rev() {
            path.push(segment);
        }
        if !suffix.is_empty() {
            path.push(suffix);
        }
        Some(path)
    }

    pub fn file_real_path(&self, file: FileId) -> Option<PathBuf> {
        let node = self.files.get(file)?;
        self.real_path(node.parent, node.name())
    }

    // -----------------------------------------------------------------------
    // Bloom maintenance
    // -----------------------------------------------------------------------

    pub(crate) fn merge_bloom(&mut self, fragment: &NameBloom) {
        self.bloom.merge(fragment);
    }

    /// Rebuilds the name bloom filter from every live node.
    pub(crate) fn rebuild_bloom(&mut self) {
        self.bloom.clear();
        for (_, node) in self.directories.iter() {
            self.bloom.add(node.lower_name());
            if let Some(root) = node.root() {
                self.bloom.add(root.virtual_name_lower());
            }
        }
        for (_, node) in self.files.iter() {
            self.bloom.add(node.lower_name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileSet;

    fn hash(byte: u8) -> ContentHash {
        ContentHash::new([byte; 24])
    }

    fn tree_with_root() -> (ShareTree, DirId) {
        let mut tree = ShareTree::new();
        let root = tree.create_root(
            ShareRoot::new(
                PathBuf::from("/data/music"),
                "Music",
                ProfileSet::single(0),
                false,
            ),
            10,
        );
        (tree, root)
    }

    /// Checks that every directory's mask covers its children's masks.
    fn assert_masks_are_supersets(tree: &ShareTree, dir: DirId) {
        let node = tree.directory(dir).unwrap();
        for child in node.directories() {
            let child_node = tree.directory(*child).unwrap();
            assert!(node.content_types().contains(child_node.content_types()));
            assert!(node.content_types().contains(ContentTypes::DIRECTORY));
            assert_masks_are_supersets(tree, *child);
        }
    }

    #[test]
    fn insert_directory_rejects_case_insensitive_duplicates() {
        let (mut tree, root) = tree_with_root();
        tree.insert_directory(root, "Albums", 1).unwrap();
        let error = tree.insert_directory(root, "albums", 1).unwrap_err();
        assert!(matches!(error, ShareError::DuplicateName(name) if name == "albums"));
        assert_eq!(tree.dir_count(root), 1);
    }

    #[test]
    fn children_are_sorted_by_lowercase_name() {
        let (mut tree, root) = tree_with_root();
        let b = tree.insert_directory(root, "beta", 1).unwrap();
        let a = tree.insert_directory(root, "Alpha", 1).unwrap();
        let c = tree.insert_directory(root, "gamma", 1).unwrap();
        assert_eq!(tree.directory(root).unwrap().directories(), &[a, b, c]);
        assert_eq!(tree.find_directory(root, "alpha"), Some(a));
        assert_eq!(tree.find_directory(root, "Alpha"), None);
    }

    #[test]
    fn content_type_mask_propagates_upward() {
        let (mut tree, root) = tree_with_root();
        let artist = tree.insert_directory(root, "Artist", 1).unwrap();
        let album = tree.insert_directory(artist, "Album", 1).unwrap();
        tree.insert_file(album, "01 Track.mp3", 100, hash(1), 1).unwrap();
        tree.insert_file(album, "cover.jpg", 10, hash(2), 1).unwrap();

        let root_types = tree.directory(root).unwrap().content_types();
        assert!(root_types.contains(ContentTypes::AUDIO | ContentTypes::PICTURE));
        assert!(root_types.contains(ContentTypes::DIRECTORY));
        let album_types = tree.directory(album).unwrap().content_types();
        assert!(!album_types.contains(ContentTypes::DIRECTORY));
        assert_masks_are_supersets(&tree, root);
    }

    #[test]
    fn insert_file_replaces_same_name_and_reindexes() {
        let (mut tree, root) = tree_with_root();
        let first = tree.insert_file(root, "Song.mp3", 100, hash(1), 1).unwrap();
        let second = tree.insert_file(root, "song.MP3", 150, hash(2), 2).unwrap();

        assert!(tree.file(first).is_none());
        assert_eq!(tree.directory(root).unwrap().files(), &[second]);
        assert_eq!(tree.directory(root).unwrap().own_size(), 150);
        assert!(tree.content_index().lookup(&hash(1)).is_empty());
        assert_eq!(tree.content_index().lookup(&hash(2)), &[second]);
    }

    #[test]
    fn every_file_has_one_content_entry() {
        let (mut tree, root) = tree_with_root();
        let sub = tree.insert_directory(root, "sub", 1).unwrap();
        let a = tree.insert_file(root, "a.txt", 1, hash(7), 1).unwrap();
        let b = tree.insert_file(sub, "b.txt", 1, hash(7), 1).unwrap();

        assert_eq!(tree.content_index().lookup(&hash(7)), &[a, b]);
        assert!(tree.remove_file(a));
        assert_eq!(tree.content_index().lookup(&hash(7)), &[b]);
        assert_eq!(tree.content_index().len(), 1);
        assert_eq!(tree.file_count(root), 1);
    }

    #[test]
    fn update_file_rehashes_in_place() {
        let (mut tree, root) = tree_with_root();
        let file = tree.insert_file(root, "a.bin", 10, hash(1), 1).unwrap();
        tree.update_file(file, 20, hash(2), 5).unwrap();

        assert_eq!(tree.content_index().lookup(&hash(2)), &[file]);
        assert!(!tree.content_index().contains_hash(&hash(1)));
        assert_eq!(tree.total_size(root), 20);
        assert_eq!(tree.file(file).unwrap().last_write(), 5);
    }

    #[test]
    fn remove_subtree_unindexes_everything() {
        let (mut tree, root) = tree_with_root();
        let sub = tree.insert_directory(root, "sub", 1).unwrap();
        let deep = tree.insert_directory(sub, "deep", 1).unwrap();
        tree.insert_file(sub, "a.txt", 5, hash(1), 1).unwrap();
        tree.insert_file(deep, "b.txt", 6, hash(2), 1).unwrap();
        tree.insert_file(root, "keep.txt", 7, hash(3), 1).unwrap();

        assert_eq!(tree.remove_subtree(sub), 4);
        assert!(tree.directory(deep).is_none());
        assert!(tree.directory(root).unwrap().directories().is_empty());
        assert_eq!(tree.content_index().len(), 1);
        assert_eq!(tree.total_size(root), 7);
        assert_eq!(tree.remove_subtree(sub), 0);
    }

    #[test]
    fn remove_subtree_handles_nodes_without_root_data() {
        let mut tree = ShareTree::new();
        let orphan = tree.directories.insert(DirectoryNode::new("orphan", None, 0));
        tree.insert_file(orphan, "x.txt", 1, hash(4), 0).unwrap();
        assert_eq!(tree.real_path(orphan, ""), None);
        assert_eq!(tree.remove_subtree(orphan), 2);
        assert!(tree.content_index().is_empty());
    }

    #[test]
    fn aggregates_are_recursive() {
        let (mut tree, root) = tree_with_root();
        let sub = tree.insert_directory(root, "sub", 1).unwrap();
        let deep = tree.insert_directory(sub, "deep", 1).unwrap();
        tree.insert_file(root, "a", 1, hash(1), 1).unwrap();
        tree.insert_file(sub, "b", 2, hash(2), 1).unwrap();
        tree.insert_file(deep, "c", 4, hash(3), 1).unwrap();

        assert_eq!(tree.total_size(root), 7);
        assert_eq!(tree.total_size(sub), 6);
        assert_eq!(tree.file_count(root), 3);
        assert_eq!(tree.dir_count(root), 2);
    }

    #[test]
    fn virtual_and_real_paths() {
        let (mut tree, root) = tree_with_root();
        let sub = tree.insert_directory(root, "Rock", 1).unwrap();
        let file = tree.insert_file(sub, "Song.mp3", 1, hash(1), 1).unwrap();

        assert_eq!(tree.adc_path(root).unwrap(), "/Music/");
        assert_eq!(tree.adc_path(sub).unwrap(), "/Music/Rock/");
        assert_eq!(tree.file_adc_path(file).unwrap(), "/Music/Rock/Song.mp3");
        assert_eq!(
            tree.file_real_path(file).unwrap(),
            PathBuf::from("/data/music/Rock/Song.mp3")
        );
        assert_eq!(tree.root_of(sub), Some(root));
    }

    #[test]
    fn rename_root_changes_virtual_path_only() {
        let (mut tree, root) = tree_with_root();
        let sub = tree.insert_directory(root, "Rock", 1).unwrap();
        assert!(tree.rename_root(root, "Tunes"));
        assert_eq!(tree.adc_path(sub).unwrap(), "/Tunes/Rock/");
        assert_eq!(tree.real_path(sub, "").unwrap(), PathBuf::from("/data/music/Rock"));
        assert!(tree.bloom().matches("tunes"));
        assert!(!tree.rename_root(sub, "x"));
    }

    #[test]
    fn bloom_tracks_inserted_names_and_rebuilds() {
        let (mut tree, root) = tree_with_root();
        let file = tree.insert_file(root, "Symphony.flac", 1, hash(1), 1).unwrap();
        assert!(tree.bloom().matches("symphony"));

        tree.remove_file(file);
        tree.rebuild_bloom();
        assert!(!tree.bloom().matches("symphony"));
        assert!(tree.bloom().matches("music"));
    }
}
