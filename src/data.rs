//! The share consistency domain: tree, indices and root registry.
//!
//! Everything here sits behind the manager's single `RwLock`. Methods taking
//! `&self` run under the shared lock, `&mut self` under the exclusive one.

use std::path::{Path, PathBuf};

use fnv::FnvHashSet;

use crate::config::EntryFilter;
use crate::error::{Result, ShareError};
use crate::profile::{ProfileFilter, ProfileSet, ProfileToken};
use crate::roots::{validate_virtual_name, RootInfo, RootRegistry};
use crate::tree::{DirId, FileId, ShareRoot, ShareTree};
use crate::types::{unix_now_secs, ContentHash};

/// Totals over the whole share.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShareStats {
    pub roots: usize,
    pub directories: usize,
    pub files: usize,
    pub total_size: u64,
    pub unique_contents: usize,
    /// Mean age of shared files in seconds, measured from their last write.
    pub average_file_age: u64,
    /// Fraction of file names that are already lowercase.
    pub lowercase_only_ratio: f64,
}

#[derive(Debug, Default)]
pub struct ShareIndexData {
    pub(crate) tree: ShareTree,
    pub(crate) roots: RootRegistry,
    dirty_profiles: FnvHashSet<ProfileToken>,
}

impl ShareIndexData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(&self) -> &ShareTree {
        &self.tree
    }

    pub fn roots(&self) -> &RootRegistry {
        &self.roots
    }

    // -----------------------------------------------------------------------
    // Root management
    // -----------------------------------------------------------------------

    /// Registers a new, empty root. `path` must already be canonical.
    pub fn add_root(
        &mut self,
        path: PathBuf,
        virtual_name: &str,
        profiles: ProfileSet,
        incoming: bool,
        last_write: u64,
    ) -> Result<DirId> {
        self.roots.check_conflict(&path)?;
        let virtual_name = validate_virtual_name(virtual_name, &path);
        self.mark_dirty(&profiles);

        let root = ShareRoot::new(path.clone(), &virtual_name, profiles, incoming);
        let dir = self.tree.create_root(root, last_write);
        let lower = self.root(dir)?.virtual_name_lower().to_string();
        self.roots.insert(path, &lower, dir);
        Ok(dir)
    }

    /// Destroys a root and everything below it. Returns the number of removed
    /// nodes.
    pub fn remove_root(&mut self, path: &Path) -> Result<usize> {
        let dir = self.root_dir(path)?;
        let root = self.root(dir)?;
        let lower = root.virtual_name_lower().to_string();
        let profiles = root.profiles.clone();

        let removed = self.tree.remove_subtree(dir);
        self.roots.remove(path, &lower);
        self.mark_dirty(&profiles);
        Ok(removed)
    }

    pub fn rename_root(&mut self, path: &Path, virtual_name: &str) -> Result<()> {
        let dir = self.root_dir(path)?;
        let virtual_name = validate_virtual_name(virtual_name, path);
        let root = self.root(dir)?;
        let old_lower = root.virtual_name_lower().to_string();
        let profiles = root.profiles.clone();

        self.tree.rename_root(dir, &virtual_name);
        let new_lower = self.root(dir)?.virtual_name_lower().to_string();
        self.roots.rename(dir, &old_lower, &new_lower);
        self.mark_dirty(&profiles);
        Ok(())
    }

    /// Adds a profile to a root. Returns false if it was already a member.
    pub fn add_root_profile(&mut self, path: &Path, profile: ProfileToken) -> Result<bool> {
        let dir = self.root_dir(path)?;
        let root = self.root_mut(dir)?;
        let added = root.profiles.insert(profile);
        if added {
            self.dirty_profiles.insert(profile);
        }
        Ok(added)
    }

    pub fn remove_root_profile(&mut self, path: &Path, profile: ProfileToken) -> Result<bool> {
        let dir = self.root_dir(path)?;
        let root = self.root_mut(dir)?;
        let removed = root.profiles.remove(profile);
        if removed {
            self.dirty_profiles.insert(profile);
        }
        Ok(removed)
    }

    pub(crate) fn root_dir(&self, path: &Path) -> Result<DirId> {
        self.roots
            .get(path)
            .ok_or_else(|| ShareError::NotFound(format!("shared root {}", path.display())))
    }

    pub(crate) fn root(&self, dir: DirId) -> Result<&ShareRoot> {
        self.tree
            .directory(dir)
            .and_then(|node| node.root())
            .ok_or_else(|| ShareError::NotFound(format!("root directory {dir:?}")))
    }

    fn root_mut(&mut self, dir: DirId) -> Result<&mut ShareRoot> {
        self.tree
            .root_mut(dir)
            .ok_or_else(|| ShareError::NotFound(format!("root directory {dir:?}")))
    }

    pub(crate) fn set_last_refresh_time(&mut self, dir: DirId, time: u64) {
        if let Some(root) = self.tree.root_mut(dir) {
            root.last_refresh_time = time;
        }
    }

    pub fn root_info(&self, dir: DirId) -> Option<RootInfo> {
        let root = self.tree.directory(dir)?.root()?;
        Some(RootInfo {
            path: root.path.clone(),
            virtual_name: root.virtual_name().to_string(),
            profiles: root.profiles.clone(),
            incoming: root.incoming,
            last_refresh_time: root.last_refresh_time,
            total_size: self.tree.total_size(dir),
        })
    }

    /// Every root ordered by real path.
    pub fn list_roots(&self) -> Vec<RootInfo> {
        self.roots
            .iter()
            .filter_map(|(_, dir)| self.root_info(dir))
            .collect()
    }

    /// Roots visible through `filter`, ordered by real path.
    pub fn visible_roots<'a>(
        &'a self,
        filter: &'a ProfileFilter,
    ) -> impl Iterator<Item = DirId> + 'a {
        self.roots
            .iter()
            .map(|(_, dir)| dir)
            .filter(move |dir| self.root_visible(*dir, filter))
    }

    pub(crate) fn root_visible(&self, dir: DirId, filter: &ProfileFilter) -> bool {
        self.root(dir)
            .map(|root| filter.allows(&root.profiles))
            .unwrap_or(false)
    }

    /// Roots registered under `virtual_name` (case-insensitive) that `filter`
    /// may see.
    pub fn resolve_virtual(&self, virtual_name: &str, filter: &ProfileFilter) -> Vec<DirId> {
        self.roots
            .by_virtual(&virtual_name.to_lowercase())
            .iter()
            .copied()
            .filter(|dir| self.root_visible(*dir, filter))
            .collect()
    }

    pub fn has_virtual(&self, virtual_name: &str, filter: &ProfileFilter) -> bool {
        !self.resolve_virtual(virtual_name, filter).is_empty()
    }

    // -----------------------------------------------------------------------
    // Virtual path resolution
    // -----------------------------------------------------------------------

    /// Resolves a virtual directory path such as `/Music/Rock/` to every
    /// matching directory across same-named roots.
    pub fn find_directories(&self, adc_path: &str, filter: &ProfileFilter) -> Result<Vec<DirId>> {
        let not_found = || ShareError::NotFound(format!("virtual path {adc_path}"));
        if !adc_path.starts_with('/') {
            return Err(ShareError::InvalidInput(format!(
                "virtual path must start with '/': {adc_path}"
            )));
        }

        let mut segments = adc_path.split('/').filter(|segment| !segment.is_empty());
        let first = segments.next().ok_or_else(not_found)?;
        let mut dirs = self.resolve_virtual(first, filter);

        for segment in segments {
            let lower = segment.to_lowercase();
            dirs = dirs
                .into_iter()
                .filter_map(|dir| self.tree.find_directory(dir, &lower))
                .collect();
            if dirs.is_empty() {
                break;
            }
        }

        if dirs.is_empty() {
            return Err(not_found());
        }
        Ok(dirs)
    }

    /// Maps a virtual path to real paths. A trailing `/` names a directory,
    /// anything else a file.
    pub fn resolve_adc_path(&self, adc_path: &str, filter: &ProfileFilter) -> Result<Vec<PathBuf>> {
        if adc_path.ends_with('/') {
            let dirs = self.find_directories(adc_path, filter)?;
            return Ok(dirs
                .into_iter()
                .filter_map(|dir| self.tree.real_path(dir, ""))
                .collect());
        }

        let files = self.find_files(adc_path, filter)?;
        Ok(files
            .into_iter()
            .filter_map(|file| self.tree.file_real_path(file))
            .collect())
    }

    fn find_files(&self, adc_path: &str, filter: &ProfileFilter) -> Result<Vec<FileId>> {
        let not_found = || ShareError::NotFound(format!("virtual path {adc_path}"));
        let (dir_path, name) = adc_path.rsplit_once('/').ok_or_else(not_found)?;
        if name.is_empty() || dir_path.is_empty() {
            return Err(not_found());
        }

        let lower = name.to_lowercase();
        let files: Vec<FileId> = self
            .find_directories(&format!("{dir_path}/"), filter)?
            .into_iter()
            .filter_map(|dir| self.tree.find_file(dir, &lower))
            .collect();
        if files.is_empty() {
            return Err(not_found());
        }
        Ok(files)
    }

    /// Files holding `hash` whose root `filter` may see.
    pub fn visible_files_with_hash(
        &self,
        hash: &ContentHash,
        filter: &ProfileFilter,
    ) -> impl Iterator<Item = FileId> + '_ {
        let filter = filter.clone();
        self.tree
            .content_index()
            .lookup(hash)
            .iter()
            .copied()
            .filter(move |file| {
                self.tree
                    .file(*file)
                    .and_then(|node| self.tree.root_of(node.parent()))
                    .map(|root| self.root_visible(root, &filter))
                    .unwrap_or(false)
            })
    }

    // -----------------------------------------------------------------------
    // Aggregates
    // -----------------------------------------------------------------------

    pub fn total_size(&self, filter: &ProfileFilter) -> u64 {
        self.visible_roots(filter)
            .map(|dir| self.tree.total_size(dir))
            .sum()
    }

    pub fn file_count(&self, filter: &ProfileFilter) -> usize {
        self.visible_roots(filter)
            .map(|dir| self.tree.file_count(dir))
            .sum()
    }

    pub fn stats(&self) -> ShareStats {
        let now = unix_now_secs();
        let mut stats = ShareStats {
            roots: self.roots.len(),
            unique_contents: self.tree.content_index().unique_hashes(),
            ..ShareStats::default()
        };

        let mut age_total: u128 = 0;
        let mut lowercase_only = 0usize;
        for (_, dir) in self.roots.iter() {
            stats.directories += 1 + self.tree.dir_count(dir);
            self.visit_files(dir, &mut |tree: &ShareTree, file: FileId| {
                let Some(node) = tree.file(file) else {
                    return;
                };
                stats.files += 1;
                stats.total_size += node.size();
                age_total += u128::from(now.saturating_sub(node.last_write()));
                if node.lowercase_only() {
                    lowercase_only += 1;
                }
            });
        }

        if stats.files > 0 {
            stats.average_file_age = (age_total / stats.files as u128) as u64;
            stats.lowercase_only_ratio = lowercase_only as f64 / stats.files as f64;
        }
        stats
    }

    fn visit_files(&self, dir: DirId, visit: &mut dyn FnMut(&ShareTree, FileId)) {
        let Some(node) = self.tree.directory(dir) else {
            return;
        };
        for file in node.files() {
            visit(&self.tree, *file);
        }
        for child in node.directories() {
            self.visit_files(*child, visit);
        }
    }

    // -----------------------------------------------------------------------
    // Hash callbacks
    // -----------------------------------------------------------------------

    /// Stores a freshly hashed file, creating missing directories between its
    /// root and the file. Returns `Ok(false)` when the path is not shareable.
    pub fn apply_hashed_file(
        &mut self,
        path: &Path,
        size: u64,
        hash: ContentHash,
        last_write: u64,
        filter: &EntryFilter,
    ) -> Result<bool> {
        let (root_path, root_dir) = self
            .roots
            .root_for_path(path)
            .map(|(root_path, dir)| (root_path.to_path_buf(), dir))
            .ok_or_else(|| ShareError::NotFound(format!("no shared root for {}", path.display())))?;
        let relative = path.strip_prefix(&root_path).map_err(|_| {
            ShareError::NotFound(format!("no shared root for {}", path.display()))
        })?;

        let names: Vec<String> = relative
            .iter()
            .map(|part| part.to_string_lossy().into_owned())
            .collect();
        let Some((file_name, dir_names)) = names.split_last() else {
            return Ok(false);
        };
        if !filter.accepts_file(file_name, path, size) {
            return Ok(false);
        }

        let mut dir = root_dir;
        let mut current_path = root_path;
        for name in dir_names {
            current_path.push(name);
            dir = match self.tree.find_directory(dir, &name.to_lowercase()) {
                Some(existing) => existing,
                None => {
                    if !filter.accepts_directory(name, &current_path) {
                        return Ok(false);
                    }
                    self.tree.insert_directory(dir, name, last_write)?
                }
            };
        }

        match self.tree.find_file(dir, &file_name.to_lowercase()) {
            Some(file) if self.tree.file(file).map(|node| node.name()) == Some(file_name.as_str()) => {
                self.tree.update_file(file, size, hash, last_write)?;
            }
            _ => {
                self.tree.insert_file(dir, file_name, size, hash, last_write)?;
            }
        }

        let profiles = self.root(root_dir)?.profiles.clone();
        self.mark_dirty(&profiles);
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Dirty profiles
    // -----------------------------------------------------------------------

    pub(crate) fn mark_dirty(&mut self, profiles: &ProfileSet) {
        self.dirty_profiles.extend(profiles.iter());
    }

    pub fn is_profile_dirty(&self, profile: ProfileToken) -> bool {
        self.dirty_profiles.contains(&profile)
    }

    /// Returns and clears the profiles whose file lists must be regenerated.
    pub fn take_dirty_profiles(&mut self) -> ProfileSet {
        self.dirty_profiles.drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShareSettings;

    fn hash(byte: u8) -> ContentHash {
        ContentHash::new([byte; 24])
    }

    fn data_with_root(path: &str, name: &str, profile: ProfileToken) -> (ShareIndexData, DirId) {
        let mut data = ShareIndexData::new();
        let dir = data
            .add_root(PathBuf::from(path), name, ProfileSet::single(profile), false, 0)
            .unwrap();
        (data, dir)
    }

    #[test]
    fn nested_roots_conflict_but_siblings_are_independent() {
        let (mut data, _) = data_with_root("/a", "A", 0);
        let error = data
            .add_root(PathBuf::from("/a/b"), "B", ProfileSet::single(0), false, 0)
            .unwrap_err();
        assert!(matches!(error, ShareError::PathConflict { existing, .. } if existing == Path::new("/a")));

        let mut data = ShareIndexData::new();
        data.add_root(PathBuf::from("/a/b"), "B", ProfileSet::single(0), false, 0)
            .unwrap();
        data.add_root(PathBuf::from("/c"), "C", ProfileSet::single(0), false, 0)
            .unwrap();
        data.remove_root(Path::new("/a/b")).unwrap();
        assert_eq!(data.list_roots().len(), 1);
        assert!(data.has_virtual("c", &ProfileFilter::Unrestricted));
    }

    #[test]
    fn remove_root_keeps_same_named_siblings() {
        let (mut data, _) = data_with_root("/x", "Media", 0);
        let y = data
            .add_root(PathBuf::from("/y"), "media", ProfileSet::single(0), false, 0)
            .unwrap();
        let filter = ProfileFilter::Unrestricted;
        assert_eq!(data.resolve_virtual("MEDIA", &filter).len(), 2);

        data.remove_root(Path::new("/x")).unwrap();
        assert_eq!(data.resolve_virtual("media", &filter), vec![y]);
        assert!(matches!(
            data.remove_root(Path::new("/x")),
            Err(ShareError::NotFound(_))
        ));
    }

    #[test]
    fn rename_root_updates_virtual_lookups() {
        let (mut data, dir) = data_with_root("/x", "Old", 0);
        data.take_dirty_profiles();
        data.rename_root(Path::new("/x"), "New").unwrap();

        let filter = ProfileFilter::Unrestricted;
        assert!(!data.has_virtual("old", &filter));
        assert_eq!(data.resolve_virtual("new", &filter), vec![dir]);
        assert!(data.is_profile_dirty(0));
    }

    #[test]
    fn resolve_virtual_respects_profiles() {
        let (data, _) = data_with_root("/x", "Media", 3);
        assert!(data.has_virtual("media", &ProfileFilter::profile(3)));
        assert!(!data.has_virtual("media", &ProfileFilter::profile(4)));
        assert!(data.has_virtual("media", &ProfileFilter::Unrestricted));
    }

    #[test]
    fn adc_paths_resolve_to_real_paths() {
        let (mut data, root) = data_with_root("/data/music", "Music", 0);
        let rock = data.tree.insert_directory(root, "Rock", 0).unwrap();
        data.tree.insert_file(rock, "Song.mp3", 5, hash(1), 0).unwrap();
        let filter = ProfileFilter::Unrestricted;

        assert_eq!(
            data.resolve_adc_path("/music/rock/", &filter).unwrap(),
            vec![PathBuf::from("/data/music/Rock")]
        );
        assert_eq!(
            data.resolve_adc_path("/Music/Rock/song.mp3", &filter).unwrap(),
            vec![PathBuf::from("/data/music/Rock/Song.mp3")]
        );
        assert!(matches!(
            data.resolve_adc_path("/Music/Jazz/", &filter),
            Err(ShareError::NotFound(_))
        ));
        assert!(matches!(
            data.resolve_adc_path("/Music/Rock/", &ProfileFilter::profile(9)),
            Err(ShareError::NotFound(_))
        ));
    }

    #[test]
    fn same_named_roots_merge_under_one_virtual_directory() {
        let (mut data, x) = data_with_root("/x", "Media", 0);
        let y = data
            .add_root(PathBuf::from("/y"), "Media", ProfileSet::single(0), false, 0)
            .unwrap();
        data.tree.insert_directory(x, "Shows", 0).unwrap();
        data.tree.insert_directory(y, "shows", 0).unwrap();

        let dirs = data
            .find_directories("/Media/Shows/", &ProfileFilter::Unrestricted)
            .unwrap();
        assert_eq!(dirs.len(), 2);
    }

    #[test]
    fn sizes_follow_profile_visibility() {
        let (mut data, a) = data_with_root("/a", "A", 1);
        let b = data
            .add_root(PathBuf::from("/b"), "B", ProfileSet::single(2), false, 0)
            .unwrap();
        data.tree.insert_file(a, "one", 10, hash(1), 0).unwrap();
        data.tree.insert_file(b, "two", 20, hash(2), 0).unwrap();

        assert_eq!(data.total_size(&ProfileFilter::profile(1)), 10);
        assert_eq!(data.total_size(&ProfileFilter::Unrestricted), 30);
        assert_eq!(data.file_count(&ProfileFilter::profile(2)), 1);

        let stats = data.stats();
        assert_eq!(stats.roots, 2);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.directories, 2);
        assert_eq!(stats.unique_contents, 2);
        assert_eq!(stats.lowercase_only_ratio, 1.0);
    }

    #[test]
    fn hashed_files_create_missing_directories() {
        let (mut data, root) = data_with_root("/share", "Share", 0);
        let filter = EntryFilter::compile(&ShareSettings::default()).unwrap();

        let stored = data
            .apply_hashed_file(Path::new("/share/a/b/file.bin"), 4, hash(1), 7, &filter)
            .unwrap();
        assert!(stored);
        let a = data.tree.find_directory(root, "a").unwrap();
        let b = data.tree.find_directory(a, "b").unwrap();
        let file = data.tree.find_file(b, "file.bin").unwrap();

        data.apply_hashed_file(Path::new("/share/a/b/file.bin"), 6, hash(2), 8, &filter)
            .unwrap();
        assert_eq!(data.tree.content_index().lookup(&hash(2)), &[file]);
        assert!(!data.tree.content_index().contains_hash(&hash(1)));
        assert_eq!(data.total_size(&ProfileFilter::Unrestricted), 6);

        assert!(!data
            .apply_hashed_file(Path::new("/share/.hidden/x"), 1, hash(3), 0, &filter)
            .unwrap());
        assert!(matches!(
            data.apply_hashed_file(Path::new("/elsewhere/x"), 1, hash(3), 0, &filter),
            Err(ShareError::NotFound(_))
        ));
    }

    #[test]
    fn profile_membership_changes_mark_dirty() {
        let (mut data, _) = data_with_root("/x", "X", 0);
        data.take_dirty_profiles();
        assert!(data.add_root_profile(Path::new("/x"), 5).unwrap());
        assert!(!data.add_root_profile(Path::new("/x"), 5).unwrap());
        assert!(data.has_virtual("x", &ProfileFilter::profile(5)));
        assert_eq!(data.take_dirty_profiles(), ProfileSet::single(5));

        assert!(data.remove_root_profile(Path::new("/x"), 5).unwrap());
        assert!(!data.has_virtual("x", &ProfileFilter::profile(5)));
    }
}
