//! Registry of shared roots by real path and by virtual name.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use fnv::FnvHashMap;

use crate::error::{Result, ShareError};
use crate::profile::ProfileSet;
use crate::tree::DirId;

/// Maps real root paths and lowercase virtual names to root directories.
///
/// Real paths are unique and never nest. Several roots may share one
/// virtual name; peers then see their union under that name.
#[derive(Debug, Default)]
pub struct RootRegistry {
    by_path: BTreeMap<PathBuf, DirId>,
    by_virtual: FnvHashMap<String, Vec<DirId>>,
}

impl RootRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with `PathConflict` if `path` is a root, or lies above or
    /// below one.
    pub fn check_conflict(&self, path: &Path) -> Result<()> {
        if let Some(existing) = self
            .by_path
            .keys()
            .find(|existing| path.starts_with(existing) || existing.starts_with(path))
        {
            return Err(ShareError::PathConflict {
                path: path.to_path_buf(),
                existing: existing.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn insert(&mut self, path: PathBuf, virtual_lower: &str, dir: DirId) {
        self.by_path.insert(path, dir);
        self.by_virtual
            .entry(virtual_lower.to_string())
            .or_default()
            .push(dir);
    }

    /// Unregisters a root; other roots under the same virtual name stay.
    pub(crate) fn remove(&mut self, path: &Path, virtual_lower: &str) -> Option<DirId> {
        let dir = self.by_path.remove(path)?;
        self.unlink_virtual(virtual_lower, dir);
        Some(dir)
    }

    /// Moves a root to another virtual name. The real path entry is untouched.
    pub(crate) fn rename(&mut self, dir: DirId, old_lower: &str, new_lower: &str) {
        self.unlink_virtual(old_lower, dir);
        self.by_virtual
            .entry(new_lower.to_string())
            .or_default()
            .push(dir);
    }

    fn unlink_virtual(&mut self, virtual_lower: &str, dir: DirId) {
        if let Some(dirs) = self.by_virtual.get_mut(virtual_lower) {
            dirs.retain(|existing| *existing != dir);
            if dirs.is_empty() {
                self.by_virtual.remove(virtual_lower);
            }
        }
    }

    pub fn get(&self, path: &Path) -> Option<DirId> {
        self.by_path.get(path).copied()
    }

    /// Every root registered under a lowercase virtual name.
    pub fn by_virtual(&self, virtual_lower: &str) -> &[DirId] {
        self.by_virtual
            .get(virtual_lower)
            .map(|dirs| dirs.as_slice())
            .unwrap_or(&[])
    }

    /// Finds the root that is `path` or contains it.
    pub fn root_for_path(&self, path: &Path) -> Option<(&Path, DirId)> {
        // Roots never nest, so the closest smaller key is the only candidate.
        let (root_path, dir) = self
            .by_path
            .range::<Path, _>((Bound::Unbounded, Bound::Included(path)))
            .next_back()?;
        path.starts_with(root_path)
            .then_some((root_path.as_path(), *dir))
    }

    /// Roots ordered by real path.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, DirId)> {
        self.by_path.iter().map(|(path, dir)| (path.as_path(), *dir))
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

/// Snapshot of one root for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootInfo {
    pub path: PathBuf,
    pub virtual_name: String,
    pub profiles: ProfileSet,
    pub incoming: bool,
    pub last_refresh_time: u64,
    pub total_size: u64,
}

/// Options for adding a root.
#[derive(Debug, Clone)]
pub struct RootOptions {
    pub path: PathBuf,
    /// Empty means "use the last component of the path".
    pub virtual_name: String,
    pub profiles: ProfileSet,
    pub incoming: bool,
}

impl RootOptions {
    pub fn new(path: impl Into<PathBuf>, virtual_name: &str, profiles: ProfileSet) -> Self {
        Self {
            path: path.into(),
            virtual_name: virtual_name.to_string(),
            profiles,
            incoming: false,
        }
    }

    pub fn incoming(mut self, incoming: bool) -> Self {
        self.incoming = incoming;
        self
    }
}

/// Makes a virtual name safe for peers: path separators become `_`, and an
/// empty name falls back to the last component of `real_path`.
pub fn validate_virtual_name(name: &str, real_path: &Path) -> String {
    let name = name.trim();
    let name = if name.is_empty() {
        real_path
            .file_name()
            .map(|last| last.to_string_lossy().into_owned())
            .unwrap_or_else(|| real_path.to_string_lossy().into_owned())
    } else {
        name.to_string()
    };
    name.replace(['/', '\\'], "_")
}
