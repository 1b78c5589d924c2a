//! Share settings and the entry filters derived from them.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::Match;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShareError};

/// Fraction of tracked names that may change in one splice before the name
/// bloom filter is rebuilt instead of merged.
pub const DEFAULT_BLOOM_REBUILD_RATIO: f32 = 0.2;

/// Extensions of partially downloaded files.
pub const INCOMPLETE_EXTENSIONS: &[&str] = &["dctmp", "antifrag"];

/// File names that are never shared.
pub const FORBIDDEN_FILE_NAMES: &[&str] = &["thumbs.db", "desktop.ini", ".ds_store"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareSettings {
    /// Share entries whose name starts with a dot.
    pub share_hidden: bool,
    /// Follow symbolic links while scanning.
    pub follow_symlinks: bool,
    /// Skip files with a size of zero.
    pub skip_zero_byte: bool,
    /// Glob patterns matched case-insensitively against entry names.
    pub skiplist: Vec<String>,
    /// Real paths that are never scanned.
    pub excluded_paths: Vec<PathBuf>,
    /// See [`DEFAULT_BLOOM_REBUILD_RATIO`].
    pub bloom_rebuild_ratio: f32,
}

impl Default for ShareSettings {
    fn default() -> Self {
        Self {
            share_hidden: false,
            follow_symlinks: false,
            skip_zero_byte: false,
            skiplist: Vec::new(),
            excluded_paths: Vec::new(),
            bloom_rebuild_ratio: DEFAULT_BLOOM_REBUILD_RATIO,
        }
    }
}

/// Compiled form of [`ShareSettings`] used while scanning.
#[derive(Debug)]
pub struct EntryFilter {
    share_hidden: bool,
    follow_symlinks: bool,
    skip_zero_byte: bool,
    skiplist: Gitignore,
    excluded_paths: Vec<PathBuf>,
}

impl EntryFilter {
    pub fn compile(settings: &ShareSettings) -> Result<Self> {
        let mut builder = GitignoreBuilder::new("");
        builder
            .case_insensitive(true)
            .map_err(|error| ShareError::InvalidInput(format!("skiplist: {error}")))?;
        for pattern in &settings.skiplist {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                continue;
            }
            builder.add_line(None, pattern).map_err(|error| {
                ShareError::InvalidInput(format!("skiplist pattern {pattern:?}: {error}"))
            })?;
        }
        let skiplist = builder
            .build()
            .map_err(|error| ShareError::InvalidInput(format!("skiplist: {error}")))?;

        Ok(Self {
            share_hidden: settings.share_hidden,
            follow_symlinks: settings.follow_symlinks,
            skip_zero_byte: settings.skip_zero_byte,
            skiplist,
            excluded_paths: settings.excluded_paths.clone(),
        })
    }

    pub fn follow_symlinks(&self) -> bool {
        self.follow_symlinks
    }

    /// Returns true if the path lies in an excluded subtree.
    pub fn is_excluded_path(&self, path: &Path) -> bool {
        path_is_ignored(&self.excluded_paths, path)
    }

    /// Checks a directory name and path before descending into it.
    pub fn accepts_directory(&self, name: &str, path: &Path) -> bool {
        self.accepts_name(name, true) && !self.is_excluded_path(path)
    }

    /// Checks a file before asking for its hash.
    pub fn accepts_file(&self, name: &str, path: &Path, size: u64) -> bool {
        if size == 0 && self.skip_zero_byte {
            return false;
        }
        if !self.accepts_name(name, false) || self.is_excluded_path(path) {
            return false;
        }
        let lower = name.to_lowercase();
        if FORBIDDEN_FILE_NAMES.contains(&lower.as_str()) {
            return false;
        }
        match lower.rsplit_once('.') {
            Some((_, extension)) => !INCOMPLETE_EXTENSIONS.contains(&extension),
            None => true,
        }
    }

    fn accepts_name(&self, name: &str, is_dir: bool) -> bool {
        if !is_valid_shared_name(name) {
            return false;
        }
        if !self.share_hidden && name.starts_with('.') {
            return false;
        }
        !matches!(
            self.skiplist.matched(Path::new(name), is_dir),
            Match::Ignore(_)
        )
    }
}

/// Rejects names a peer could not represent: empty names, dot entries,
/// control characters and path separators.
pub fn is_valid_shared_name(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return false;
    }
    !name
        .chars()
        .any(|ch| ch.is_control() || ch == '/' || ch == '\\')
}

/// Checks if a path lies inside one of the ignored roots.
pub fn path_is_ignored(ignored_roots: &[PathBuf], candidate: &Path) -> bool {
    ignored_roots
        .iter()
        .any(|ignored| candidate == ignored || candidate.starts_with(ignored))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(settings: ShareSettings) -> EntryFilter {
        EntryFilter::compile(&settings).unwrap()
    }

    #[test]
    fn default_settings() {
        let settings = ShareSettings::default();
        assert!(!settings.share_hidden);
        assert_eq!(settings.bloom_rebuild_ratio, DEFAULT_BLOOM_REBUILD_RATIO);
    }

    #[test]
    fn hidden_entries_follow_setting() {
        let path = Path::new("/share/.git");
        assert!(!filter(ShareSettings::default()).accepts_directory(".git", path));

        let sharing = filter(ShareSettings {
            share_hidden: true,
            ..ShareSettings::default()
        });
        assert!(sharing.accepts_directory(".git", path));
    }

    #[test]
    fn skiplist_is_case_insensitive() {
        let filter = filter(ShareSettings {
            skiplist: vec!["*.tmp".to_string(), "sample".to_string()],
            ..ShareSettings::default()
        });
        assert!(!filter.accepts_file("movie.TMP", Path::new("/s/movie.TMP"), 10));
        assert!(!filter.accepts_directory("Sample", Path::new("/s/Sample")));
        assert!(filter.accepts_file("movie.mkv", Path::new("/s/movie.mkv"), 10));
    }

    #[test]
    fn incomplete_and_forbidden_files_are_skipped() {
        let filter = filter(ShareSettings::default());
        assert!(!filter.accepts_file("a.dctmp", Path::new("/s/a.dctmp"), 1));
        assert!(!filter.accepts_file("Thumbs.db", Path::new("/s/Thumbs.db"), 1));
        assert!(filter.accepts_file("notes", Path::new("/s/notes"), 1));
    }

    #[test]
    fn zero_byte_files_follow_setting() {
        let path = Path::new("/s/empty.txt");
        assert!(filter(ShareSettings::default()).accepts_file("empty.txt", path, 0));
        let skipping = filter(ShareSettings {
            skip_zero_byte: true,
            ..ShareSettings::default()
        });
        assert!(!skipping.accepts_file("empty.txt", path, 0));
    }

    #[test]
    fn excluded_paths_cover_subtrees() {
        let filter = filter(ShareSettings {
            excluded_paths: vec![PathBuf::from("/s/private")],
            ..ShareSettings::default()
        });
        assert!(!filter.accepts_directory("private", Path::new("/s/private")));
        assert!(!filter.accepts_file("x.txt", Path::new("/s/private/deep/x.txt"), 3));
        assert!(filter.accepts_directory("privateer", Path::new("/s/privateer")));
    }

    #[test]
    fn shared_name_validation() {
        assert!(is_valid_shared_name("song.mp3"));
        assert!(!is_valid_shared_name(""));
        assert!(!is_valid_shared_name(".."));
        assert!(!is_valid_shared_name("bad\u{7}name"));
        assert!(!is_valid_shared_name("a\\b"));
    }
}
