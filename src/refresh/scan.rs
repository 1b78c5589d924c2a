//! Filesystem scanning into detached directory fragments.
//!
//! Scanning runs without any share lock. Directories are walked in parallel
//! with rayon; children come out sorted by lowercase name so the diff can
//! merge them against the live tree in one pass.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::Ordering;

use rayon::prelude::*;

use super::collaborators::{DownloadQueue, HashLookup, HashProvider};
use super::task::RefreshProgress;
use crate::cancel::CancellationToken;
use crate::config::EntryFilter;
use crate::error::{Result, ShareError};
use crate::types::{system_time_secs, ContentHash};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub name: String,
    pub size: u64,
    pub hash: ContentHash,
    pub last_write: u64,
}

/// A directory as found on disk, not yet part of the share tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedDirectory {
    pub name: String,
    /// Newest modification time of the directory and everything below it.
    pub last_write: u64,
    /// Sorted by lowercase name, unique case-insensitively.
    pub directories: Vec<ScannedDirectory>,
    /// Sorted by lowercase name, unique case-insensitively.
    pub files: Vec<ScannedFile>,
}

impl ScannedDirectory {
    pub fn new(name: &str, last_write: u64) -> Self {
        Self {
            name: name.to_string(),
            last_write,
            ..Self::default()
        }
    }

    /// Sorts children, drops case-insensitive duplicates (first one wins)
    /// and folds child times into `last_write`.
    pub fn finish(&mut self, path: &Path) {
        self.directories
            .sort_by_cached_key(|dir| (dir.name.to_lowercase(), dir.name.clone()));
        self.directories.dedup_by(|current, kept| {
            is_duplicate(path, &current.name, &kept.name)
        });
        self.files
            .sort_by_cached_key(|file| (file.name.to_lowercase(), file.name.clone()));
        self.files
            .dedup_by(|current, kept| is_duplicate(path, &current.name, &kept.name));

        let newest_dir = self.directories.iter().map(|dir| dir.last_write).max();
        let newest_file = self.files.iter().map(|file| file.last_write).max();
        self.last_write = self
            .last_write
            .max(newest_dir.unwrap_or(0))
            .max(newest_file.unwrap_or(0));
    }

    /// Number of names this fragment would add: itself, every directory and
    /// every file below it.
    pub fn name_count(&self) -> usize {
        1 + self.files.len()
            + self
                .directories
                .iter()
                .map(ScannedDirectory::name_count)
                .sum::<usize>()
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|file| file.size).sum::<u64>()
            + self
                .directories
                .iter()
                .map(ScannedDirectory::total_size)
                .sum::<u64>()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
            + self
                .directories
                .iter()
                .map(ScannedDirectory::file_count)
                .sum::<usize>()
    }
}

fn is_duplicate(path: &Path, current: &str, kept: &str) -> bool {
    let duplicate = current.to_lowercase() == kept.to_lowercase();
    if duplicate {
        log::warn!(
            "refresh skipped duplicate name dir={} kept={} skipped={}",
            path.display(),
            kept,
            current
        );
    }
    duplicate
}

/// What a scan found at the requested path.
#[derive(Debug)]
pub enum ScanOutcome {
    Scanned(ScannedDirectory),
    /// The path no longer exists.
    Missing,
}

/// Everything a scan needs besides the path.
pub struct ScanContext<'a> {
    pub filter: &'a EntryFilter,
    pub hasher: &'a dyn HashProvider,
    pub queue: &'a dyn DownloadQueue,
    pub cancel: &'a CancellationToken,
    pub progress: &'a RefreshProgress,
}

impl ScanContext<'_> {
    fn record_error(&self, path: &Path, error: &io::Error) {
        self.progress.errors.fetch_add(1, Ordering::Relaxed);
        log::warn!(
            "refresh skipped entry path={} error={}",
            path.display(),
            error
        );
    }
}

enum ScannedEntry {
    Directory(ScannedDirectory),
    File(ScannedFile),
}

/// Scans one directory subtree.
///
/// Returns `None` when cancelled. Failing to read `path` itself is an error;
/// failures below it are logged, counted and skipped.
pub fn scan_path(path: &Path, ctx: &ScanContext<'_>) -> Option<Result<ScanOutcome>> {
    ctx.cancel.is_cancelled()?;

    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            return Some(Ok(ScanOutcome::Missing));
        }
        Err(source) => {
            return Some(Err(ShareError::Filesystem {
                path: path.to_path_buf(),
                source,
            }));
        }
    };
    if !metadata.is_dir() {
        return Some(Err(ShareError::InvalidInput(format!(
            "not a directory: {}",
            path.display()
        ))));
    }

    let entries = match read_entries(path, ctx) {
        Ok(entries) => entries,
        Err(source) => {
            return Some(Err(ShareError::Filesystem {
                path: path.to_path_buf(),
                source,
            }));
        }
    };

    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    let last_write = metadata.modified().map(system_time_secs).unwrap_or(0);
    scan_entries(path, name, last_write, entries, ctx).map(|dir| Ok(ScanOutcome::Scanned(dir)))
}

fn read_entries(path: &Path, ctx: &ScanContext<'_>) -> io::Result<Vec<fs::DirEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)? {
        match entry {
            Ok(entry) => entries.push(entry),
            Err(error) => ctx.record_error(path, &error),
        }
    }
    Ok(entries)
}

fn scan_entries(
    path: &Path,
    name: String,
    last_write: u64,
    entries: Vec<fs::DirEntry>,
    ctx: &ScanContext<'_>,
) -> Option<ScannedDirectory> {
    ctx.cancel.is_cancelled()?;
    ctx.progress.scanned_dirs.fetch_add(1, Ordering::Relaxed);

    let scanned: Vec<ScannedEntry> = entries
        .into_par_iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            ctx.cancel.is_cancelled_sparse(index)?;
            scan_entry(&entry, ctx)
        })
        .collect();

    // Children return None both when skipped and when cancelled.
    ctx.cancel.is_cancelled()?;

    let mut directory = ScannedDirectory {
        name,
        last_write,
        ..ScannedDirectory::default()
    };
    for entry in scanned {
        match entry {
            ScannedEntry::Directory(child) => directory.directories.push(child),
            ScannedEntry::File(file) => directory.files.push(file),
        }
    }
    directory.finish(path);
    Some(directory)
}

fn scan_entry(entry: &fs::DirEntry, ctx: &ScanContext<'_>) -> Option<ScannedEntry> {
    let path = entry.path();
    let Ok(name) = entry.file_name().into_string() else {
        log::warn!("refresh skipped non-utf8 name path={}", path.display());
        return None;
    };

    let file_type = match entry.file_type() {
        Ok(file_type) => file_type,
        Err(error) => {
            ctx.record_error(&path, &error);
            return None;
        }
    };
    let metadata = if file_type.is_symlink() {
        if !ctx.filter.follow_symlinks() {
            return None;
        }
        fs::metadata(&path)
    } else {
        entry.metadata()
    };
    let metadata = match metadata {
        Ok(metadata) => metadata,
        Err(error) => {
            ctx.record_error(&path, &error);
            return None;
        }
    };
    let last_write = metadata.modified().map(system_time_secs).unwrap_or(0);

    if metadata.is_dir() {
        if !ctx.filter.accepts_directory(&name, &path) {
            return None;
        }
        if ctx.queue.is_path_queued(&path) {
            log::debug!("refresh skipped queued directory path={}", path.display());
            return None;
        }
        if file_type.is_symlink() && links_to_ancestor(&path) {
            log::warn!("refresh skipped symlink loop path={}", path.display());
            return None;
        }
        let entries = match read_entries(&path, ctx) {
            Ok(entries) => entries,
            Err(error) => {
                ctx.record_error(&path, &error);
                return None;
            }
        };
        return scan_entries(&path, name, last_write, entries, ctx).map(ScannedEntry::Directory);
    }

    if !metadata.is_file() {
        return None;
    }
    ctx.progress.scanned_files.fetch_add(1, Ordering::Relaxed);
    let size = metadata.len();
    if !ctx.filter.accepts_file(&name, &path, size) {
        return None;
    }
    if ctx.queue.is_path_queued(&path) {
        ctx.progress.skipped_files.fetch_add(1, Ordering::Relaxed);
        log::debug!("refresh skipped queued file path={}", path.display());
        return None;
    }

    match ctx.hasher.hash_lookup(&path, size, last_write) {
        HashLookup::Known(hash) => Some(ScannedEntry::File(ScannedFile {
            name,
            size,
            hash,
            last_write,
        })),
        HashLookup::Pending => {
            ctx.progress.pending_hashes.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}

fn links_to_ancestor(path: &Path) -> bool {
    fs::canonicalize(path)
        .map(|target| path.starts_with(&target))
        .unwrap_or(true)
}
