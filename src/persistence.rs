//! Share cache persistence.
//!
//! The cache stores every root's tree as nested directory records, encoded
//! with postcard and compressed with zstd. Loading splices the cached trees
//! into roots that are still registered, the same way a refresh splices a
//! scanned fragment, so the live indices stay consistent.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use std::thread::available_parallelism;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thin_vec::ThinVec;

use crate::data::ShareIndexData;
use crate::error::{Result, ShareError};
use crate::refresh::{apply_plans, plan_refresh, ScannedDirectory, ScannedFile};
use crate::tree::{DirectoryEntrySink, FileEntryRef};
use crate::types::{unix_now_secs, ContentHash};

/// Cache format version; bump when the layout changes.
pub const SHARE_CACHE_VERSION: u32 = 1;

const ZSTD_LEVEL: i32 = 6;

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistentShare {
    pub version: u32,
    pub saved_at: u64,
    pub roots: Vec<CachedRoot>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CachedRoot {
    pub path: PathBuf,
    pub last_refresh_time: u64,
    pub tree: CachedDirectory,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CachedDirectory {
    pub name: String,
    pub last_write: u64,
    pub directories: ThinVec<CachedDirectory>,
    pub files: ThinVec<CachedFile>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CachedFile {
    pub name: String,
    pub size: u64,
    pub hash: ContentHash,
    pub last_write: u64,
}

impl From<CachedDirectory> for ScannedDirectory {
    fn from(cached: CachedDirectory) -> Self {
        let mut scanned = ScannedDirectory::new(&cached.name, cached.last_write);
        scanned.files = cached
            .files
            .into_iter()
            .map(|file| ScannedFile {
                name: file.name,
                size: file.size,
                hash: file.hash,
                last_write: file.last_write,
            })
            .collect();
        scanned.directories = cached
            .directories
            .into_iter()
            .map(ScannedDirectory::from)
            .collect();
        scanned
    }
}

/// Rebuilds nested records from the tree's depth-first traversal.
#[derive(Default)]
struct CacheBuilder {
    stack: Vec<CachedDirectory>,
    finished: Option<CachedDirectory>,
}

impl DirectoryEntrySink for CacheBuilder {
    fn start_directory(&mut self, name: &str, last_write: u64) -> Result<()> {
        self.stack.push(CachedDirectory {
            name: name.to_string(),
            last_write,
            ..CachedDirectory::default()
        });
        Ok(())
    }

    fn write_file(&mut self, file: FileEntryRef<'_>) -> Result<()> {
        let current = self
            .stack
            .last_mut()
            .ok_or_else(|| ShareError::Serialization("file outside a directory".to_string()))?;
        current.files.push(CachedFile {
            name: file.name.to_string(),
            size: file.size,
            hash: file.hash,
            last_write: file.last_write,
        });
        Ok(())
    }

    fn end_directory(&mut self) -> Result<()> {
        let done = self
            .stack
            .pop()
            .ok_or_else(|| ShareError::Serialization("unbalanced directory end".to_string()))?;
        match self.stack.last_mut() {
            Some(parent) => parent.directories.push(done),
            None => self.finished = Some(done),
        }
        Ok(())
    }
}

/// Captures every root. Runs under the shared lock.
pub fn snapshot_share(data: &ShareIndexData) -> Result<PersistentShare> {
    let mut roots = Vec::with_capacity(data.roots().len());
    for (path, dir) in data.roots().iter() {
        let mut builder = CacheBuilder::default();
        data.tree().write_directory(dir, &mut builder)?;
        let Some(tree) = builder.finished else {
            continue;
        };
        roots.push(CachedRoot {
            path: path.to_path_buf(),
            last_refresh_time: data.root(dir)?.last_refresh_time,
            tree,
        });
    }
    Ok(PersistentShare {
        version: SHARE_CACHE_VERSION,
        saved_at: unix_now_secs(),
        roots,
    })
}

/// Writes the cache next to `path` and moves it into place.
pub fn write_share_cache(path: &Path, share: &PersistentShare) -> Result<()> {
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;
    let temp = NamedTempFile::new_in(dir)?;

    {
        let mut encoder = zstd::Encoder::new(temp.as_file(), ZSTD_LEVEL)?;
        let threads = available_parallelism().map(|x| x.get() as u32).unwrap_or(4);
        encoder.multithread(threads)?;

        let mut output = BufWriter::new(encoder);
        postcard::to_io(share, &mut output)
            .map_err(|error| ShareError::Serialization(format!("postcard encode: {error}")))?;
        let encoder = output
            .into_inner()
            .map_err(|error| ShareError::Io(error.into_error()))?;
        encoder.finish()?;
    }

    temp.persist(path).map_err(|error| ShareError::Io(error.error))?;
    log::debug!(
        "share cache written path={} roots={}",
        path.display(),
        share.roots.len()
    );
    Ok(())
}

/// Reads a cache file. Missing, unreadable and outdated caches yield `None`.
pub fn read_share_cache(path: &Path) -> Option<PersistentShare> {
    let input = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::NotFound => return None,
        Err(error) => {
            log::warn!("share cache read failed path={} error={}", path.display(), error);
            return None;
        }
    };
    let decoder = match zstd::Decoder::new(input) {
        Ok(decoder) => decoder,
        Err(error) => {
            log::warn!("share cache decompress failed path={} error={}", path.display(), error);
            return None;
        }
    };

    let mut input = BufReader::new(decoder);
    let mut scratch = vec![0u8; 4 * 1024];
    let share: PersistentShare = match postcard::from_io((&mut input, &mut scratch)) {
        Ok((share, _)) => share,
        Err(error) => {
            log::warn!("share cache decode failed path={} error={}", path.display(), error);
            return None;
        }
    };
    if share.version != SHARE_CACHE_VERSION {
        log::warn!(
            "share cache version mismatch path={} found={} expected={}",
            path.display(),
            share.version,
            SHARE_CACHE_VERSION
        );
        return None;
    }
    Some(share)
}

/// Splices cached trees into registered roots. Returns the number of roots
/// restored; cached roots that are no longer shared are skipped.
pub fn restore_share(data: &mut ShareIndexData, share: PersistentShare, rebuild_ratio: f64) -> usize {
    let mut plans = Vec::new();
    let mut restored = Vec::new();
    for cached in share.roots {
        let Some(dir) = data.roots().get(&cached.path) else {
            log::debug!("share cache skipped unknown root path={}", cached.path.display());
            continue;
        };
        if let Some(plan) = plan_refresh(data.tree(), dir, Path::new(""), cached.tree.into()) {
            plans.push(plan);
            restored.push((dir, cached.last_refresh_time));
        }
    }

    apply_plans(&mut data.tree, plans, rebuild_ratio);
    for (dir, last_refresh_time) in &restored {
        if let Ok(root) = data.root(*dir) {
            let profiles = root.profiles.clone();
            data.mark_dirty(&profiles);
        }
        data.set_last_refresh_time(*dir, *last_refresh_time);
    }
    restored.len()
}
