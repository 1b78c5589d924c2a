//! The share manager: the public face of the share index.
//!
//! All tree state lives in one [`ShareIndexData`] behind a `RwLock`.
//! Searches and path lookups take the shared lock; root edits, hash
//! callbacks and refresh splices take the exclusive one. At most one refresh
//! runs at a time, guarded by a flag rather than the lock so a second request
//! fails fast with `RefreshInProgress`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Mutex, RwLock};

use crate::cancel::CancellationToken;
use crate::config::{EntryFilter, ShareSettings};
use crate::data::{ShareIndexData, ShareStats};
use crate::error::{canonicalize_existing_path, Result, ShareError};
use crate::indices::HashBloom;
use crate::persistence::{read_share_cache, restore_share, snapshot_share, write_share_cache};
use crate::profile::{ProfileFilter, ProfileSet, ProfileToken};
use crate::refresh::{
    run_refresh, DownloadQueue, HashProvider, RefreshEnv, RefreshHandle, RefreshJob,
    RefreshReport, RefreshScope, RefreshState,
};
use crate::roots::{RootInfo, RootOptions};
use crate::search::{search_share, ResultKind, SearchCounters, SearchQuery, SearchResult, SearchResults, SearchStats};
use crate::temp_share::{TempShare, TempShareOutcome, TempShares};
use crate::tree::{DirId, DirectoryEntrySink};
use crate::types::{system_time_secs, ContentHash};

const REFRESH_THREAD_NAME: &str = "share-refresh";

struct ShareInner {
    data: RwLock<ShareIndexData>,
    temp_shares: Mutex<TempShares>,
    refreshing: AtomicBool,
    shut_down: AtomicBool,
    current_refresh: Mutex<Option<CancellationToken>>,
    filter: EntryFilter,
    bloom_rebuild_ratio: f64,
    hasher: Arc<dyn HashProvider>,
    queue: Arc<dyn DownloadQueue>,
    counters: SearchCounters,
}

/// Shared roots, their trees and the refresh and search machinery.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct ShareManager {
    inner: Arc<ShareInner>,
}

impl std::fmt::Debug for ShareManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.inner.data.read();
        f.debug_struct("ShareManager")
            .field("roots", &data.roots().len())
            .field("directories", &data.tree().directory_nodes())
            .field("files", &data.tree().file_nodes())
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

impl ShareManager {
    pub fn new(
        settings: &ShareSettings,
        hasher: Arc<dyn HashProvider>,
        queue: Arc<dyn DownloadQueue>,
    ) -> Result<Self> {
        let filter = EntryFilter::compile(settings)?;
        Ok(Self {
            inner: Arc::new(ShareInner {
                data: RwLock::new(ShareIndexData::new()),
                temp_shares: Mutex::new(TempShares::new()),
                refreshing: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                current_refresh: Mutex::new(None),
                filter,
                bloom_rebuild_ratio: f64::from(settings.bloom_rebuild_ratio),
                hasher,
                queue,
                counters: SearchCounters::default(),
            }),
        })
    }

    // -----------------------------------------------------------------------
    // Roots
    // -----------------------------------------------------------------------

    /// Registers an existing directory as an empty root. Its contents appear
    /// after the next refresh.
    pub fn add_root(&self, options: RootOptions) -> Result<RootInfo> {
        let metadata = fs::metadata(&options.path).map_err(|source| ShareError::Filesystem {
            path: options.path.clone(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(ShareError::InvalidInput(format!(
                "not a directory: {}",
                options.path.display()
            )));
        }
        let path = fs::canonicalize(&options.path).map_err(|source| ShareError::Filesystem {
            path: options.path.clone(),
            source,
        })?;
        let last_write = metadata.modified().map(system_time_secs).unwrap_or(0);

        let mut data = self.inner.data.write();
        let dir = data.add_root(
            path.clone(),
            &options.virtual_name,
            options.profiles,
            options.incoming,
            last_write,
        )?;
        let info = data
            .root_info(dir)
            .ok_or_else(|| ShareError::NotFound(format!("shared root {}", path.display())))?;
        log::info!(
            "share root added path={} virtual_name={} incoming={}",
            info.path.display(),
            info.virtual_name,
            info.incoming
        );
        Ok(info)
    }

    /// Removes a root and everything below it.
    pub fn remove_root(&self, path: &Path) -> Result<()> {
        let path = canonicalize_existing_path(path.to_path_buf());
        let removed = self.inner.data.write().remove_root(&path)?;
        log::info!(
            "share root removed path={} nodes={}",
            path.display(),
            removed
        );
        Ok(())
    }

    pub fn rename_root(&self, path: &Path, virtual_name: &str) -> Result<()> {
        let path = canonicalize_existing_path(path.to_path_buf());
        self.inner.data.write().rename_root(&path, virtual_name)?;
        log::info!(
            "share root renamed path={} virtual_name={}",
            path.display(),
            virtual_name
        );
        Ok(())
    }

    pub fn add_root_profile(&self, path: &Path, profile: ProfileToken) -> Result<bool> {
        self.inner
            .data
            .write()
            .add_root_profile(&canonicalize_existing_path(path.to_path_buf()), profile)
    }

    pub fn remove_root_profile(&self, path: &Path, profile: ProfileToken) -> Result<bool> {
        self.inner
            .data
            .write()
            .remove_root_profile(&canonicalize_existing_path(path.to_path_buf()), profile)
    }

    pub fn list_roots(&self) -> Vec<RootInfo> {
        self.inner.data.read().list_roots()
    }

    pub fn has_virtual(&self, virtual_name: &str, filter: &ProfileFilter) -> bool {
        self.inner.data.read().has_virtual(virtual_name, filter)
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Maps a virtual path to real paths; see
    /// [`ShareIndexData::resolve_adc_path`].
    pub fn resolve_adc_path(&self, adc_path: &str, filter: &ProfileFilter) -> Result<Vec<PathBuf>> {
        self.inner.data.read().resolve_adc_path(adc_path, filter)
    }

    /// Directory nodes behind a virtual directory path, one per same-named
    /// root that contains it.
    pub fn find_directory(&self, adc_path: &str, filter: &ProfileFilter) -> Result<Vec<DirId>> {
        self.inner.data.read().find_directories(adc_path, filter)
    }

    /// Feeds one virtual directory into `sink`. Same-named roots are written
    /// one after another.
    pub fn walk_directory(
        &self,
        adc_path: &str,
        filter: &ProfileFilter,
        recursive: bool,
        sink: &mut dyn DirectoryEntrySink,
    ) -> Result<()> {
        let data = self.inner.data.read();
        for dir in data.find_directories(adc_path, filter)? {
            data.tree().write_contents(dir, recursive, sink)?;
        }
        Ok(())
    }

    pub fn total_size(&self, filter: &ProfileFilter) -> u64 {
        self.inner.data.read().total_size(filter)
    }

    pub fn file_count(&self, filter: &ProfileFilter) -> usize {
        self.inner.data.read().file_count(filter)
    }

    /// Total size and file count visible to one profile.
    pub fn profile_info(&self, profile: ProfileToken) -> (u64, usize) {
        let filter = ProfileFilter::profile(profile);
        let data = self.inner.data.read();
        (data.total_size(&filter), data.file_count(&filter))
    }

    pub fn share_stats(&self) -> ShareStats {
        self.inner.data.read().stats()
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    /// Searches the share. Hash queries that miss the tree fall back to the
    /// temporary shares visible to `query.requester`.
    pub fn search(
        &self,
        query: &SearchQuery,
        filter: &ProfileFilter,
        max_results: usize,
    ) -> Result<SearchResults> {
        let mut results = {
            let data = self.inner.data.read();
            search_share(&data, query, filter, max_results, &self.inner.counters)?
        };
        if let Some(hash) = query.hash.filter(|_| results.is_empty() && max_results > 0) {
            let temp_shares = self.inner.temp_shares.lock();
            if let Some(temp) = temp_shares.find(&hash, query.requester.as_deref()) {
                results.entries.push(SearchResult {
                    kind: ResultKind::File,
                    adc_path: temp.adc_path(),
                    real_path: temp.path.clone(),
                    size: temp.size,
                    hash: Some(temp.hash),
                    last_write: temp.added_at,
                    score: 1.0,
                });
                self.inner.counters.add_hits(1);
            }
        }
        Ok(results)
    }

    pub fn search_stats(&self) -> SearchStats {
        self.inner.counters.snapshot()
    }

    // -----------------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------------

    pub fn is_refreshing(&self) -> bool {
        self.inner.refreshing.load(Ordering::Acquire)
    }

    /// Starts a refresh on a background thread.
    ///
    /// Fails with `RefreshInProgress` while another refresh runs and with
    /// `Aborted` after [`shutdown`](Self::shutdown).
    pub fn refresh(&self, scope: RefreshScope) -> Result<RefreshHandle> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(ShareError::Aborted);
        }
        if self
            .inner
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ShareError::RefreshInProgress);
        }

        let targets = match scope.targets(&self.inner.data.read()) {
            Ok(targets) => targets,
            Err(err) => {
                self.inner.refreshing.store(false, Ordering::Release);
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        self.install_refresh_token(&cancel)?;
        let (job, handle) = RefreshJob::new(targets, cancel);

        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name(REFRESH_THREAD_NAME.to_string())
            .spawn(move || refresh_thread(inner, job));
        if let Err(err) = spawned {
            *self.inner.current_refresh.lock() = None;
            self.inner.refreshing.store(false, Ordering::Release);
            return Err(ShareError::Io(err));
        }
        Ok(handle)
    }

    /// Publishes the token of a starting refresh so `shutdown` can cancel
    /// it. Shutdown flips its flag under the same lock.
    fn install_refresh_token(&self, cancel: &CancellationToken) -> Result<()> {
        let mut current = self.inner.current_refresh.lock();
        if self.inner.shut_down.load(Ordering::Acquire) {
            self.inner.refreshing.store(false, Ordering::Release);
            return Err(ShareError::Aborted);
        }
        *current = Some(cancel.clone());
        Ok(())
    }

    /// Stores a file whose hash just became known. Missing directories
    /// between its root and the file are created. Returns `Ok(false)` when
    /// the entry filter rejects the path.
    pub fn hash_completed(&self, path: &Path, hash: ContentHash) -> Result<bool> {
        let metadata = fs::metadata(path).map_err(|source| ShareError::Filesystem {
            path: path.to_path_buf(),
            source,
        })?;
        let last_write = metadata.modified().map(system_time_secs).unwrap_or(0);
        let path = canonicalize_existing_path(path.to_path_buf());
        self.inner.data.write().apply_hashed_file(
            &path,
            metadata.len(),
            hash,
            last_write,
            &self.inner.filter,
        )
    }

    /// Cancels a running refresh and rejects new ones.
    pub fn shutdown(&self) {
        let current = self.inner.current_refresh.lock();
        self.inner.shut_down.store(true, Ordering::Release);
        if let Some(cancel) = current.as_ref() {
            cancel.cancel();
        }
        drop(current);
        log::info!("share manager shut down");
    }

    // -----------------------------------------------------------------------
    // Temporary shares
    // -----------------------------------------------------------------------

    pub fn add_temp_share(
        &self,
        key: &str,
        path: PathBuf,
        size: u64,
        hash: ContentHash,
    ) -> Result<TempShareOutcome> {
        if self
            .inner
            .data
            .read()
            .tree()
            .content_index()
            .contains_hash(&hash)
        {
            return Ok(TempShareOutcome::AlreadyShared);
        }
        self.inner.temp_shares.lock().add(key, path, size, hash)
    }

    pub fn remove_temp_share(&self, key: &str, hash: &ContentHash) -> bool {
        self.inner.temp_shares.lock().remove(key, hash)
    }

    pub fn temp_shares(&self) -> Vec<TempShare> {
        self.inner.temp_shares.lock().list()
    }

    pub fn find_temp_share(&self, hash: &ContentHash, requester: Option<&str>) -> Option<TempShare> {
        self.inner.temp_shares.lock().find(hash, requester).cloned()
    }

    // -----------------------------------------------------------------------
    // Exports and bookkeeping
    // -----------------------------------------------------------------------

    /// Serialized bloom filter over every shared content hash.
    pub fn hash_bloom(&self, k: usize, m: usize, h: usize) -> Result<Vec<u8>> {
        let mut bloom = HashBloom::new(k, m, h)?;
        let data = self.inner.data.read();
        for hash in data.tree().content_index().hashes() {
            bloom.add(hash);
        }
        Ok(bloom.to_bytes())
    }

    pub fn is_profile_dirty(&self, profile: ProfileToken) -> bool {
        self.inner.data.read().is_profile_dirty(profile)
    }

    /// Profiles whose file lists changed since the last call.
    pub fn take_dirty_profiles(&self) -> ProfileSet {
        self.inner.data.write().take_dirty_profiles()
    }

    pub fn save_cache(&self, path: &Path) -> Result<()> {
        let share = snapshot_share(&self.inner.data.read())?;
        write_share_cache(path, &share)?;
        log::info!(
            "share cache saved path={} roots={}",
            path.display(),
            share.roots.len()
        );
        Ok(())
    }

    /// Restores cached trees into the registered roots. Returns the number
    /// of roots restored; an unusable cache restores nothing.
    pub fn load_cache(&self, path: &Path) -> Result<usize> {
        if self.is_refreshing() {
            return Err(ShareError::RefreshInProgress);
        }
        let Some(share) = read_share_cache(path) else {
            return Ok(0);
        };
        let restored = restore_share(
            &mut self.inner.data.write(),
            share,
            self.inner.bloom_rebuild_ratio,
        );
        log::info!(
            "share cache loaded path={} roots={}",
            path.display(),
            restored
        );
        Ok(restored)
    }
}

fn refresh_thread(inner: Arc<ShareInner>, job: RefreshJob) {
    let env = RefreshEnv {
        data: &inner.data,
        filter: &inner.filter,
        hasher: inner.hasher.as_ref(),
        queue: inner.queue.as_ref(),
        bloom_rebuild_ratio: inner.bloom_rebuild_ratio,
    };
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run_refresh(&env, &job)));
    let report = match result {
        Ok(report) => report,
        Err(panic_info) => {
            let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else {
                "refresh thread panicked".to_string()
            };
            log::error!("refresh panicked error={panic_msg}");
            let mut report = RefreshReport::finished(RefreshState::Failed, job.targets.len());
            report.error = Some(format!("panic during refresh: {panic_msg}"));
            report
        }
    };

    *inner.current_refresh.lock() = None;
    inner.refreshing.store(false, Ordering::Release);
    job.complete(report);
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use tempfile::TempDir;

    use super::*;
    use crate::refresh::{HashLookup, NoDownloads};
    use crate::tree::FileEntryRef;

    /// Derives a hash from the file's bytes.
    struct ContentHasher;

    fn content_hash(bytes: &[u8]) -> ContentHash {
        let mut out = [0u8; 24];
        for (index, byte) in bytes.iter().enumerate() {
            out[index % 24] ^= byte.wrapping_add(index as u8);
        }
        out[23] ^= bytes.len() as u8;
        ContentHash::new(out)
    }

    impl HashProvider for ContentHasher {
        fn hash_lookup(&self, path: &Path, _size: u64, _last_write: u64) -> HashLookup {
            HashLookup::Known(content_hash(&fs::read(path).unwrap_or_default()))
        }
    }

    /// Blocks every lookup until the sender is dropped.
    struct GatedHasher {
        gate: std::sync::Mutex<mpsc::Receiver<()>>,
    }

    impl HashProvider for GatedHasher {
        fn hash_lookup(&self, path: &Path, size: u64, last_write: u64) -> HashLookup {
            let _ = self.gate.lock().unwrap().recv();
            ContentHasher.hash_lookup(path, size, last_write)
        }
    }

    fn manager_with(hasher: Arc<dyn HashProvider>) -> ShareManager {
        ShareManager::new(&ShareSettings::default(), hasher, Arc::new(NoDownloads)).unwrap()
    }

    fn manager() -> ShareManager {
        manager_with(Arc::new(ContentHasher))
    }

    fn gated() -> (ShareManager, mpsc::Sender<()>) {
        let (sender, receiver) = mpsc::channel();
        let hasher = GatedHasher {
            gate: std::sync::Mutex::new(receiver),
        };
        (manager_with(Arc::new(hasher)), sender)
    }

    fn fixture() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("Music/Rock")).unwrap();
        fs::create_dir_all(root.join("Docs")).unwrap();
        fs::write(root.join("Music/Rock/song.mp3"), b"guitar riff").unwrap();
        fs::write(root.join("Music/intro.mp3"), b"intro").unwrap();
        fs::write(root.join("Docs/readme.txt"), b"read me first").unwrap();
        temp
    }

    fn add_root(manager: &ShareManager, path: &Path, name: &str) -> RootInfo {
        manager
            .add_root(RootOptions::new(path, name, ProfileSet::single(0)))
            .unwrap()
    }

    fn refresh_all(manager: &ShareManager) -> RefreshReport {
        manager.refresh(RefreshScope::All).unwrap().wait().unwrap()
    }

    #[test]
    fn refresh_totals_match_the_disk() {
        let temp = fixture();
        let manager = manager();
        add_root(&manager, temp.path(), "Share");

        let report = refresh_all(&manager);
        assert_eq!(report.state, RefreshState::Done);
        let all = ProfileFilter::Unrestricted;
        assert_eq!(manager.total_size(&all), 11 + 5 + 13);
        assert_eq!(manager.file_count(&all), 3);
        assert_eq!(manager.profile_info(0), (29, 3));
        assert_eq!(manager.profile_info(7), (0, 0));
        assert_eq!(manager.list_roots()[0].total_size, 29);

        manager.remove_root(temp.path()).unwrap();
        assert_eq!(manager.total_size(&all), 0);
        assert!(manager.list_roots().is_empty());
    }

    #[test]
    fn refreshing_twice_changes_nothing() {
        let temp = fixture();
        let manager = manager();
        add_root(&manager, temp.path(), "Share");
        refresh_all(&manager);
        let first = manager.share_stats();

        let report = refresh_all(&manager);
        assert_eq!((report.added, report.removed, report.updated), (0, 0, 0));
        let second = manager.share_stats();
        assert_eq!(first.directories, second.directories);
        assert_eq!(first.files, second.files);
        assert_eq!(first.total_size, second.total_size);
    }

    #[cfg(unix)]
    #[test]
    fn entry_errors_do_not_stop_siblings() {
        let temp = fixture();
        std::os::unix::fs::symlink(temp.path().join("nowhere"), temp.path().join("Music/broken"))
            .unwrap();
        let settings = ShareSettings {
            follow_symlinks: true,
            ..ShareSettings::default()
        };
        let manager =
            ShareManager::new(&settings, Arc::new(ContentHasher), Arc::new(NoDownloads)).unwrap();
        add_root(&manager, temp.path(), "Share");

        let handle = manager.refresh(RefreshScope::All).unwrap();
        let report = handle.wait().unwrap();
        assert_eq!(report.state, RefreshState::Done);
        assert_eq!(manager.file_count(&ProfileFilter::Unrestricted), 3);
    }

    #[test]
    fn overlapping_refreshes_are_rejected() {
        let temp = fixture();
        let (manager, gate) = gated();
        add_root(&manager, temp.path(), "Share");

        let handle = manager.refresh(RefreshScope::All).unwrap();
        assert!(manager.is_refreshing());
        assert!(matches!(
            manager.refresh(RefreshScope::All),
            Err(ShareError::RefreshInProgress)
        ));

        drop(gate);
        assert_eq!(handle.wait().unwrap().state, RefreshState::Done);
        assert!(!manager.is_refreshing());
        assert!(manager.refresh(RefreshScope::All).is_ok());
    }

    #[test]
    fn aborted_refresh_keeps_the_old_tree() {
        let temp = fixture();
        let (manager, gate) = gated();
        add_root(&manager, temp.path(), "Share");

        let handle = manager.refresh(RefreshScope::All).unwrap();
        handle.cancel();
        drop(gate);
        let report = handle.wait().unwrap();
        assert_eq!(report.state, RefreshState::Aborted);
        assert_eq!(manager.file_count(&ProfileFilter::Unrestricted), 0);
    }

    #[test]
    fn shutdown_rejects_new_refreshes() {
        let temp = fixture();
        let manager = manager();
        add_root(&manager, temp.path(), "Share");
        manager.shutdown();
        assert!(matches!(
            manager.refresh(RefreshScope::All),
            Err(ShareError::Aborted)
        ));
    }

    #[test]
    fn shutdown_during_refresh_start_rejects_it() {
        let manager = manager();
        manager.inner.refreshing.store(true, Ordering::Release);
        manager.shutdown();

        let cancel = CancellationToken::new();
        assert!(matches!(
            manager.install_refresh_token(&cancel),
            Err(ShareError::Aborted)
        ));
        assert!(manager.inner.current_refresh.lock().is_none());
        assert!(!manager.is_refreshing());
    }

    #[test]
    fn nested_roots_conflict() {
        let temp = fixture();
        let manager = manager();
        add_root(&manager, &temp.path().join("Music"), "Music");

        let child = manager.add_root(RootOptions::new(
            temp.path().join("Music/Rock"),
            "Rock",
            ProfileSet::single(0),
        ));
        assert!(matches!(child, Err(ShareError::PathConflict { .. })));
        let parent = manager.add_root(RootOptions::new(temp.path(), "All", ProfileSet::single(0)));
        assert!(matches!(parent, Err(ShareError::PathConflict { .. })));
        assert!(manager
            .add_root(RootOptions::new(temp.path().join("Docs"), "Docs", ProfileSet::single(0)))
            .is_ok());
    }

    #[test]
    fn search_and_virtual_paths() {
        let temp = fixture();
        let manager = manager();
        add_root(&manager, temp.path(), "Share");
        refresh_all(&manager);
        let all = ProfileFilter::Unrestricted;

        let results = manager
            .search(&SearchQuery::parse("readme").unwrap(), &all, 10)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results.entries[0].adc_path, "/Share/Docs/readme.txt");

        let real = manager.resolve_adc_path("/Share/Music/intro.mp3", &all).unwrap();
        assert_eq!(real, vec![temp.path().canonicalize().unwrap().join("Music/intro.mp3")]);
        assert_eq!(manager.find_directory("/share/music/", &all).unwrap().len(), 1);
        assert!(manager.has_virtual("SHARE", &all));
        assert!(!manager.has_virtual("Share", &ProfileFilter::profile(3)));

        let hash = content_hash(b"intro");
        let by_hash = manager.search(&SearchQuery::by_hash(hash), &all, 10).unwrap();
        assert_eq!(by_hash.entries[0].size, 5);
        assert!(manager.search_stats().hits >= 2);
    }

    #[test]
    fn temp_shares_answer_hash_searches() {
        let manager = manager();
        let hash = content_hash(b"lent file");
        assert_eq!(
            manager
                .add_temp_share("peer", PathBuf::from("/data/lent.bin"), 9, hash)
                .unwrap(),
            TempShareOutcome::Added
        );

        let mut query = SearchQuery::by_hash(hash);
        let all = ProfileFilter::Unrestricted;
        assert!(manager.search(&query, &all, 5).unwrap().is_empty());
        query.requester = Some("peer".to_string());
        let results = manager.search(&query, &all, 5).unwrap();
        assert_eq!(results.entries[0].adc_path, "/tmp/lent.bin");
        assert!(manager.find_temp_share(&hash, Some("peer")).is_some());

        assert!(manager.remove_temp_share("peer", &hash));
        assert!(manager.temp_shares().is_empty());
    }

    #[test]
    fn temp_share_of_shared_content_is_refused() {
        let temp = fixture();
        let manager = manager();
        add_root(&manager, temp.path(), "Share");
        refresh_all(&manager);
        assert_eq!(
            manager
                .add_temp_share("", PathBuf::from("/x/intro.mp3"), 5, content_hash(b"intro"))
                .unwrap(),
            TempShareOutcome::AlreadyShared
        );
    }

    #[test]
    fn completed_hashes_extend_the_tree() {
        let temp = fixture();
        let manager = manager();
        add_root(&manager, temp.path(), "Share");
        refresh_all(&manager);
        manager.take_dirty_profiles();

        fs::create_dir_all(temp.path().join("New/Deep")).unwrap();
        let path = temp.path().join("New/Deep/late.bin");
        fs::write(&path, b"late arrival").unwrap();
        assert!(manager.hash_completed(&path, content_hash(b"late arrival")).unwrap());

        let all = ProfileFilter::Unrestricted;
        assert_eq!(manager.file_count(&all), 4);
        assert!(manager.is_profile_dirty(0));
        assert!(manager.resolve_adc_path("/Share/New/Deep/late.bin", &all).is_ok());

        let outside = TempDir::new().unwrap();
        let stray = outside.path().join("stray.bin");
        fs::write(&stray, b"x").unwrap();
        assert!(matches!(
            manager.hash_completed(&stray, content_hash(b"x")),
            Err(ShareError::NotFound(_))
        ));
    }

    #[derive(Default)]
    struct Names(Vec<String>);

    impl DirectoryEntrySink for Names {
        fn start_directory(&mut self, name: &str, _last_write: u64) -> Result<()> {
            self.0.push(format!("{name}/"));
            Ok(())
        }

        fn write_file(&mut self, file: FileEntryRef<'_>) -> Result<()> {
            self.0.push(file.name.to_string());
            Ok(())
        }

        fn end_directory(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn partial_listing_of_a_virtual_directory() {
        let temp = fixture();
        let manager = manager();
        add_root(&manager, temp.path(), "Share");
        refresh_all(&manager);

        let mut names = Names::default();
        manager
            .walk_directory("/Share/Music/", &ProfileFilter::Unrestricted, false, &mut names)
            .unwrap();
        assert_eq!(names.0, vec!["Rock/".to_string(), "intro.mp3".to_string()]);
    }

    #[test]
    fn cache_round_trip() {
        let temp = fixture();
        let cache_dir = TempDir::new().unwrap();
        let cache = cache_dir.path().join("share.cache");

        let manager = manager();
        add_root(&manager, temp.path(), "Share");
        refresh_all(&manager);
        manager.save_cache(&cache).unwrap();

        let restored = self::manager();
        add_root(&restored, temp.path(), "Share");
        assert_eq!(restored.load_cache(&cache).unwrap(), 1);
        let all = ProfileFilter::Unrestricted;
        assert_eq!(restored.total_size(&all), manager.total_size(&all));
        assert_eq!(restored.file_count(&all), 3);

        let report = refresh_all(&restored);
        assert_eq!((report.added, report.removed, report.updated), (0, 0, 0));
    }

    #[test]
    fn hash_bloom_covers_shared_hashes() {
        let temp = fixture();
        let manager = manager();
        add_root(&manager, temp.path(), "Share");
        refresh_all(&manager);

        let bytes = manager.hash_bloom(2, 1024, 24).unwrap();
        assert_eq!(bytes.len(), 128);
        assert!(bytes.iter().any(|byte| *byte != 0));
        assert!(matches!(
            manager.hash_bloom(9, 1024, 24),
            Err(ShareError::InvalidInput(_))
        ));
    }
}
