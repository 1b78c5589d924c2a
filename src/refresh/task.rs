//! Refresh task state, progress and the scan/diff/splice driver.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::{oneshot, watch};

use super::collaborators::{DownloadQueue, HashProvider};
use super::paths::coalesce_refresh_paths;
use super::plan::{plan_refresh, plan_removal, SplicePlan};
use super::scan::{scan_path, ScanContext, ScanOutcome, ScannedDirectory};
use super::splice::apply_plans;
use crate::cancel::CancellationToken;
use crate::config::EntryFilter;
use crate::data::ShareIndexData;
use crate::error::{Result, ShareError};
use crate::profile::ProfileSet;
use crate::tree::DirId;
use crate::types::{unix_now_secs, zero_to_none};

/// Refresh task state.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum RefreshState {
    Queued = 0,
    Scanning = 1,
    Diffing = 2,
    Splicing = 3,
    Done = 4,
    Failed = 5,
    Aborted = 6,
}

impl RefreshState {
    pub fn load(atomic: &AtomicU8) -> Self {
        match atomic.load(Ordering::Relaxed) {
            1 => Self::Scanning,
            2 => Self::Diffing,
            3 => Self::Splicing,
            4 => Self::Done,
            5 => Self::Failed,
            6 => Self::Aborted,
            _ => Self::Queued,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Scanning => "scanning",
            Self::Diffing => "diffing",
            Self::Splicing => "splicing",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Aborted)
    }
}

/// Live counters of a running refresh.
#[derive(Debug, Default)]
pub struct RefreshProgress {
    pub state: AtomicU8,
    pub scanned_files: AtomicUsize,
    pub scanned_dirs: AtomicUsize,
    pub errors: AtomicUsize,
    /// Files left out because the download queue is writing them.
    pub skipped_files: AtomicUsize,
    /// Files left out until their hash is known.
    pub pending_hashes: AtomicUsize,
    pub started_at: AtomicU64,
    pub finished_at: AtomicU64,
}

impl RefreshProgress {
    pub fn reset(&self, started_at: u64) {
        self.scanned_files.store(0, Ordering::Relaxed);
        self.scanned_dirs.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.skipped_files.store(0, Ordering::Relaxed);
        self.pending_hashes.store(0, Ordering::Relaxed);
        self.started_at.store(started_at, Ordering::Relaxed);
        self.finished_at.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RefreshProgressSnapshot {
        RefreshProgressSnapshot {
            state: RefreshState::load(&self.state),
            scanned_files: self.scanned_files.load(Ordering::Relaxed),
            scanned_dirs: self.scanned_dirs.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            skipped_files: self.skipped_files.load(Ordering::Relaxed),
            pending_hashes: self.pending_hashes.load(Ordering::Relaxed),
            started_at: zero_to_none(self.started_at.load(Ordering::Relaxed)),
            finished_at: zero_to_none(self.finished_at.load(Ordering::Relaxed)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshProgressSnapshot {
    pub state: RefreshState,
    pub scanned_files: usize,
    pub scanned_dirs: usize,
    pub errors: usize,
    pub skipped_files: usize,
    pub pending_hashes: usize,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
}

/// What to refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshScope {
    All,
    /// Roots flagged incoming.
    Incoming,
    /// Real paths, each a root or inside one.
    Paths(Vec<PathBuf>),
}

/// One subtree to rescan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTarget {
    pub root: DirId,
    pub root_path: PathBuf,
    /// Equal to `root_path` for whole-root refreshes.
    pub path: PathBuf,
}

impl RefreshTarget {
    fn relative(&self) -> &Path {
        self.path.strip_prefix(&self.root_path).unwrap_or(Path::new(""))
    }

    fn is_root(&self) -> bool {
        self.path == self.root_path
    }
}

impl RefreshScope {
    /// Resolves the scope against the registered roots.
    pub fn targets(&self, data: &ShareIndexData) -> Result<Vec<RefreshTarget>> {
        let whole_root = |path: &Path, dir: DirId| RefreshTarget {
            root: dir,
            root_path: path.to_path_buf(),
            path: path.to_path_buf(),
        };
        match self {
            Self::All => Ok(data
                .roots
                .iter()
                .map(|(path, dir)| whole_root(path, dir))
                .collect()),
            Self::Incoming => Ok(data
                .roots
                .iter()
                .filter(|(_, dir)| data.root(*dir).is_ok_and(|root| root.incoming))
                .map(|(path, dir)| whole_root(path, dir))
                .collect()),
            Self::Paths(paths) => coalesce_refresh_paths(paths.clone())
                .into_iter()
                .map(|path| {
                    let (root_path, root) = data.roots.root_for_path(&path).ok_or_else(|| {
                        ShareError::NotFound(format!("no shared root for {}", path.display()))
                    })?;
                    Ok(RefreshTarget {
                        root,
                        root_path: root_path.to_path_buf(),
                        path,
                    })
                })
                .collect(),
        }
    }
}

/// Final result of a refresh task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub state: RefreshState,
    pub roots: usize,
    pub failed_roots: usize,
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
    pub bloom_rebuilt: bool,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

impl RefreshReport {
    pub(crate) fn finished(state: RefreshState, roots: usize) -> Self {
        Self {
            state,
            roots,
            failed_roots: 0,
            added: 0,
            removed: 0,
            updated: 0,
            bloom_rebuilt: false,
            elapsed_ms: 0,
            error: None,
        }
    }
}

/// Owner's view of a running refresh.
#[derive(Debug)]
pub struct RefreshHandle {
    state: watch::Receiver<RefreshState>,
    report: oneshot::Receiver<RefreshReport>,
    progress: Arc<RefreshProgress>,
    cancel: CancellationToken,
}

impl RefreshHandle {
    pub fn state(&self) -> RefreshState {
        *self.state.borrow()
    }

    pub fn progress(&self) -> RefreshProgressSnapshot {
        self.progress.snapshot()
    }

    /// Requests an abort. Has no effect once splicing started.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A receiver that observes every state transition.
    pub fn subscribe(&self) -> watch::Receiver<RefreshState> {
        self.state.clone()
    }

    /// Blocks until the task finishes. Must not be called from an async
    /// context.
    pub fn wait(self) -> Result<RefreshReport> {
        self.report.blocking_recv().map_err(|_| ShareError::Aborted)
    }
}

/// Worker side of a refresh task.
#[derive(Debug)]
pub struct RefreshJob {
    pub targets: Vec<RefreshTarget>,
    pub cancel: CancellationToken,
    pub progress: Arc<RefreshProgress>,
    state: watch::Sender<RefreshState>,
    report: oneshot::Sender<RefreshReport>,
}

impl RefreshJob {
    /// Creates a queued job and the handle that observes it.
    pub fn new(targets: Vec<RefreshTarget>, cancel: CancellationToken) -> (Self, RefreshHandle) {
        let (state_tx, state_rx) = watch::channel(RefreshState::Queued);
        let (report_tx, report_rx) = oneshot::channel();
        let progress = Arc::new(RefreshProgress::default());
        let job = Self {
            targets,
            cancel: cancel.clone(),
            progress: progress.clone(),
            state: state_tx,
            report: report_tx,
        };
        let handle = RefreshHandle {
            state: state_rx,
            report: report_rx,
            progress,
            cancel,
        };
        (job, handle)
    }

    pub fn set_state(&self, state: RefreshState) {
        self.progress.state.store(state as u8, Ordering::Relaxed);
        if state.is_finished() {
            self.progress
                .finished_at
                .store(unix_now_secs(), Ordering::Relaxed);
        }
        self.state.send_replace(state);
    }

    /// Publishes the final report. The handle may already be gone.
    pub fn complete(self, report: RefreshReport) {
        self.set_state(report.state);
        let _ = self.report.send(report);
    }
}

/// Shared state a refresh reads and writes.
pub struct RefreshEnv<'a> {
    pub data: &'a RwLock<ShareIndexData>,
    pub filter: &'a EntryFilter,
    pub hasher: &'a dyn HashProvider,
    pub queue: &'a dyn DownloadQueue,
    pub bloom_rebuild_ratio: f64,
}

/// Runs one refresh to completion on the calling thread.
///
/// Scanning happens without any lock, diffing under the shared lock and
/// splicing under the exclusive lock. The live tree is untouched unless the
/// task reaches `Splicing`.
pub fn run_refresh(env: &RefreshEnv<'_>, job: &RefreshJob) -> RefreshReport {
    let started = Instant::now();
    job.progress.reset(unix_now_secs());
    let mut report = RefreshReport::finished(RefreshState::Done, job.targets.len());
    let aborted = |mut report: RefreshReport| {
        log::info!("refresh aborted roots={}", report.roots);
        report.state = RefreshState::Aborted;
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        report
    };

    log::info!("refresh started roots={}", job.targets.len());
    job.set_state(RefreshState::Scanning);
    let ctx = ScanContext {
        filter: env.filter,
        hasher: env.hasher,
        queue: env.queue,
        cancel: &job.cancel,
        progress: &job.progress,
    };
    let mut scanned: Vec<(&RefreshTarget, ScanOutcome)> = Vec::with_capacity(job.targets.len());
    for target in &job.targets {
        match scan_path(&target.path, &ctx) {
            None => return aborted(report),
            Some(Ok(ScanOutcome::Missing)) if target.is_root() => {
                log::warn!("refresh root missing path={}", target.path.display());
                report.failed_roots += 1;
            }
            Some(Ok(outcome)) => scanned.push((target, outcome)),
            Some(Err(err)) => {
                log::warn!(
                    "refresh target failed path={} error={}",
                    target.path.display(),
                    err
                );
                report.failed_roots += 1;
                report.error.get_or_insert_with(|| err.to_string());
            }
        }
    }
    if scanned.is_empty() && !job.targets.is_empty() {
        report.state = RefreshState::Failed;
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        log::warn!("refresh failed roots={}", report.roots);
        return report;
    }
    if job.cancel.is_cancelled().is_none() {
        return aborted(report);
    }

    job.set_state(RefreshState::Diffing);
    let (plans, touched) = {
        let data = env.data.read();
        build_plans(&data, scanned)
    };
    if job.cancel.is_cancelled().is_none() {
        return aborted(report);
    }

    job.set_state(RefreshState::Splicing);
    {
        let mut data = env.data.write();
        if job.cancel.is_cancelled().is_none() {
            return aborted(report);
        }
        let summary = apply_plans(&mut data.tree, plans, env.bloom_rebuild_ratio);
        report.added = summary.added;
        report.removed = summary.removed;
        report.updated = summary.updated;
        report.bloom_rebuilt = summary.bloom_rebuilt;

        let now = unix_now_secs();
        let mut profiles = ProfileSet::new();
        for root in touched {
            if let Ok(share_root) = data.root(root) {
                profiles.extend(&share_root.profiles);
            }
            data.set_last_refresh_time(root, now);
        }
        data.mark_dirty(&profiles);
    }

    report.elapsed_ms = started.elapsed().as_millis() as u64;
    log::info!(
        "refresh finished roots={} added={} removed={} updated={} elapsed_ms={}",
        report.roots,
        report.added,
        report.removed,
        report.updated,
        report.elapsed_ms
    );
    report
}

/// Diffs every scanned target. Returns the plans and the roots they touch.
fn build_plans(
    data: &ShareIndexData,
    scanned: Vec<(&RefreshTarget, ScanOutcome)>,
) -> (Vec<SplicePlan>, Vec<DirId>) {
    let mut plans = Vec::with_capacity(scanned.len());
    let mut touched = Vec::with_capacity(scanned.len());
    for (target, outcome) in scanned {
        let plan = match outcome {
            ScanOutcome::Scanned(directory) => refresh_plan(data, target, directory),
            ScanOutcome::Missing => plan_removal(&data.tree, target.root, target.relative()),
        };
        if !touched.contains(&target.root) {
            touched.push(target.root);
        }
        if let Some(plan) = plan.filter(|plan| !plan.is_empty()) {
            plans.push(plan);
        }
    }
    (plans, touched)
}

fn refresh_plan(
    data: &ShareIndexData,
    target: &RefreshTarget,
    directory: ScannedDirectory,
) -> Option<SplicePlan> {
    let plan = plan_refresh(&data.tree, target.root, target.relative(), directory);
    if plan.is_none() {
        log::debug!("refresh root removed while scanning path={}", target.root_path.display());
    }
    plan
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::config::ShareSettings;
    use crate::profile::ProfileSet;
    use crate::refresh::collaborators::{HashLookup, NoDownloads};
    use crate::types::ContentHash;

    struct SizeHasher;

    impl HashProvider for SizeHasher {
        fn hash_lookup(&self, _path: &Path, size: u64, _last_write: u64) -> HashLookup {
            let mut bytes = [0u8; 24];
            bytes[..8].copy_from_slice(&size.to_le_bytes());
            HashLookup::Known(ContentHash::new(bytes))
        }
    }

    fn setup() -> (TempDir, RwLock<ShareIndexData>, DirId) {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("docs")).unwrap();
        fs::write(temp.path().join("docs/a.txt"), b"abc").unwrap();
        fs::write(temp.path().join("b.bin"), b"12345").unwrap();

        let mut data = ShareIndexData::new();
        let root = data
            .add_root(temp.path().to_path_buf(), "Share", ProfileSet::single(1), false, 0)
            .unwrap();
        data.take_dirty_profiles();
        (temp, RwLock::new(data), root)
    }

    fn run(data: &RwLock<ShareIndexData>, scope: RefreshScope, cancel: CancellationToken) -> RefreshReport {
        let filter = EntryFilter::compile(&ShareSettings::default()).unwrap();
        let targets = scope.targets(&data.read()).unwrap();
        let (job, handle) = RefreshJob::new(targets, cancel);
        let env = RefreshEnv {
            data,
            filter: &filter,
            hasher: &SizeHasher,
            queue: &NoDownloads,
            bloom_rebuild_ratio: 0.2,
        };
        let report = run_refresh(&env, &job);
        job.complete(report);
        assert!(handle.state().is_finished());
        handle.wait().unwrap()
    }

    #[test]
    fn state_round_trips_through_atomic() {
        let atomic = AtomicU8::new(RefreshState::Splicing as u8);
        assert_eq!(RefreshState::load(&atomic), RefreshState::Splicing);
        assert_eq!(RefreshState::Splicing.as_str(), "splicing");
        assert!(!RefreshState::Diffing.is_finished());
    }

    #[test]
    fn full_refresh_indexes_and_is_idempotent() {
        let (_temp, data, root) = setup();
        let report = run(&data, RefreshScope::All, CancellationToken::new());
        assert_eq!(report.state, RefreshState::Done);
        assert_eq!(report.added, 3);
        {
            let data = data.read();
            assert_eq!(data.tree().total_size(root), 8);
            assert!(data.is_profile_dirty(1));
            assert!(data.root(root).unwrap().last_refresh_time > 0);
        }

        let report = run(&data, RefreshScope::All, CancellationToken::new());
        assert_eq!((report.added, report.removed, report.updated), (0, 0, 0));
        let data = data.read();
        assert_eq!(data.tree().total_size(root), 8);
        assert_eq!(data.tree().file_count(root), 2);
        assert_eq!(data.tree().dir_count(root), 1);
    }

    #[test]
    fn cancelled_refresh_leaves_tree_untouched() {
        let (_temp, data, root) = setup();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = run(&data, RefreshScope::All, cancel);
        assert_eq!(report.state, RefreshState::Aborted);
        assert_eq!(data.read().tree().file_count(root), 0);
    }

    #[test]
    fn path_refresh_only_touches_the_subtree() {
        let (temp, data, root) = setup();
        run(&data, RefreshScope::All, CancellationToken::new());

        fs::write(temp.path().join("docs/new.txt"), b"1234567").unwrap();
        fs::write(temp.path().join("outside.txt"), b"1").unwrap();
        let report = run(
            &data,
            RefreshScope::Paths(vec![temp.path().join("docs")]),
            CancellationToken::new(),
        );
        assert_eq!(report.added, 1);
        let data = data.read();
        assert_eq!(data.tree().total_size(root), 15);
        assert!(data
            .tree()
            .find_file(root, "outside.txt")
            .is_none());
    }

    #[test]
    fn removed_subdirectory_is_dropped() {
        let (temp, data, root) = setup();
        run(&data, RefreshScope::All, CancellationToken::new());
        fs::remove_dir_all(temp.path().join("docs")).unwrap();

        run(
            &data,
            RefreshScope::Paths(vec![temp.path().join("docs")]),
            CancellationToken::new(),
        );
        let data = data.read();
        assert!(data.tree().find_directory(root, "docs").is_none());
        assert_eq!(data.tree().total_size(root), 5);
    }

    #[test]
    fn paths_outside_roots_are_rejected() {
        let (_temp, data, _root) = setup();
        let other = TempDir::new().unwrap();
        let err = RefreshScope::Paths(vec![other.path().to_path_buf()])
            .targets(&data.read())
            .unwrap_err();
        assert!(matches!(err, ShareError::NotFound(_)));
    }

    #[test]
    fn incoming_scope_selects_flagged_roots() {
        let (_temp, data, _root) = setup();
        assert!(RefreshScope::Incoming.targets(&data.read()).unwrap().is_empty());
        assert_eq!(RefreshScope::All.targets(&data.read()).unwrap().len(), 1);
    }
}
