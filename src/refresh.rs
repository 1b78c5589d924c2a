//! Incremental refresh of shared roots.
//!
//! A refresh moves through `Queued → Scanning → Diffing → Splicing` and ends
//! in `Done`, `Failed` or `Aborted`:
//!
//! - scanning walks the requested subtrees into detached fragments with no
//!   lock held, asking the hash provider for every file;
//! - diffing compares each fragment with the live tree under the shared lock
//!   and records the changes as a plan;
//! - splicing applies all plans in one exclusive section and decides whether
//!   the name bloom filter is merged or rebuilt.
//!
//! Cancellation is honoured up to the moment the exclusive lock is held, so
//! an aborted refresh never leaves a partial change behind.

mod collaborators;
mod paths;
mod plan;
mod scan;
mod splice;
mod task;

pub use collaborators::{DownloadQueue, HashLookup, HashProvider, NoDownloads};
pub use paths::coalesce_refresh_paths;
pub use plan::{plan_refresh, plan_removal, SpliceOp, SplicePlan};
pub use scan::{scan_path, ScanContext, ScanOutcome, ScannedDirectory, ScannedFile};
pub use splice::{apply_plans, SpliceSummary};
pub use task::{
    run_refresh, RefreshEnv, RefreshHandle, RefreshJob, RefreshProgress, RefreshProgressSnapshot,
    RefreshReport, RefreshScope, RefreshState, RefreshTarget,
};
