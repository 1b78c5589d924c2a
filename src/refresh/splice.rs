//! Applying refresh plans to the live tree.

use super::plan::{SpliceOp, SplicePlan};
use super::scan::ScannedDirectory;
use crate::error::{Result, ShareError};
use crate::tree::{DirId, ShareTree};

/// What a splice changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpliceSummary {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
    /// Operations dropped because their target vanished after diffing.
    pub skipped: usize,
    pub bloom_rebuilt: bool,
}

/// Applies `plans` under the exclusive lock.
///
/// The name bloom filter is rebuilt when the changed names exceed
/// `rebuild_ratio` of the names it tracks; otherwise the plans' own filters
/// are merged in.
pub fn apply_plans(tree: &mut ShareTree, plans: Vec<SplicePlan>, rebuild_ratio: f64) -> SpliceSummary {
    let mut summary = SpliceSummary::default();
    let changed: usize = plans.iter().map(SplicePlan::changed_names).sum();
    let rebuild = changed as f64 > rebuild_ratio * tree.bloom().tracked_names() as f64;

    let mut blooms = Vec::with_capacity(plans.len());
    for plan in plans {
        if tree.directory(plan.root).is_none() {
            log::debug!("refresh splice skipped removed root={:?}", plan.root);
            summary.skipped += plan.ops.len();
            continue;
        }
        summary.added += plan.added_names;
        summary.removed += plan.removed_names;
        summary.updated += plan.updated_files;
        for op in plan.ops {
            if !apply_op(tree, op) {
                summary.skipped += 1;
            }
        }
        blooms.push(plan.bloom);
    }

    if rebuild {
        tree.rebuild_bloom();
        summary.bloom_rebuilt = true;
        log::info!(
            "name bloom rebuilt changed={} tracked={} fill={:.3}",
            changed,
            tree.bloom().tracked_names(),
            tree.bloom().fill_ratio()
        );
    } else {
        for bloom in &blooms {
            tree.merge_bloom(bloom);
        }
    }
    summary
}

/// Returns false when the operation no longer applies.
fn apply_op(tree: &mut ShareTree, op: SpliceOp) -> bool {
    match op {
        SpliceOp::RemoveDir(dir) => {
            let removable = tree.directory(dir).is_some_and(|node| !node.is_root());
            removable && tree.remove_subtree(dir) > 0
        }
        SpliceOp::RemoveFile(file) => tree.remove_file(file),
        SpliceOp::AddDir { parent, directory } => match link_fragment(tree, parent, directory) {
            Ok(_) => true,
            Err(err) => {
                log::debug!("refresh splice skipped directory parent={parent:?} error={err}");
                false
            }
        },
        SpliceOp::AddFile { parent, file } => tree
            .link_file(parent, &file.name, file.size, file.hash, file.last_write)
            .is_ok(),
        SpliceOp::UpdateFile {
            file,
            size,
            hash,
            last_write,
        } => tree.update_file(file, size, hash, last_write).is_ok(),
        SpliceOp::TouchDir { dir, last_write } => {
            if tree.directory(dir).is_none() {
                return false;
            }
            tree.set_last_write(dir, last_write);
            true
        }
    }
}

/// Links a scanned fragment below `parent`.
///
/// A directory that already exists under the same lowercase name is
/// replaced as a whole.
fn link_fragment(tree: &mut ShareTree, parent: DirId, directory: ScannedDirectory) -> Result<DirId> {
    let dir = match tree.link_directory(parent, &directory.name, directory.last_write) {
        Ok(dir) => dir,
        Err(ShareError::DuplicateName(_)) => {
            let lower = directory.name.to_lowercase();
            if let Some(existing) = tree.find_directory(parent, &lower) {
                tree.remove_subtree(existing);
            }
            tree.link_directory(parent, &directory.name, directory.last_write)?
        }
        Err(err) => return Err(err),
    };

    for file in directory.files {
        tree.link_file(dir, &file.name, file.size, file.hash, file.last_write)?;
    }
    for child in directory.directories {
        link_fragment(tree, dir, child)?;
    }
    Ok(dir)
}
