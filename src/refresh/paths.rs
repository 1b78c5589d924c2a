//! Reduction of requested refresh paths to a minimal set of subtrees.

use std::path::{Path, PathBuf};

use fnv::FnvHashSet;

/// Coalesces paths so no selected path is inside another.
///
/// Shallow paths win; duplicates collapse. The result is ordered by depth,
/// then by path.
pub fn coalesce_refresh_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    if paths.len() <= 1 {
        return paths;
    }

    let mut candidates: Vec<(PathBuf, usize)> = paths
        .into_iter()
        .map(|path| {
            let depth = path.components().count();
            (path, depth)
        })
        .collect();
    candidates.sort_unstable_by(|(path_a, depth_a), (path_b, depth_b)| {
        depth_a.cmp(depth_b).then_with(|| path_a.cmp(path_b))
    });
    candidates.dedup_by(|(path_a, _), (path_b, _)| path_a == path_b);

    let mut selected = Vec::with_capacity(candidates.len());
    let mut selected_set = FnvHashSet::default();
    for (path, _) in candidates {
        if has_selected_ancestor(&path, &selected_set) {
            continue;
        }
        selected_set.insert(path.clone());
        selected.push(path);
    }
    selected
}

fn has_selected_ancestor(path: &Path, selected: &FnvHashSet<PathBuf>) -> bool {
    path.ancestors()
        .skip(1)
        .any(|ancestor| selected.contains(ancestor))
}
