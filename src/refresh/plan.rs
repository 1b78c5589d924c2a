//! Diffing scanned fragments against the live tree.
//!
//! The diff runs under the shared lock and produces a list of operations
//! that the splice applies under the exclusive lock. Handles in the plan
//! are generation checked, so operations on nodes removed in between are
//! skipped instead of touching reused slots.

use std::cmp::Ordering;
use std::path::Path;

use super::scan::{ScannedDirectory, ScannedFile};
use crate::indices::NameBloom;
use crate::tree::{DirId, FileId, ShareTree};

#[derive(Debug)]
pub enum SpliceOp {
    RemoveDir(DirId),
    RemoveFile(FileId),
    AddDir {
        parent: DirId,
        directory: ScannedDirectory,
    },
    AddFile {
        parent: DirId,
        file: ScannedFile,
    },
    UpdateFile {
        file: FileId,
        size: u64,
        hash: crate::types::ContentHash,
        last_write: u64,
    },
    TouchDir {
        dir: DirId,
        last_write: u64,
    },
}

/// Changes for one refreshed subtree.
#[derive(Debug)]
pub struct SplicePlan {
    pub root: DirId,
    pub ops: Vec<SpliceOp>,
    /// Names of every added node, merged into the live filter on splice.
    pub bloom: NameBloom,
    pub added_names: usize,
    pub removed_names: usize,
    pub updated_files: usize,
}

impl SplicePlan {
    fn new(root: DirId) -> Self {
        Self {
            root,
            ops: Vec::new(),
            bloom: NameBloom::new(),
            added_names: 0,
            removed_names: 0,
            updated_files: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn changed_names(&self) -> usize {
        self.added_names + self.removed_names
    }
}

/// Diffs a scanned directory against the tree directory at `relative`
/// below `root`.
///
/// Missing intermediate directories are created by wrapping the fragment
/// in its parent chain. Returns `None` if `root` is gone.
pub fn plan_refresh(
    tree: &ShareTree,
    root: DirId,
    relative: &Path,
    scanned: ScannedDirectory,
) -> Option<SplicePlan> {
    let mut plan = SplicePlan::new(root);
    let names: Vec<String> = relative
        .iter()
        .map(|part| part.to_string_lossy().into_owned())
        .collect();

    let mut dir = root;
    tree.directory(dir)?;
    for (depth, name) in names.iter().enumerate() {
        match tree.find_directory(dir, &name.to_lowercase()) {
            Some(child) if tree.directory(child).map(|node| node.name()) == Some(name.as_str()) => {
                dir = child;
            }
            existing => {
                if let Some(stale) = existing {
                    plan.remove_dir(tree, stale);
                }
                let fragment = wrap_in_parents(&names[depth..], scanned);
                plan.add_dir(dir, fragment);
                return Some(plan);
            }
        }
    }

    plan.diff_directory(tree, dir, scanned);
    Some(plan)
}

/// Plans the removal of a directory that vanished from disk.
pub fn plan_removal(tree: &ShareTree, root: DirId, relative: &Path) -> Option<SplicePlan> {
    let mut dir = root;
    for part in relative.iter() {
        dir = tree.find_directory(dir, &part.to_string_lossy().to_lowercase())?;
    }
    if dir == root {
        return None;
    }
    let mut plan = SplicePlan::new(root);
    plan.remove_dir(tree, dir);
    Some(plan)
}

/// Nests `scanned` inside directories named by `names`. The last name is
/// the fragment itself.
fn wrap_in_parents(names: &[String], mut scanned: ScannedDirectory) -> ScannedDirectory {
    let Some((own_name, parents)) = names.split_last() else {
        return scanned;
    };
    scanned.name = own_name.clone();
    for name in parents.iter().rev() {
        let mut parent = ScannedDirectory::new(name, scanned.last_write);
        parent.directories.push(scanned);
        scanned = parent;
    }
    scanned
}

impl SplicePlan {
    fn diff_directory(&mut self, tree: &ShareTree, dir: DirId, scanned: ScannedDirectory) {
        let Some(node) = tree.directory(dir) else {
            return;
        };
        if node.last_write() != scanned.last_write {
            self.ops.push(SpliceOp::TouchDir {
                dir,
                last_write: scanned.last_write,
            });
        }

        let mut existing = node.directories().iter().copied().peekable();
        let mut found = scanned.directories.into_iter().peekable();
        loop {
            let order = match (existing.peek(), found.peek()) {
                (None, None) => break,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(child), Some(candidate)) => tree
                    .directory(*child)
                    .map(|child_node| child_node.lower_name().cmp(&candidate.name.to_lowercase()))
                    .unwrap_or(Ordering::Less),
            };
            match order {
                Ordering::Less => {
                    if let Some(child) = existing.next() {
                        self.remove_dir(tree, child);
                    }
                }
                Ordering::Greater => {
                    if let Some(candidate) = found.next() {
                        self.add_dir(dir, candidate);
                    }
                }
                Ordering::Equal => {
                    let (Some(child), Some(candidate)) = (existing.next(), found.next()) else {
                        break;
                    };
                    let same_case = tree
                        .directory(child)
                        .is_some_and(|child_node| child_node.name() == candidate.name);
                    if same_case {
                        self.diff_directory(tree, child, candidate);
                    } else {
                        self.remove_dir(tree, child);
                        self.add_dir(dir, candidate);
                    }
                }
            }
        }

        let mut existing = node.files().iter().copied().peekable();
        let mut found = scanned.files.into_iter().peekable();
        loop {
            let order = match (existing.peek(), found.peek()) {
                (None, None) => break,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(file), Some(candidate)) => tree
                    .file(*file)
                    .map(|file_node| file_node.lower_name().cmp(&candidate.name.to_lowercase()))
                    .unwrap_or(Ordering::Less),
            };
            match order {
                Ordering::Less => {
                    if let Some(file) = existing.next() {
                        self.removed_names += 1;
                        self.ops.push(SpliceOp::RemoveFile(file));
                    }
                }
                Ordering::Greater => {
                    if let Some(candidate) = found.next() {
                        self.add_file(dir, candidate);
                    }
                }
                Ordering::Equal => {
                    let (Some(file), Some(candidate)) = (existing.next(), found.next()) else {
                        break;
                    };
                    let Some(file_node) = tree.file(file) else {
                        continue;
                    };
                    if file_node.name() != candidate.name {
                        // Case change: the insert replaces the old entry.
                        self.removed_names += 1;
                        self.add_file(dir, candidate);
                    } else if file_node.size() != candidate.size
                        || file_node.hash() != candidate.hash
                        || file_node.last_write() != candidate.last_write
                    {
                        self.updated_files += 1;
                        self.ops.push(SpliceOp::UpdateFile {
                            file,
                            size: candidate.size,
                            hash: candidate.hash,
                            last_write: candidate.last_write,
                        });
                    }
                }
            }
        }
    }

    fn remove_dir(&mut self, tree: &ShareTree, dir: DirId) {
        self.removed_names += 1 + tree.dir_count(dir) + tree.file_count(dir);
        self.ops.push(SpliceOp::RemoveDir(dir));
    }

    fn add_dir(&mut self, parent: DirId, directory: ScannedDirectory) {
        self.added_names += directory.name_count();
        add_fragment_names(&mut self.bloom, &directory);
        self.ops.push(SpliceOp::AddDir { parent, directory });
    }

    fn add_file(&mut self, parent: DirId, file: ScannedFile) {
        self.added_names += 1;
        self.bloom.add(&file.name.to_lowercase());
        self.ops.push(SpliceOp::AddFile { parent, file });
    }
}

fn add_fragment_names(bloom: &mut NameBloom, directory: &ScannedDirectory) {
    bloom.add(&directory.name.to_lowercase());
    for file in &directory.files {
        bloom.add(&file.name.to_lowercase());
    }
    for child in &directory.directories {
        add_fragment_names(bloom, child);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::profile::ProfileSet;
    use crate::tree::ShareRoot;
    use crate::types::ContentHash;

    fn hash(byte: u8) -> ContentHash {
        ContentHash::new([byte; 24])
    }

    fn file(name: &str, size: u64, byte: u8) -> ScannedFile {
        ScannedFile {
            name: name.to_string(),
            size,
            hash: hash(byte),
            last_write: 1,
        }
    }

    fn tree_with_root() -> (ShareTree, DirId) {
        let mut tree = ShareTree::new();
        let root = tree.create_root(
            ShareRoot::new(PathBuf::from("/s"), "S", ProfileSet::single(0), false),
            1,
        );
        (tree, root)
    }

    #[test]
    fn unchanged_fragment_plans_nothing() {
        let (mut tree, root) = tree_with_root();
        let sub = tree.insert_directory(root, "sub", 1).unwrap();
        tree.insert_file(sub, "a.txt", 3, hash(1), 1).unwrap();

        let mut scanned = ScannedDirectory::new("s", 1);
        let mut scanned_sub = ScannedDirectory::new("sub", 1);
        scanned_sub.files.push(file("a.txt", 3, 1));
        scanned.directories.push(scanned_sub);

        let plan = plan_refresh(&tree, root, Path::new(""), scanned).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.changed_names(), 0);
    }

    #[test]
    fn additions_removals_and_updates() {
        let (mut tree, root) = tree_with_root();
        let old = tree.insert_directory(root, "old", 1).unwrap();
        tree.insert_file(old, "x", 1, hash(1), 1).unwrap();
        let kept = tree.insert_file(root, "kept.txt", 1, hash(2), 1).unwrap();

        let mut scanned = ScannedDirectory::new("s", 1);
        scanned.directories.push(ScannedDirectory::new("new", 1));
        scanned.files.push(file("fresh.txt", 4, 3));
        scanned.files.push(file("kept.txt", 2, 4));

        let plan = plan_refresh(&tree, root, Path::new(""), scanned).unwrap();
        assert!(plan
            .ops
            .iter()
            .any(|op| matches!(op, SpliceOp::RemoveDir(dir) if *dir == old)));
        assert!(plan
            .ops
            .iter()
            .any(|op| matches!(op, SpliceOp::AddDir { directory, .. } if directory.name == "new")));
        assert!(plan
            .ops
            .iter()
            .any(|op| matches!(op, SpliceOp::UpdateFile { file, size: 2, .. } if *file == kept)));
        assert_eq!(plan.removed_names, 2);
        assert_eq!(plan.added_names, 2);
        assert_eq!(plan.updated_files, 1);
        assert!(plan.bloom.matches("fresh"));
    }

    #[test]
    fn case_changes_replace_the_node() {
        let (mut tree, root) = tree_with_root();
        let dir = tree.insert_directory(root, "photos", 1).unwrap();

        let mut scanned = ScannedDirectory::new("s", 1);
        scanned.directories.push(ScannedDirectory::new("Photos", 1));
        let plan = plan_refresh(&tree, root, Path::new(""), scanned).unwrap();

        assert!(matches!(plan.ops[0], SpliceOp::RemoveDir(removed) if removed == dir));
        assert!(matches!(&plan.ops[1], SpliceOp::AddDir { directory, .. } if directory.name == "Photos"));
    }

    #[test]
    fn missing_parents_are_wrapped() {
        let (tree, root) = tree_with_root();
        let mut scanned = ScannedDirectory::new("c", 4);
        scanned.files.push(file("deep.txt", 1, 1));

        let plan = plan_refresh(&tree, root, Path::new("a/b/c"), scanned).unwrap();
        let SpliceOp::AddDir { parent, directory } = &plan.ops[0] else {
            panic!("expected an added directory");
        };
        assert_eq!(*parent, root);
        assert_eq!(directory.name, "a");
        assert_eq!(directory.directories[0].name, "b");
        assert_eq!(directory.directories[0].directories[0].name, "c");
        assert_eq!(directory.file_count(), 1);
    }

    #[test]
    fn vanished_subdirectories_are_removed() {
        let (mut tree, root) = tree_with_root();
        let a = tree.insert_directory(root, "a", 1).unwrap();
        let plan = plan_removal(&tree, root, Path::new("a")).unwrap();
        assert!(matches!(plan.ops[0], SpliceOp::RemoveDir(dir) if dir == a));
        assert!(plan_removal(&tree, root, Path::new("missing")).is_none());
        assert!(plan_removal(&tree, root, Path::new("")).is_none());
    }
}
