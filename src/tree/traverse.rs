//! Depth-first traversal of a subtree into an entry sink.
//!
//! Serializers (cache files, peer file lists) implement
//! [`DirectoryEntrySink`]; the tree drives it while the caller holds the
//! shared lock.

use super::node::DirId;
use super::share_tree::ShareTree;
use crate::error::Result;
use crate::types::ContentHash;

/// A file as handed to a sink.
#[derive(Debug, Clone, Copy)]
pub struct FileEntryRef<'a> {
    pub name: &'a str,
    pub size: u64,
    pub hash: ContentHash,
    pub last_write: u64,
}

/// Receives a subtree in depth-first order.
///
/// Each directory produces `start_directory`, then its child directories,
/// then its files, then `end_directory`.
pub trait DirectoryEntrySink {
    fn start_directory(&mut self, name: &str, last_write: u64) -> Result<()>;

    fn write_file(&mut self, file: FileEntryRef<'_>) -> Result<()>;

    fn end_directory(&mut self) -> Result<()>;

    /// A directory whose contents are not written because the walk is not
    /// recursive. Sinks that mark such entries can override this.
    fn incomplete_directory(&mut self, name: &str, last_write: u64, _total_size: u64) -> Result<()> {
        self.start_directory(name, last_write)?;
        self.end_directory()
    }
}

impl ShareTree {
    /// Writes `dir` itself, named by its virtual name, and everything below it.
    pub fn write_directory(&self, dir: DirId, sink: &mut dyn DirectoryEntrySink) -> Result<()> {
        let Some(node) = self.directory(dir) else {
            return Ok(());
        };
        sink.start_directory(node.virtual_name(), node.last_write())?;
        self.write_contents(dir, true, sink)?;
        sink.end_directory()
    }

    /// Writes the children and files of `dir` without wrapping them in an
    /// entry for `dir`. Child directories are written as incomplete entries
    /// unless `recursive` is set.
    pub fn write_contents(
        &self,
        dir: DirId,
        recursive: bool,
        sink: &mut dyn DirectoryEntrySink,
    ) -> Result<()> {
        let Some(node) = self.directory(dir) else {
            return Ok(());
        };
        for child in node.directories() {
            if recursive {
                self.write_directory(*child, sink)?;
            } else if let Some(child_node) = self.directory(*child) {
                sink.incomplete_directory(
                    child_node.name(),
                    child_node.last_write(),
                    self.total_size(*child),
                )?;
            }
        }
        for file in node.files() {
            if let Some(file_node) = self.file(*file) {
                sink.write_file(FileEntryRef {
                    name: file_node.name(),
                    size: file_node.size(),
                    hash: file_node.hash(),
                    last_write: file_node.last_write(),
                })?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::profile::ProfileSet;
    use crate::tree::ShareRoot;

    /// Records sink calls as readable strings.
    #[derive(Default)]
    struct RecordingSink {
        events: Vec<String>,
    }

    impl DirectoryEntrySink for RecordingSink {
        fn start_directory(&mut self, name: &str, _last_write: u64) -> Result<()> {
            self.events.push(format!("start {name}"));
            Ok(())
        }

        fn write_file(&mut self, file: FileEntryRef<'_>) -> Result<()> {
            self.events.push(format!("file {} {}", file.name, file.size));
            Ok(())
        }

        fn end_directory(&mut self) -> Result<()> {
            self.events.push("end".to_string());
            Ok(())
        }

        fn incomplete_directory(&mut self, name: &str, _last_write: u64, total_size: u64) -> Result<()> {
            self.events.push(format!("incomplete {name} {total_size}"));
            Ok(())
        }
    }

    fn sample_tree() -> (ShareTree, DirId) {
        let mut tree = ShareTree::new();
        let root = tree.create_root(
            ShareRoot::new(PathBuf::from("/srv/share"), "Share", ProfileSet::single(0), false),
            0,
        );
        let sub = tree.insert_directory(root, "sub", 0).unwrap();
        tree.insert_file(sub, "inner.txt", 3, ContentHash::new([1; 24]), 0)
            .unwrap();
        tree.insert_file(root, "top.txt", 5, ContentHash::new([2; 24]), 0)
            .unwrap();
        (tree, root)
    }

    #[test]
    fn recursive_walk_is_depth_first() {
        let (tree, root) = sample_tree();
        let mut sink = RecordingSink::default();
        tree.write_directory(root, &mut sink).unwrap();
        assert_eq!(
            sink.events,
            vec![
                "start Share",
                "start sub",
                "file inner.txt 3",
                "end",
                "file top.txt 5",
                "end",
            ]
        );
    }

    #[test]
    fn shallow_walk_marks_children_incomplete() {
        let (tree, root) = sample_tree();
        let mut sink = RecordingSink::default();
        tree.write_contents(root, false, &mut sink).unwrap();
        assert_eq!(sink.events, vec!["incomplete sub 3", "file top.txt 5"]);
    }
}
