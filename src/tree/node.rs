//! Directory and file nodes stored in the share tree arenas.

use std::path::PathBuf;

use thin_vec::ThinVec;

use super::content_type::ContentTypes;
use crate::profile::ProfileSet;
use crate::storage::SlotId;
use crate::types::ContentHash;

pub type DirId = SlotId<DirectoryNode>;
pub type FileId = SlotId<FileNode>;

/// A name kept in its original case plus a lowercase form.
///
/// The lowercase copy is only allocated when it differs from the original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DualName {
    name: Box<str>,
    lower: Option<Box<str>>,
}

impl DualName {
    pub fn new(name: &str) -> Self {
        let lower = name.to_lowercase();
        Self {
            name: name.into(),
            lower: (lower != name).then(|| lower.into_boxed_str()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lower(&self) -> &str {
        self.lower.as_deref().unwrap_or(&self.name)
    }

    /// True if the original contains no uppercase characters.
    pub fn lowercase_only(&self) -> bool {
        self.lower.is_none()
    }
}

/// Root-only data of a shared directory.
#[derive(Debug, Clone)]
pub struct ShareRoot {
    /// Real filesystem path of the root directory.
    pub path: PathBuf,
    virtual_name: DualName,
    pub profiles: ProfileSet,
    /// Roots flagged incoming receive finished downloads.
    pub incoming: bool,
    pub last_refresh_time: u64,
}

impl ShareRoot {
    pub fn new(path: PathBuf, virtual_name: &str, profiles: ProfileSet, incoming: bool) -> Self {
        Self {
            path,
            virtual_name: DualName::new(virtual_name),
            profiles,
            incoming,
            last_refresh_time: 0,
        }
    }

    pub fn virtual_name(&self) -> &str {
        self.virtual_name.name()
    }

    pub fn virtual_name_lower(&self) -> &str {
        self.virtual_name.lower()
    }

    pub(crate) fn set_virtual_name(&mut self, name: &str) {
        self.virtual_name = DualName::new(name);
    }
}

/// One directory of the share.
#[derive(Debug)]
pub struct DirectoryNode {
    pub(crate) name: DualName,
    pub(crate) parent: Option<DirId>,
    /// Child directories sorted by lowercase name.
    pub(crate) directories: ThinVec<DirId>,
    /// Files sorted by lowercase name.
    pub(crate) files: ThinVec<FileId>,
    /// Sum of the immediate files' sizes.
    pub(crate) size: u64,
    pub(crate) last_write: u64,
    pub(crate) content_types: ContentTypes,
    pub(crate) root: Option<Box<ShareRoot>>,
}

impl DirectoryNode {
    pub(crate) fn new(name: &str, parent: Option<DirId>, last_write: u64) -> Self {
        Self {
            name: DualName::new(name),
            parent,
            directories: ThinVec::new(),
            files: ThinVec::new(),
            size: 0,
            last_write,
            content_types: ContentTypes::empty(),
            root: None,
        }
    }

    /// Real directory name.
    pub fn name(&self) -> &str {
        self.name.name()
    }

    pub fn lower_name(&self) -> &str {
        self.name.lower()
    }

    /// Name as seen by peers: the root's virtual name for roots, the real
    /// name otherwise.
    pub fn virtual_name(&self) -> &str {
        match &self.root {
            Some(root) => root.virtual_name(),
            None => self.name.name(),
        }
    }

    pub fn virtual_name_lower(&self) -> &str {
        match &self.root {
            Some(root) => root.virtual_name_lower(),
            None => self.name.lower(),
        }
    }

    pub fn parent(&self) -> Option<DirId> {
        self.parent
    }

    pub fn directories(&self) -> &[DirId] {
        &self.directories
    }

    pub fn files(&self) -> &[FileId] {
        &self.files
    }

    pub fn own_size(&self) -> u64 {
        self.size
    }

    pub fn last_write(&self) -> u64 {
        self.last_write
    }

    pub fn content_types(&self) -> ContentTypes {
        self.content_types
    }

    pub fn root(&self) -> Option<&ShareRoot> {
        self.root.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.root.is_some()
    }
}

/// One shared file.
#[derive(Debug)]
pub struct FileNode {
    pub(crate) name: DualName,
    pub(crate) size: u64,
    pub(crate) hash: ContentHash,
    pub(crate) last_write: u64,
    pub(crate) parent: DirId,
}

impl FileNode {
    pub fn name(&self) -> &str {
        self.name.name()
    }

    pub fn lower_name(&self) -> &str {
        self.name.lower()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    pub fn last_write(&self) -> u64 {
        self.last_write
    }

    pub fn parent(&self) -> DirId {
        self.parent
    }

    pub(crate) fn lowercase_only(&self) -> bool {
        self.name.lowercase_only()
    }
}
