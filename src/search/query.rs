//! Search query model and the plain-text query parser.

use chrono::{DateTime, Utc};

use crate::error::{Result, ShareError};
use crate::tree::FileCategory;
use crate::types::ContentHash;

/// How include terms are matched against names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchMode {
    /// Terms matched by a directory name are not required again below it.
    #[default]
    PathConsume,
    /// Like `PathConsume`, but results are ranked and terms of two characters
    /// or less are never consumed by a directory name.
    PathPartial,
    /// Every term must match the item's own name.
    NameOnly,
    /// The item's name must equal the single include term.
    NameExact,
}

impl MatchMode {
    pub fn consumes_terms(self) -> bool {
        matches!(self, Self::PathConsume | Self::PathPartial)
    }
}

/// Which kinds of items a search may return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ItemType {
    #[default]
    Any,
    File,
    Directory,
}

impl ItemType {
    pub fn allows_files(self) -> bool {
        !matches!(self, Self::Directory)
    }

    pub fn allows_directories(self) -> bool {
        !matches!(self, Self::File)
    }
}

/// A structured search request.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Substrings every result must contain (AND).
    pub include: Vec<String>,
    /// Substrings that reject an item, and for directories its whole subtree.
    pub exclude: Vec<String>,
    /// Exact content lookup. Every other criterion is ignored when set.
    pub hash: Option<ContentHash>,
    pub min_size: u64,
    pub max_size: u64,
    pub newer_than: Option<DateTime<Utc>>,
    pub older_than: Option<DateTime<Utc>>,
    pub file_type: Option<FileCategory>,
    pub item_type: ItemType,
    /// Allowed extensions without the leading dot. Empty allows all.
    pub extensions: Vec<String>,
    pub excluded_extensions: Vec<String>,
    pub match_mode: MatchMode,
    /// Virtual directory path the search is limited to, e.g. `/Music/Rock/`.
    pub root: Option<String>,
    /// Key of the peer searching, used for temporary shares.
    pub requester: Option<String>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            hash: None,
            min_size: 0,
            max_size: u64::MAX,
            newer_than: None,
            older_than: None,
            file_type: None,
            item_type: ItemType::Any,
            extensions: Vec::new(),
            excluded_extensions: Vec::new(),
            match_mode: MatchMode::PathConsume,
            root: None,
            requester: None,
        }
    }
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_hash(hash: ContentHash) -> Self {
        Self {
            hash: Some(hash),
            ..Self::default()
        }
    }

    /// Parses whitespace separated words.
    ///
    /// `-word` excludes, `type:` takes a category or `file`/`directory`,
    /// `ext:` adds an allowed extension and `-ext:` a denied one.
    pub fn parse(text: &str) -> Result<Self> {
        let mut query = Self::default();
        for word in text.split_whitespace() {
            if let Some(value) = word.strip_prefix("type:") {
                query.apply_type(value)?;
            } else if let Some(value) = word.strip_prefix("-ext:") {
                query.excluded_extensions.push(normalize_extension(value));
            } else if let Some(value) = word.strip_prefix("ext:") {
                query.extensions.push(normalize_extension(value));
            } else if let Some(term) = word.strip_prefix('-') {
                if !term.is_empty() {
                    query.exclude.push(term.to_string());
                }
            } else {
                query.include.push(word.to_string());
            }
        }
        Ok(query)
    }

    fn apply_type(&mut self, value: &str) -> Result<()> {
        let value = value.to_lowercase();
        match value.as_str() {
            "file" | "files" => self.item_type = ItemType::File,
            "dir" | "directory" | "folder" => self.item_type = ItemType::Directory,
            other => {
                self.file_type = Some(FileCategory::lookup(other).ok_or_else(|| {
                    ShareError::InvalidInput(format!("unknown type filter: {other}"))
                })?);
            }
        }
        Ok(())
    }

    pub fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }

    pub fn with_root(mut self, root: &str) -> Self {
        self.root = Some(root.to_string());
        self
    }

    pub fn with_item_type(mut self, item_type: ItemType) -> Self {
        self.item_type = item_type;
        self
    }

    /// True when size bounds narrow the result set.
    pub fn has_size_bounds(&self) -> bool {
        self.min_size > 0 || self.max_size < u64::MAX
    }
}

/// Lowercases an extension and strips a leading dot.
pub fn normalize_extension(value: &str) -> String {
    value.trim_start_matches('.').to_lowercase()
}
