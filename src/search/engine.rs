//! Recursive search over the share tree.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use super::matcher::{QueryMatcher, Term};
use super::query::{MatchMode, SearchQuery};
use crate::data::ShareIndexData;
use crate::error::Result;
use crate::profile::ProfileFilter;
use crate::tree::{DirId, DirectoryNode, FileId, ShareTree};
use crate::types::ContentHash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    File,
    Directory,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub kind: ResultKind,
    /// Virtual path; directories end with `/`.
    pub adc_path: String,
    pub real_path: PathBuf,
    /// File size, or the total size below a directory.
    pub size: u64,
    pub hash: Option<ContentHash>,
    pub last_write: u64,
    pub score: f64,
}

impl SearchResult {
    pub(crate) fn file(tree: &ShareTree, file: FileId, score: f64) -> Option<Self> {
        let node = tree.file(file)?;
        Some(Self {
            kind: ResultKind::File,
            adc_path: tree.file_adc_path(file)?,
            real_path: tree.file_real_path(file)?,
            size: node.size(),
            hash: Some(node.hash()),
            last_write: node.last_write(),
            score,
        })
    }

    fn directory(tree: &ShareTree, dir: DirId, score: f64) -> Option<Self> {
        let node = tree.directory(dir)?;
        Some(Self {
            kind: ResultKind::Directory,
            adc_path: tree.adc_path(dir)?,
            real_path: tree.real_path(dir, "")?,
            size: tree.total_size(dir),
            hash: None,
            last_write: node.last_write(),
            score,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub entries: Vec<SearchResult>,
    /// Directory nodes entered by the walk.
    pub visited_directories: usize,
    /// Set when the walk stopped at `max_results`.
    pub truncated: bool,
}

impl SearchResults {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lifetime search counters.
#[derive(Debug, Default)]
pub struct SearchCounters {
    searches: AtomicU64,
    bloom_stopped: AtomicU64,
    hits: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchStats {
    pub searches: u64,
    pub bloom_stopped: u64,
    pub hits: u64,
}

impl SearchCounters {
    pub fn snapshot(&self) -> SearchStats {
        SearchStats {
            searches: self.searches.load(Ordering::Relaxed),
            bloom_stopped: self.bloom_stopped.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn add_hits(&self, hits: usize) {
        self.hits.fetch_add(hits as u64, Ordering::Relaxed);
    }
}

/// Runs `query` against the share.
///
/// Hash queries return at most one visible file. Name queries are checked
/// against the bloom filter first and walk nothing when it rejects them.
/// A scoped query fails with `NotFound` if its root is not visible.
pub fn search_share(
    data: &ShareIndexData,
    query: &SearchQuery,
    filter: &ProfileFilter,
    max_results: usize,
    counters: &SearchCounters,
) -> Result<SearchResults> {
    let tree = data.tree();
    if let Some(hash) = query.hash {
        let entries: Vec<SearchResult> = data
            .visible_files_with_hash(&hash, filter)
            .take(max_results.min(1))
            .filter_map(|file| SearchResult::file(tree, file, 1.0))
            .collect();
        counters.add_hits(entries.len());
        return Ok(SearchResults {
            entries,
            ..SearchResults::default()
        });
    }

    counters.searches.fetch_add(1, Ordering::Relaxed);
    let scope = match &query.root {
        Some(root) => Some(data.find_directories(root, filter)?),
        None => None,
    };

    let matcher = QueryMatcher::compile(query);
    let lower_terms: Vec<&str> = matcher.terms.terms().iter().map(Term::as_str).collect();
    if !tree.bloom().matches_all(&lower_terms) {
        counters.bloom_stopped.fetch_add(1, Ordering::Relaxed);
        log::debug!("search stopped by name bloom terms={lower_terms:?}");
        return Ok(SearchResults::default());
    }

    let mut walk = SearchWalk {
        tree,
        matcher,
        max_results,
        results: SearchResults::default(),
    };
    if max_results > 0 {
        match scope {
            Some(dirs) => {
                for dir in dirs {
                    if walk.visit_scope(dir).is_none() {
                        break;
                    }
                }
            }
            None => {
                for root in data.visible_roots(filter) {
                    if walk.visit(root, 0).is_none() {
                        break;
                    }
                }
            }
        }
    }

    let mut results = walk.results;
    if query.match_mode == MatchMode::PathPartial {
        results
            .entries
            .sort_by(|left, right| right.score.total_cmp(&left.score));
    }
    counters.add_hits(results.entries.len());
    Ok(results)
}

struct SearchWalk<'a> {
    tree: &'a ShareTree,
    matcher: QueryMatcher,
    max_results: usize,
    results: SearchResults,
}

impl<'a> SearchWalk<'a> {
    /// Visits one directory and its subtree. Returns `None` once the result
    /// set is full.
    fn visit(&mut self, dir: DirId, level: usize) -> Option<()> {
        let tree = self.tree;
        let Some(node) = tree.directory(dir) else {
            return Some(());
        };
        self.results.visited_directories += 1;

        let lower_name = node.virtual_name_lower();
        if self.matcher.is_excluded(lower_name) {
            return Some(());
        }
        if let Some(category) = self.matcher.file_type() {
            if !node.content_types().contains(category.flag()) {
                return Some(());
            }
        }

        let mode = self.matcher.mode();
        let consumed = self.matcher.terms.consume(lower_name, mode);
        let flow = self.visit_matching(dir, node, level, consumed);
        self.matcher.terms.restore(consumed);
        flow
    }

    /// Walks the contents of a search scope without matching the scope
    /// directory itself.
    fn visit_scope(&mut self, dir: DirId) -> Option<()> {
        let tree = self.tree;
        let Some(node) = tree.directory(dir) else {
            return Some(());
        };
        self.results.visited_directories += 1;
        self.visit_contents(node, 0)
    }

    fn visit_matching(
        &mut self,
        dir: DirId,
        node: &'a DirectoryNode,
        level: usize,
        consumed: usize,
    ) -> Option<()> {
        if self.matcher.directories_allowed()
            && self.matcher.date_matches(node.last_write())
            && self.directory_matches(node, level, consumed)
        {
            let score = self.matcher.score(node.virtual_name_lower(), level);
            if let Some(result) = SearchResult::directory(self.tree, dir, score) {
                self.push(result)?;
            }
        }
        self.visit_contents(node, level)
    }

    fn visit_contents(&mut self, node: &'a DirectoryNode, level: usize) -> Option<()> {
        let tree = self.tree;
        if self.matcher.files_allowed() {
            for file in node.files() {
                let Some(file_node) = tree.file(*file) else {
                    continue;
                };
                let lower_name = file_node.lower_name();
                if !self.matcher.size_matches(file_node.size())
                    || !self.matcher.date_matches(file_node.last_write())
                    || self.matcher.is_excluded(lower_name)
                    || !self.matcher.name_matches(lower_name)
                    || !self.matcher.file_kind_matches(lower_name)
                {
                    continue;
                }
                let score = self.matcher.score(lower_name, level + 1);
                if let Some(result) = SearchResult::file(tree, *file, score) {
                    self.push(result)?;
                }
            }
        }

        for child in node.directories() {
            self.visit(*child, level + 1)?;
        }
        Some(())
    }

    fn directory_matches(&self, node: &DirectoryNode, level: usize, consumed: usize) -> bool {
        let terms = &self.matcher.terms;
        if terms.is_empty() {
            return level == 0 && node.is_root();
        }
        match self.matcher.mode() {
            MatchMode::PathConsume | MatchMode::PathPartial => {
                consumed > 0 && terms.all_consumed()
            }
            MatchMode::NameOnly | MatchMode::NameExact => {
                self.matcher.name_matches(node.virtual_name_lower())
            }
        }
    }

    fn push(&mut self, result: SearchResult) -> Option<()> {
        self.results.entries.push(result);
        if self.results.entries.len() >= self.max_results {
            self.results.truncated = true;
            return None;
        }
        Some(())
    }
}
