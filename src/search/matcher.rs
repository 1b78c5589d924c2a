//! Compiled form of a search query used by the tree walk.

use memchr::memmem::Finder;

use super::query::{normalize_extension, MatchMode, SearchQuery};
use crate::tree::{categorize, extension_of, FileCategory};

/// Terms of this many characters or less are never consumed by a directory
/// name in partial path mode.
pub const SHORT_TERM_LEN: usize = 2;

/// A lowercase substring pattern.
#[derive(Debug, Clone)]
pub struct Term {
    lower: String,
    finder: Finder<'static>,
}

impl Term {
    pub fn new(text: &str) -> Self {
        let lower = text.to_lowercase();
        let finder = Finder::new(lower.as_bytes()).into_owned();
        Self { lower, finder }
    }

    pub fn as_str(&self) -> &str {
        &self.lower
    }

    #[inline]
    pub fn matches(&self, lower_name: &str) -> bool {
        self.finder.find(lower_name.as_bytes()).is_some()
    }
}

/// Include terms with a consumption stack.
///
/// A directory name consumes the terms it contains; the walk restores them
/// when it leaves that directory.
#[derive(Debug)]
pub struct TermSet {
    terms: Vec<Term>,
    consumed: Vec<bool>,
    stack: Vec<usize>,
}

impl TermSet {
    pub fn new(terms: Vec<Term>) -> Self {
        let consumed = vec![false; terms.len()];
        Self {
            terms,
            consumed,
            stack: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn all_consumed(&self) -> bool {
        self.stack.len() == self.terms.len()
    }

    /// Marks every outstanding term found in `lower_name` as consumed and
    /// returns how many were.
    ///
    /// In partial mode nothing is consumed unless one of the matching terms
    /// is longer than [`SHORT_TERM_LEN`].
    pub fn consume(&mut self, lower_name: &str, mode: MatchMode) -> usize {
        if !mode.consumes_terms() {
            return 0;
        }
        let before = self.stack.len();
        for (index, term) in self.terms.iter().enumerate() {
            if !self.consumed[index] && term.matches(lower_name) {
                self.consumed[index] = true;
                self.stack.push(index);
            }
        }

        if mode == MatchMode::PathPartial
            && self.stack[before..]
                .iter()
                .all(|index| self.terms[*index].lower.chars().count() <= SHORT_TERM_LEN)
        {
            self.restore(self.stack.len() - before);
        }
        self.stack.len() - before
    }

    /// Undoes the last `count` consumptions.
    pub fn restore(&mut self, count: usize) {
        for _ in 0..count {
            if let Some(index) = self.stack.pop() {
                self.consumed[index] = false;
            }
        }
    }

    /// True if every outstanding term occurs in `lower_name`.
    pub fn remaining_match(&self, lower_name: &str) -> bool {
        self.terms
            .iter()
            .zip(&self.consumed)
            .all(|(term, consumed)| *consumed || term.matches(lower_name))
    }

    /// True if every term, consumed or not, occurs in `lower_name`.
    pub fn all_match(&self, lower_name: &str) -> bool {
        self.terms.iter().all(|term| term.matches(lower_name))
    }

    /// Sum of term lengths found in `lower_name`.
    pub fn matched_len(&self, lower_name: &str) -> usize {
        self.terms
            .iter()
            .filter(|term| term.matches(lower_name))
            .map(|term| term.lower.len())
            .sum()
    }
}

/// Per-query state precomputed once before walking.
#[derive(Debug)]
pub struct QueryMatcher {
    pub(crate) terms: TermSet,
    excludes: Vec<Term>,
    extensions: Vec<String>,
    excluded_extensions: Vec<String>,
    min_size: u64,
    max_size: u64,
    newer_than: Option<u64>,
    older_than: Option<u64>,
    file_type: Option<FileCategory>,
    mode: MatchMode,
    directories_allowed: bool,
    files_allowed: bool,
}

impl QueryMatcher {
    pub fn compile(query: &SearchQuery) -> Self {
        let newer_than = query
            .newer_than
            .map(|time| u64::try_from(time.timestamp()).unwrap_or(0));
        let older_than = query
            .older_than
            .map(|time| u64::try_from(time.timestamp()).unwrap_or(0));

        // Directories carry no size or extension, so those filters rule them out.
        let directories_allowed = query.item_type.allows_directories()
            && query.extensions.is_empty()
            && !query.has_size_bounds()
            && query.file_type.is_none();

        Self {
            terms: TermSet::new(query.include.iter().map(|text| Term::new(text)).collect()),
            excludes: query.exclude.iter().map(|text| Term::new(text)).collect(),
            extensions: query.extensions.iter().map(|ext| normalize_extension(ext)).collect(),
            excluded_extensions: query
                .excluded_extensions
                .iter()
                .map(|ext| normalize_extension(ext))
                .collect(),
            min_size: query.min_size,
            max_size: query.max_size,
            newer_than,
            older_than,
            file_type: query.file_type,
            mode: query.match_mode,
            directories_allowed,
            files_allowed: query.item_type.allows_files(),
        }
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    pub fn file_type(&self) -> Option<FileCategory> {
        self.file_type
    }

    pub fn files_allowed(&self) -> bool {
        self.files_allowed
    }

    pub fn directories_allowed(&self) -> bool {
        self.directories_allowed
    }

    pub fn is_excluded(&self, lower_name: &str) -> bool {
        self.excludes.iter().any(|term| term.matches(lower_name))
    }

    pub fn date_matches(&self, last_write: u64) -> bool {
        self.newer_than.map_or(true, |bound| last_write >= bound)
            && self.older_than.map_or(true, |bound| last_write <= bound)
    }

    pub fn size_matches(&self, size: u64) -> bool {
        size >= self.min_size && size <= self.max_size
    }

    /// Checks an item's own name against the include terms for the active
    /// mode. Path modes only look at the terms not consumed above it.
    pub fn name_matches(&self, lower_name: &str) -> bool {
        match self.mode {
            MatchMode::PathConsume | MatchMode::PathPartial => {
                self.terms.remaining_match(lower_name)
            }
            MatchMode::NameOnly => self.terms.all_match(lower_name),
            MatchMode::NameExact => match self.terms.terms() {
                [term] => term.as_str() == lower_name,
                _ => false,
            },
        }
    }

    /// Extension allow/deny lists and the category filter.
    pub fn file_kind_matches(&self, lower_name: &str) -> bool {
        let extension = extension_of(lower_name);
        if !self.extensions.is_empty()
            && !extension.is_some_and(|ext| self.extensions.iter().any(|allowed| allowed == ext))
        {
            return false;
        }
        if let Some(ext) = extension {
            if self.excluded_extensions.iter().any(|denied| denied == ext) {
                return false;
            }
        }
        match self.file_type {
            Some(category) => categorize(lower_name) == Some(category),
            None => true,
        }
    }

    /// Relevance of a match: share of the name covered by terms, a bonus for
    /// an exact name and a small preference for shallow items.
    pub fn score(&self, lower_name: &str, level: usize) -> f64 {
        let name_len = lower_name.len().max(1);
        let coverage = self.terms.matched_len(lower_name).min(name_len) as f64 / name_len as f64;
        let exact = match self.terms.terms() {
            [term] if term.as_str() == lower_name => 1.0,
            _ => 0.0,
        };
        coverage + exact + 0.5 / (level as f64 + 1.0)
    }
}
