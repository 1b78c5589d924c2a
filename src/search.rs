//! Search over the share tree.
//!
//! - `query` - Structured queries and the text parser
//! - `matcher` - Compiled terms, filters and relevance scoring
//! - `engine` - Bloom pre-check, hash lookup and the recursive walk

mod engine;
mod matcher;
mod query;

pub use engine::{
    search_share, ResultKind, SearchCounters, SearchResult, SearchResults, SearchStats,
};
pub use matcher::{QueryMatcher, Term, TermSet, SHORT_TERM_LEN};
pub use query::{normalize_extension, ItemType, MatchMode, SearchQuery};
