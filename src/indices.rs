//! Lookup structures maintained alongside the share tree.
//!
//! - `bloom` - Name n-gram bloom filter used to reject searches early
//! - `content` - Content hash to file multimap
//! - `hash_bloom` - Exportable bloom filter over content hashes

mod bloom;
mod content;
mod hash_bloom;

pub use bloom::{NameBloom, NAME_BLOOM_BITS, NGRAM_LEN};
pub use content::ContentIndex;
pub use hash_bloom::HashBloom;
