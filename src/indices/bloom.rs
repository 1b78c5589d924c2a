//! N-gram bloom filter over lowercase share names.
//!
//! Every name adds each of its `NGRAM_LEN`-byte windows. A search term can
//! only be a substring of some name if all of its own windows are present,
//! so a miss on any window proves the term is absent from the share. Terms
//! shorter than one window are always reported as possible matches.

use std::hash::Hasher;

use fnv::FnvHasher;

/// Window length in bytes.
pub const NGRAM_LEN: usize = 5;

/// Default table size in bits.
pub const NAME_BLOOM_BITS: usize = 1 << 20;

#[derive(Debug, Clone)]
pub struct NameBloom {
    words: Box<[u64]>,
    bits: usize,
    /// Names added since the last clear.
    tracked: usize,
}

impl Default for NameBloom {
    fn default() -> Self {
        Self::new()
    }
}

impl NameBloom {
    pub fn new() -> Self {
        Self::with_bits(NAME_BLOOM_BITS)
    }

    /// Creates a filter with at least `bits` bits, rounded up to a whole word.
    pub fn with_bits(bits: usize) -> Self {
        let words = bits.max(64).div_ceil(64);
        Self {
            words: vec![0u64; words].into_boxed_slice(),
            bits: words * 64,
            tracked: 0,
        }
    }

    /// Adds a lowercase name.
    pub fn add(&mut self, lower_name: &str) {
        self.tracked += 1;
        let bytes = lower_name.as_bytes();
        if bytes.len() < NGRAM_LEN {
            return;
        }
        for window in bytes.windows(NGRAM_LEN) {
            let pos = self.position(window);
            self.words[pos / 64] |= 1u64 << (pos % 64);
        }
    }

    /// Returns false only if the lowercase term occurs in no added name.
    pub fn matches(&self, lower_term: &str) -> bool {
        let bytes = lower_term.as_bytes();
        if bytes.len() < NGRAM_LEN {
            return true;
        }
        bytes.windows(NGRAM_LEN).all(|window| {
            let pos = self.position(window);
            self.words[pos / 64] & (1u64 << (pos % 64)) != 0
        })
    }

    pub fn matches_all<S: AsRef<str>>(&self, lower_terms: &[S]) -> bool {
        lower_terms.iter().all(|term| self.matches(term.as_ref()))
    }

    /// ORs another filter of the same size into this one.
    pub fn merge(&mut self, other: &NameBloom) {
        assert_eq!(self.bits, other.bits, "bloom filters must have equal size");
        for (word, other_word) in self.words.iter_mut().zip(other.words.iter()) {
            *word |= *other_word;
        }
        self.tracked += other.tracked;
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
        self.tracked = 0;
    }

    pub fn tracked_names(&self) -> usize {
        self.tracked
    }

    /// Fraction of bits set, for diagnostics.
    pub fn fill_ratio(&self) -> f64 {
        let ones: u64 = self.words.iter().map(|word| word.count_ones() as u64).sum();
        ones as f64 / self.bits as f64
    }

    fn position(&self, window: &[u8]) -> usize {
        let mut hasher = FnvHasher::default();
        hasher.write(window);
        (hasher.finish() % self.bits as u64) as usize
    }
}
