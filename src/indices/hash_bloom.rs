//! Bloom filter over content hashes, exchanged with hubs so they can skip
//! hash searches that cannot match.

use crate::error::{Result, ShareError};
use crate::types::{ContentHash, CONTENT_HASH_LEN};

const HASH_BITS: usize = CONTENT_HASH_LEN * 8;

/// Bit array addressed by slices of the hash itself.
///
/// Position `n` of a hash is the integer formed by bits `n*h .. n*h+h`
/// (least significant bit first within each byte), modulo `m`.
#[derive(Debug, Clone)]
pub struct HashBloom {
    bits: Vec<bool>,
    k: usize,
    h: usize,
}

impl HashBloom {
    /// Creates an empty filter with `k` positions per hash, `m` bits, and
    /// `h` hash bits per position.
    pub fn new(k: usize, m: usize, h: usize) -> Result<Self> {
        if k == 0 || h == 0 || h > 64 {
            return Err(ShareError::InvalidInput(format!(
                "hash bloom needs k > 0 and 0 < h <= 64 (k={k}, h={h})"
            )));
        }
        if k * h > HASH_BITS {
            return Err(ShareError::InvalidInput(format!(
                "hash bloom reads {} bits but hashes have {HASH_BITS}",
                k * h
            )));
        }
        if m == 0 || m % 8 != 0 {
            return Err(ShareError::InvalidInput(format!(
                "hash bloom size must be a positive multiple of 8 (m={m})"
            )));
        }
        Ok(Self {
            bits: vec![false; m],
            k,
            h,
        })
    }

    pub fn add(&mut self, hash: &ContentHash) {
        for n in 0..self.k {
            let pos = self.position(hash, n);
            self.bits[pos] = true;
        }
    }

    pub fn matches(&self, hash: &ContentHash) -> bool {
        (0..self.k).all(|n| self.bits[self.position(hash, n)])
    }

    /// Serializes the filter as `m / 8` bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.bits.len() / 8];
        for (i, bit) in self.bits.iter().enumerate() {
            if *bit {
                out[i / 8] |= 1 << (i % 8);
            }
        }
        out
    }

    fn position(&self, hash: &ContentHash, n: usize) -> usize {
        let data = hash.as_bytes();
        let start = n * self.h;
        let mut x: u64 = 0;
        for i in 0..self.h {
            let bit = start + i;
            if data[bit / 8] & (1 << (bit % 8)) != 0 {
                x |= 1u64 << i;
            }
        }
        (x % self.bits.len() as u64) as usize
    }
}
