//! Core value types shared by the tree, the indices and the search engine.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::ShareError;

/// Size in bytes of a tiger-tree root hash.
pub const CONTENT_HASH_LEN: usize = 24;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Strong content hash (tiger-tree root) identifying a file's bytes.
///
/// Displayed and parsed as unpadded base32, 39 characters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; CONTENT_HASH_LEN]);

impl ContentHash {
    pub const fn new(bytes: [u8; CONTENT_HASH_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CONTENT_HASH_LEN] {
        &self.0
    }

    pub fn to_base32(&self) -> String {
        let mut out = String::with_capacity(39);
        let mut buffer: u32 = 0;
        let mut bits = 0;
        for &byte in &self.0 {
            buffer = (buffer << 8) | byte as u32;
            bits += 8;
            while bits >= 5 {
                bits -= 5;
                out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
            }
        }
        if bits > 0 {
            out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
        }
        out
    }
}

impl FromStr for ContentHash {
    type Err = ShareError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; CONTENT_HASH_LEN];
        let mut buffer: u32 = 0;
        let mut bits = 0;
        let mut written = 0;
        for ch in value.trim_end_matches('=').chars() {
            let digit = match ch.to_ascii_uppercase() {
                c @ 'A'..='Z' => c as u32 - 'A' as u32,
                c @ '2'..='7' => c as u32 - '2' as u32 + 26,
                _ => {
                    return Err(ShareError::InvalidInput(format!(
                        "invalid base32 character {ch:?} in content hash"
                    )))
                }
            };
            buffer = (buffer << 5) | digit;
            bits += 5;
            if bits >= 8 {
                bits -= 8;
                if written == CONTENT_HASH_LEN {
                    return Err(ShareError::InvalidInput(
                        "content hash is too long".to_string(),
                    ));
                }
                bytes[written] = (buffer >> bits) as u8;
                written += 1;
            }
        }
        if written != CONTENT_HASH_LEN {
            return Err(ShareError::InvalidInput(format!(
                "content hash must decode to {CONTENT_HASH_LEN} bytes, got {written}"
            )));
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base32())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_base32())
    }
}

/// Returns the current Unix timestamp in seconds.
pub fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_secs())
        .unwrap_or(0)
}

/// Converts a filesystem modification time to Unix seconds.
pub fn system_time_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|value| value.as_secs())
        .unwrap_or(0)
}

/// Converts 0 to None for optional timestamps.
pub fn zero_to_none(value: u64) -> Option<u64> {
    if value == 0 {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base32_known_value() {
        // Tiger-tree root of the empty input.
        let text = "LWPNACQDBZRYXW3VHJVCJ64QBZNGHOHHHZWCLNQ";
        let hash: ContentHash = text.parse().unwrap();
        assert_eq!(hash.to_string(), text);
        assert_eq!(hash.as_bytes()[0], 0x5d);
    }

    #[test]
    fn base32_accepts_lowercase() {
        let upper: ContentHash = "LWPNACQDBZRYXW3VHJVCJ64QBZNGHOHHHZWCLNQ".parse().unwrap();
        let lower: ContentHash = "lwpnacqdbzryxw3vhjvcj64qbznghohhhzwclnq".parse().unwrap();
        assert_eq!(upper, lower);
    }

    #[test]
    fn base32_rejects_bad_input() {
        assert!("NOT-BASE32".parse::<ContentHash>().is_err());
        assert!("AAAA".parse::<ContentHash>().is_err());
    }

    #[test]
    fn zero_to_none_maps_zero() {
        assert_eq!(zero_to_none(0), None);
        assert_eq!(zero_to_none(7), Some(7));
    }
}
