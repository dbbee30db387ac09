//! Hashing Helpers
//!
//! SHA-256 wrappers used by crash-point derivation and seed commitments.

use sha2::{Digest, Sha256};

/// Hash output type (256 bits / 32 bytes)
pub type Digest256 = [u8; 32];

/// Incremental SHA-256 over text fragments.
///
/// Fragments are concatenated with no separator, so
/// `["ab", "c"]` and `["a", "bc"]` hash identically. That matches the
/// string-concatenation scheme players use to verify rounds by hand.
pub struct TextHasher {
    hasher: Sha256,
}

impl TextHasher {
    /// Create an empty hasher.
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Append UTF-8 text.
    #[inline]
    pub fn update_str(&mut self, text: &str) {
        self.hasher.update(text.as_bytes());
    }

    /// Append an integer in decimal notation.
    #[inline]
    pub fn update_decimal(&mut self, value: u64) {
        self.hasher.update(value.to_string().as_bytes());
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> Digest256 {
        self.hasher.finalize().into()
    }
}

impl Default for TextHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute a simple hash of arbitrary data.
pub fn hash_bytes(data: &[u8]) -> Digest256 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 of `data` as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(hash_bytes(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_text_hasher_is_plain_concatenation() {
        let mut split = TextHasher::new();
        split.update_str("ab");
        split.update_str("c");

        assert_eq!(split.finalize(), hash_bytes(b"abc"));
    }

    #[test]
    fn test_decimal_update() {
        let mut h = TextHasher::new();
        h.update_str("seed");
        h.update_decimal(42);
        assert_eq!(h.finalize(), hash_bytes(b"seed42"));
    }
}
