//! # Content fingerprint
//!
//! A short non-cryptographic 64-bit hash over a sanitized YAML body. Used
//! only for correlation keying and live-event deduplication — it is never
//! persisted to Git. `XxHash64` is used rather than a cryptographic digest
//! since collision-resistance is not required here, only speed and a low
//! accidental-collision rate.

use std::hash::Hasher;

use twox_hash::XxHash64;

/// Computes the content fingerprint of already-canonicalized bytes (the
/// output of [`crate::sanitize::marshal`]).
#[must_use]
pub fn content_fingerprint(canonical_bytes: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(canonical_bytes);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_bytes_produce_identical_fingerprints() {
        let bytes = b"data:\n  a: \"1\"\n";
        assert_eq!(content_fingerprint(bytes), content_fingerprint(bytes));
    }

    #[test]
    fn differing_bytes_produce_differing_fingerprints() {
        let a = content_fingerprint(b"data:\n  a: \"1\"\n");
        let b = content_fingerprint(b"data:\n  a: \"2\"\n");
        assert_ne!(a, b);
    }
}
