//! SHA-256 content hashing
//!
//! Event identifiers are the SHA-256 digest of an event's canonical
//! serialization, so identical content always yields the same id.

use sha2::{Digest as _, Sha256};

use super::error::{CryptoError, CryptoResult};

/// Size of a digest in bytes
pub const DIGEST_SIZE: usize = 32;

/// A raw digest
pub type Digest = [u8; DIGEST_SIZE];

/// Content hashing operations
pub struct Hash;

impl Hash {
    /// Digest of `data`
    pub fn hash(data: &[u8]) -> Digest {
        Sha256::digest(data).into()
    }

    /// Lowercase hex digest, the form ids travel in
    pub fn hash_hex(data: &[u8]) -> String {
        hex::encode(Self::hash(data))
    }

    /// Parse a hex id back into a digest
    pub fn from_hex(id: &str) -> CryptoResult<Digest> {
        let bytes = hex::decode(id).map_err(|_| CryptoError::IdMismatch)?;
        bytes.try_into().map_err(|_| CryptoError::IdMismatch)
    }

    /// Whether `data` hashes to `expected`
    pub fn verify(data: &[u8], expected: &Digest) -> bool {
        Self::hash(data) == *expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let data = b"hello relays";
        assert_eq!(Hash::hash(data), Hash::hash(data));
    }

    #[test]
    fn test_hash_different_inputs() {
        assert_ne!(Hash::hash(b"note one"), Hash::hash(b"note two"));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            Hash::hash_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hex_round_trip() {
        let hex = Hash::hash_hex(b"abc");
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(Hash::from_hex(&hex).unwrap(), Hash::hash(b"abc"));
    }

    #[test]
    fn test_from_hex_rejects_bad_ids() {
        assert_eq!(Hash::from_hex("zz"), Err(CryptoError::IdMismatch));
        assert_eq!(Hash::from_hex("abcd"), Err(CryptoError::IdMismatch));
    }

    #[test]
    fn test_hash_verify() {
        let data = b"test data";
        let digest = Hash::hash(data);

        assert!(Hash::verify(data, &digest));
        assert!(!Hash::verify(b"wrong data", &digest));
    }
}
