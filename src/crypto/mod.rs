//! Key material and hashing used to sign notes
//!
//! - `identity`: secp256k1 keypairs, x-only public keys and Schnorr signatures
//! - `hash`: SHA-256 content hashing for event ids

pub mod error;
pub mod hash;
pub mod identity;

pub use error::{CryptoError, CryptoResult};
pub use hash::Hash;
pub use identity::{Identity, PublicKey, SignatureBytes};

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn test_sign_content_hash() {
        let author = Identity::generate();

        let id = Hash::hash(b"gm relays");
        let signature = author.sign(&id);

        // Anyone holding the public key can check the signature over the id
        let public_key = *author.public_key();
        assert!(public_key.verify(&id, &signature).is_ok());

        let other = Hash::hash(b"gn relays");
        assert!(public_key.verify(&other, &signature).is_err());
    }

    #[test]
    fn test_identity_survives_store_round_trip() {
        let author = Identity::generate();
        let stored = author.secret_hex();

        let restored = Identity::from_secret_hex(&stored).unwrap();
        assert_eq!(author.public_key(), restored.public_key());
    }
}
