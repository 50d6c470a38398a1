//! secp256k1 author identity
//!
//! A note's author is a secp256k1 keypair. The secret half is persisted as
//! a hex-encoded 32-byte scalar; the public half is the 32-byte x-only key
//! relays index notes by. Signatures are BIP-340 Schnorr over a 32-byte
//! digest.

use secp256k1::{schnorr, Keypair, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::error::{CryptoError, CryptoResult};
use super::hash::Digest;

/// Size of an x-only public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of a secret key in bytes
pub const SECRET_KEY_SIZE: usize = 32;

/// Size of a Schnorr signature in bytes
pub const SIGNATURE_SIZE: usize = 64;

/// An author's x-only public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Create from raw bytes, rejecting points not on the curve
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let key = XOnlyPublicKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(PublicKey(key.serialize()))
    }

    /// Convert to hex string for display and for the wire
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create from hex string
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_bytes(&bytes)
    }

    /// Verify a Schnorr signature over `digest`
    pub fn verify(&self, digest: &Digest, signature: &SignatureBytes) -> CryptoResult<()> {
        let key = XOnlyPublicKey::from_slice(&self.0).map_err(|_| CryptoError::InvalidPublicKey)?;
        let sig = schnorr::Signature::from_slice(&signature.0)
            .map_err(|_| CryptoError::SignatureVerificationFailed)?;

        Secp256k1::verification_only()
            .verify_schnorr(&sig, &Message::from_digest(*digest), &key)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({}...)", &self.to_hex()[..16])
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A signature produced by an identity
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SignatureBytes(pub [u8; SIGNATURE_SIZE]);

impl SignatureBytes {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != SIGNATURE_SIZE {
            return Err(CryptoError::InvalidSignatureLength {
                expected: SIGNATURE_SIZE,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; SIGNATURE_SIZE];
        arr.copy_from_slice(bytes);
        Ok(SignatureBytes(arr))
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create from hex string
    pub fn from_hex(s: &str) -> CryptoResult<Self> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::SignatureVerificationFailed)?;
        Self::from_bytes(&bytes)
    }
}

impl std::fmt::Debug for SignatureBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}...)", &self.to_hex()[..16])
    }
}

/// An author keypair
///
/// The secret key is erased when dropped and never printed by `Debug`.
#[derive(Clone)]
pub struct Identity {
    public_key: PublicKey,
    keypair: Keypair,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        loop {
            // Out-of-range scalars are astronomically rare; draw again
            let mut secret: [u8; SECRET_KEY_SIZE] = rand::random();
            let identity = Self::from_secret_bytes(&secret);
            secret.zeroize();
            if let Ok(identity) = identity {
                return identity;
            }
        }
    }

    /// Derive an identity from a 32-byte secret scalar
    ///
    /// Fails for zero or for values not below the curve order.
    pub fn from_secret_bytes(secret: &[u8; SECRET_KEY_SIZE]) -> CryptoResult<Self> {
        let secp = Secp256k1::signing_only();
        let keypair =
            Keypair::from_seckey_slice(&secp, secret).map_err(|_| CryptoError::InvalidSecretKey)?;
        let (public_key, _parity) = keypair.x_only_public_key();

        Ok(Identity {
            public_key: PublicKey(public_key.serialize()),
            keypair,
        })
    }

    /// Parse a stored hex secret
    ///
    /// Surrounding whitespace is ignored so keys pasted from a terminal work.
    pub fn from_secret_hex(s: &str) -> CryptoResult<Self> {
        let mut bytes = hex::decode(s.trim()).map_err(|_| CryptoError::InvalidSecretKey)?;
        if bytes.len() != SECRET_KEY_SIZE {
            let actual = bytes.len();
            bytes.zeroize();
            return Err(CryptoError::InvalidKeyLength {
                expected: SECRET_KEY_SIZE,
                actual,
            });
        }

        let mut secret = [0u8; SECRET_KEY_SIZE];
        secret.copy_from_slice(&bytes);
        bytes.zeroize();

        let identity = Self::from_secret_bytes(&secret);
        secret.zeroize();
        identity
    }

    /// Hex form of the secret key, as persisted in the credential store
    pub fn secret_hex(&self) -> String {
        let mut secret = self.keypair.secret_bytes();
        let encoded = hex::encode(secret);
        secret.zeroize();
        encoded
    }

    /// Get the public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Schnorr-sign a 32-byte digest
    pub fn sign(&self, digest: &Digest) -> SignatureBytes {
        let aux_rand: [u8; 32] = rand::random();
        let signature = Secp256k1::signing_only().sign_schnorr_with_aux_rand(
            &Message::from_digest(*digest),
            &self.keypair,
            &aux_rand,
        );

        let raw: &[u8; SIGNATURE_SIZE] = signature.as_ref();
        SignatureBytes(*raw)
    }

    /// Verify a signature (convenience method)
    pub fn verify(&self, digest: &Digest, signature: &SignatureBytes) -> CryptoResult<()> {
        self.public_key.verify(digest, signature)
    }
}

impl Drop for Identity {
    fn drop(&mut self) {
        self.keypair.non_secure_erase();
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}
