//! Signed notes
//!
//! An [`Event`] is the message fanned out to relays. Its id is derived from
//! the canonical serialization of its fields:
//!
//! ```text
//! [0, <pubkey hex>, <created_at>, <kind>, <tags>, <content>]
//! ```
//!
//! hashed with SHA-256, and the signature is a BIP-340 Schnorr signature
//! over the raw id bytes. This is the NIP-01 scheme public relays check.
//! Any party holding only the event can check both.
//!
//! # Example
//!
//! ```rust
//! use nos::{EventBuilder, Identity};
//!
//! let author = Identity::generate();
//! let event = EventBuilder::text_note("gm").sign(&author);
//!
//! assert!(event.verify().is_ok());
//! assert_eq!(event.pubkey(), author.public_key().to_hex());
//! ```

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::crypto::{CryptoError, CryptoResult, Hash, Identity, PublicKey, SignatureBytes};

/// Kind of a plain text note
pub const KIND_TEXT_NOTE: u32 = 1;

/// A signed, immutable note
///
/// Events come from [`EventBuilder::sign`] or from the wire; fields are
/// read-only afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    id: String,
    pubkey: String,
    created_at: u64,
    kind: u32,
    tags: Vec<Vec<String>>,
    content: String,
    sig: String,
}

impl Event {
    /// Hex SHA-256 hash of the canonical serialization
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Hex x-only public key of the author
    pub fn pubkey(&self) -> &str {
        &self.pubkey
    }

    /// Unix timestamp in seconds
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Event kind
    pub fn kind(&self) -> u32 {
        self.kind
    }

    /// Tags, each a list of strings
    pub fn tags(&self) -> &[Vec<String>] {
        &self.tags
    }

    /// Note content
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Hex Schnorr signature over the id bytes
    pub fn sig(&self) -> &str {
        &self.sig
    }

    /// Check that the id matches the content and the signature matches the id
    pub fn verify(&self) -> CryptoResult<()> {
        let canonical = canonical_bytes(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        );

        let id = Hash::from_hex(&self.id)?;
        if !Hash::verify(&canonical, &id) {
            return Err(CryptoError::IdMismatch);
        }

        let author = PublicKey::from_hex(&self.pubkey)?;
        let signature = SignatureBytes::from_hex(&self.sig)?;
        author.verify(&id, &signature)
    }

    /// Whether the event was authored by `author`
    pub fn is_authored_by(&self, author: &PublicKey) -> bool {
        self.pubkey.eq_ignore_ascii_case(&author.to_hex())
    }

    /// Copy with the content swapped but id and signature kept
    #[cfg(test)]
    pub(crate) fn with_forged_content(mut self, content: &str) -> Self {
        self.content = content.to_string();
        self
    }
}

/// Builder for unsigned events
#[derive(Clone, Debug)]
pub struct EventBuilder {
    kind: u32,
    tags: Vec<Vec<String>>,
    content: String,
    created_at: Option<u64>,
}

impl EventBuilder {
    /// Start a text note
    pub fn text_note(content: impl Into<String>) -> Self {
        EventBuilder {
            kind: KIND_TEXT_NOTE,
            tags: Vec::new(),
            content: content.into(),
            created_at: None,
        }
    }

    /// Append a tag
    pub fn tag(mut self, tag: Vec<String>) -> Self {
        self.tags.push(tag);
        self
    }

    /// Pin the creation time instead of using the current clock
    pub fn created_at(mut self, unix_secs: u64) -> Self {
        self.created_at = Some(unix_secs);
        self
    }

    /// Compute the id and sign it
    pub fn sign(self, author: &Identity) -> Event {
        let pubkey = author.public_key().to_hex();
        let created_at = self.created_at.unwrap_or_else(unix_now);

        let canonical = canonical_bytes(&pubkey, created_at, self.kind, &self.tags, &self.content);
        let id = Hash::hash(&canonical);
        let sig = author.sign(&id);

        Event {
            id: hex::encode(id),
            pubkey,
            created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: sig.to_hex(),
        }
    }
}

fn canonical_bytes(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[Vec<String>],
    content: &str,
) -> Vec<u8> {
    // serde_json escapes strings deterministically and keeps array order
    serde_json::json!([0, pubkey, created_at, kind, tags, content])
        .to_string()
        .into_bytes()
}

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
