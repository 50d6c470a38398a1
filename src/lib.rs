//! # nos
//!
//! Publish signed notes to many relays at once and check that they landed.
//!
//! ## Features
//!
//! - **Fan-out publishing** with independent connect and send timeouts per relay
//! - **Partial-failure tolerance**: one accepting relay is a success
//! - **Fan-out verification** that samples each relay under a time box
//! - **Relay list management** with validation, de-duplication and defaults
//! - **Pluggable transport** (WebSocket, in-memory for tests)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nos::{EventBuilder, FanOutConfig, Identity, Publisher, RelayList};
//! use nos::storage::MemoryStore;
//! use nos::transport::WebSocketConnector;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let author = Identity::generate();
//! let relays = RelayList::new(MemoryStore::new()).list();
//!
//! let event = EventBuilder::text_note("gm").sign(&author);
//! let publisher = Publisher::new(WebSocketConnector::new(), FanOutConfig::default());
//! let report = publisher.publish(&event, &relays, &CancellationToken::new()).await?;
//!
//! println!("published to {}/{} relays", report.succeeded(), report.total());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              APPLICATION LAYER              │
//! │          nos CLI  |  nos-relay              │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │                FAN-OUT LAYER                │
//! │   RelayList  |  Publisher  |  Verifier      │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │          EVENTS, KEYS AND STORAGE           │
//! │ Event | Schnorr | SHA-256 | CredentialStore │
//! └─────────────────────┬───────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────┐
//! │             TRANSPORT LAYER                 │
//! │        WebSocket  |  In-memory              │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod crypto;
pub mod event;
pub mod publish;
pub mod relays;
pub mod server;
pub mod storage;
pub mod transport;
pub mod verify;

// Re-export main types at crate root
pub use config::FanOutConfig;
pub use crypto::{CryptoError, CryptoResult, Identity, PublicKey};
pub use event::{Event, EventBuilder};
pub use publish::{DeliveryOutcome, DeliveryStatus, PublishError, PublishReport, Publisher};
pub use relays::{AddOutcome, RelayList, RelayListError, RelayUrl};
pub use verify::{RelayCheck, VerificationMatch, Verifier, VerifyError, VerifyReport};
