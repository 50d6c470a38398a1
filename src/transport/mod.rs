//! Relay transport abstraction
//!
//! This module provides the relay protocol seam used by the fan-out engine:
//! - [`Connector`] opens a [`RelayConnection`] to one relay
//! - [`websocket`] talks to real relays over WebSocket
//! - [`memory`] simulates scripted relays in-process (for testing)
//!
//! # Design
//!
//! Connections never apply timeouts themselves. The publisher and verifier
//! wrap each call with their own connection and operation budgets, so the
//! same timing rules apply to every transport.

use async_trait::async_trait;
use thiserror::Error;

use crate::event::Event;
use crate::relays::RelayUrl;

pub mod protocol;
pub mod websocket;

pub use protocol::{ClientMessage, Filter, RelayMessage};
pub use websocket::WebSocketConnector;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed
    #[error("Connection closed")]
    Disconnected,

    /// Send failed
    #[error("Failed to send: {0}")]
    SendFailed(String),

    /// Receive failed
    #[error("Failed to receive: {0}")]
    ReceiveFailed(String),

    /// The relay answered but refused the event
    #[error("Rejected by relay: {0}")]
    Rejected(String),

    /// Timeout
    #[error("Operation timed out")]
    Timeout,

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Something received on an open subscription
#[derive(Clone, Debug, PartialEq)]
pub enum SubscriptionItem {
    /// A matching event
    Event(Event),
    /// The relay has sent everything it had stored
    EndOfStoredEvents,
    /// The relay ended the subscription
    Closed(String),
}

/// Opens connections to relays
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `url`
    async fn connect(&self, url: &RelayUrl) -> TransportResult<Box<dyn RelayConnection>>;
}

/// An open connection to one relay
#[async_trait]
pub trait RelayConnection: Send {
    /// Send an event and wait for the relay to accept or reject it
    async fn publish(&mut self, event: &Event) -> TransportResult<()>;

    /// Open a subscription
    async fn subscribe(&mut self, subscription_id: &str, filter: &Filter) -> TransportResult<()>;

    /// Wait for the next subscription item
    ///
    /// Must be cancel-safe: dropping the future loses no item.
    async fn next_item(&mut self) -> TransportResult<SubscriptionItem>;

    /// Close a subscription
    async fn unsubscribe(&mut self, subscription_id: &str) -> TransportResult<()>;

    /// Close the connection
    async fn close(&mut self) -> TransportResult<()>;
}

/// In-memory relays for testing
///
/// Each relay is scripted with how it behaves on connect, on publish and
/// on subscribe. Stalls never resolve, so they exercise the engine's
/// timeouts (use a paused tokio clock to keep tests instant).
pub mod memory {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// What happens when a client connects
    #[derive(Clone, Debug)]
    pub enum ConnectBehavior {
        /// Connection succeeds
        Accept,
        /// Connection is refused with the given reason
        Refuse(String),
        /// Connection never completes
        Stall,
    }

    /// What happens when a client publishes
    #[derive(Clone, Debug)]
    pub enum PublishBehavior {
        /// Event is stored and acknowledged
        Accept,
        /// Relay answers with a refusal
        Reject(String),
        /// Relay never answers
        Stall,
    }

    /// A scripted relay
    #[derive(Clone, Debug)]
    pub struct MemoryRelay {
        connect: ConnectBehavior,
        publish: PublishBehavior,
        stored: Arc<Mutex<Vec<Event>>>,
        end_of_stored: bool,
        item_delay: Option<Duration>,
        subscribe_delay: Option<Duration>,
        close_stalls: bool,
    }

    impl MemoryRelay {
        /// A relay that accepts everything and signals end-of-stored-events
        pub fn new() -> Self {
            MemoryRelay {
                connect: ConnectBehavior::Accept,
                publish: PublishBehavior::Accept,
                stored: Arc::new(Mutex::new(Vec::new())),
                end_of_stored: true,
                item_delay: None,
                subscribe_delay: None,
                close_stalls: false,
            }
        }

        /// Set connect behavior
        pub fn on_connect(mut self, behavior: ConnectBehavior) -> Self {
            self.connect = behavior;
            self
        }

        /// Set publish behavior
        pub fn on_publish(mut self, behavior: PublishBehavior) -> Self {
            self.publish = behavior;
            self
        }

        /// Pre-load stored events
        pub fn with_events(self, events: impl IntoIterator<Item = Event>) -> Self {
            self.stored.lock().unwrap().extend(events);
            self
        }

        /// Never send end-of-stored-events, so collection runs to its time box
        pub fn without_end_of_stored(mut self) -> Self {
            self.end_of_stored = false;
            self
        }

        /// Delay every subscription item
        pub fn with_item_delay(mut self, delay: Duration) -> Self {
            self.item_delay = Some(delay);
            self
        }

        /// Delay the acknowledgement of every subscription
        pub fn with_subscribe_delay(mut self, delay: Duration) -> Self {
            self.subscribe_delay = Some(delay);
            self
        }

        /// Never finish closing a connection
        pub fn stall_on_close(mut self) -> Self {
            self.close_stalls = true;
            self
        }

        /// Events currently stored on the relay
        pub fn stored(&self) -> Vec<Event> {
            self.stored.lock().unwrap().clone()
        }
    }

    impl Default for MemoryRelay {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Connection counters, for checking that connections are released
    #[derive(Debug, Default)]
    pub struct ConnectionStats {
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    impl ConnectionStats {
        /// Connections successfully opened
        pub fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        /// Connections closed by the client
        pub fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    /// Connector over a set of scripted relays
    #[derive(Clone, Debug, Default)]
    pub struct MemoryConnector {
        relays: HashMap<String, MemoryRelay>,
        stats: Arc<ConnectionStats>,
    }

    impl MemoryConnector {
        /// Create a connector with no relays
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a relay under `url`
        pub fn with_relay(mut self, url: &str, relay: MemoryRelay) -> Self {
            self.relays.insert(url.to_string(), relay);
            self
        }

        /// Connection counters shared by every connection this connector opens
        pub fn stats(&self) -> Arc<ConnectionStats> {
            self.stats.clone()
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self, url: &RelayUrl) -> TransportResult<Box<dyn RelayConnection>> {
            let relay = self
                .relays
                .get(url.as_str())
                .cloned()
                .ok_or_else(|| TransportError::ConnectionFailed("unknown host".to_string()))?;

            match &relay.connect {
                ConnectBehavior::Accept => {}
                ConnectBehavior::Refuse(reason) => {
                    return Err(TransportError::ConnectionFailed(reason.clone()))
                }
                ConnectBehavior::Stall => std::future::pending::<()>().await,
            }

            self.stats.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(MemoryConnection {
                relay,
                pending: VecDeque::new(),
                subscription: None,
                stats: self.stats.clone(),
                connected: true,
            }))
        }
    }

    /// An open in-memory connection
    pub struct MemoryConnection {
        relay: MemoryRelay,
        pending: VecDeque<SubscriptionItem>,
        subscription: Option<String>,
        stats: Arc<ConnectionStats>,
        connected: bool,
    }

    #[async_trait]
    impl RelayConnection for MemoryConnection {
        async fn publish(&mut self, event: &Event) -> TransportResult<()> {
            if !self.connected {
                return Err(TransportError::Disconnected);
            }

            match &self.relay.publish {
                PublishBehavior::Accept => {
                    self.relay.stored.lock().unwrap().push(event.clone());
                    Ok(())
                }
                PublishBehavior::Reject(reason) => Err(TransportError::Rejected(reason.clone())),
                PublishBehavior::Stall => std::future::pending().await,
            }
        }

        async fn subscribe(&mut self, subscription_id: &str, filter: &Filter) -> TransportResult<()> {
            if !self.connected {
                return Err(TransportError::Disconnected);
            }

            if let Some(delay) = self.relay.subscribe_delay {
                tokio::time::sleep(delay).await;
            }

            let stored = self.relay.stored();
            let limit = filter.limit.unwrap_or(usize::MAX);
            self.pending.extend(
                stored
                    .into_iter()
                    .filter(|e| filter.matches(e))
                    .take(limit)
                    .map(SubscriptionItem::Event),
            );
            if self.relay.end_of_stored {
                self.pending.push_back(SubscriptionItem::EndOfStoredEvents);
            }
            self.subscription = Some(subscription_id.to_string());
            Ok(())
        }

        async fn next_item(&mut self) -> TransportResult<SubscriptionItem> {
            if !self.connected || self.subscription.is_none() {
                return Err(TransportError::Disconnected);
            }

            if let Some(delay) = self.relay.item_delay {
                tokio::time::sleep(delay).await;
            }
            match self.pending.pop_front() {
                Some(item) => Ok(item),
                None => std::future::pending().await,
            }
        }

        async fn unsubscribe(&mut self, subscription_id: &str) -> TransportResult<()> {
            if self.subscription.as_deref() == Some(subscription_id) {
                self.subscription = None;
                self.pending.clear();
            }
            Ok(())
        }

        async fn close(&mut self) -> TransportResult<()> {
            if self.relay.close_stalls {
                std::future::pending::<()>().await;
            }
            if self.connected {
                self.connected = false;
                self.stats.closed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }
}
