//! Minimal local relay
//!
//! An in-memory relay speaking the same frames as the client transport.
//! It accepts events whose id and signature check out, answers
//! subscriptions with stored matches (newest first) followed by
//! end-of-stored-events, and then forwards new matching events live.
//!
//! Nothing is persisted; restart the relay and it is empty again.

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::event::Event;
use crate::transport::{ClientMessage, Filter, RelayMessage};

/// Server state
struct RelayState {
    events: RwLock<Vec<Event>>,
    /// Newly accepted events, fanned out to live subscriptions
    live: broadcast::Sender<Event>,
}

/// An in-memory relay
#[derive(Clone)]
pub struct RelayServer {
    state: Arc<RelayState>,
}

impl RelayServer {
    /// Create an empty relay
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(256);
        RelayServer {
            state: Arc::new(RelayState {
                events: RwLock::new(Vec::new()),
                live,
            }),
        }
    }

    /// Accept connections on `listener` until the task is dropped
    pub async fn serve(self, listener: TcpListener) {
        while let Ok((stream, addr)) = listener.accept().await {
            let server = self.clone();
            tokio::spawn(async move { server.handle_connection(stream, addr).await });
        }
    }

    /// Events accepted so far, oldest first
    pub async fn stored_events(&self) -> Vec<Event> {
        self.state.events.read().await.clone()
    }

    /// Validate and store an event, returning the OK frame to send back
    async fn accept_event(&self, event: Event) -> RelayMessage {
        if let Err(e) = event.verify() {
            return RelayMessage::Ok {
                event_id: event.id().to_string(),
                accepted: false,
                message: format!("invalid: {e}"),
            };
        }

        let mut events = self.state.events.write().await;
        if events.iter().any(|e| e.id() == event.id()) {
            return RelayMessage::Ok {
                event_id: event.id().to_string(),
                accepted: true,
                message: "duplicate: already have this event".to_string(),
            };
        }
        events.push(event.clone());
        drop(events);

        info!(event = %event.id(), author = %event.pubkey(), "event stored");
        let event_id = event.id().to_string();
        // No receivers is fine
        let _ = self.state.live.send(event);

        RelayMessage::Ok {
            event_id,
            accepted: true,
            message: String::new(),
        }
    }

    /// Stored events matching `filter`, newest first
    async fn query(&self, filter: &Filter) -> Vec<Event> {
        let events = self.state.events.read().await;
        let mut matching: Vec<Event> = events.iter().filter(|e| filter.matches(e)).cloned().collect();
        matching.sort_by_key(|e| std::cmp::Reverse(e.created_at()));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        matching
    }

    /// Handle a single WebSocket connection
    async fn handle_connection(self, stream: TcpStream, addr: SocketAddr) {
        debug!("New connection from: {}", addr);

        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                error!("WebSocket handshake failed for {}: {}", addr, e);
                return;
            }
        };

        let (mut write, mut read) = ws_stream.split();
        let mut subscriptions: HashMap<String, Filter> = HashMap::new();
        let mut live_rx = self.state.live.subscribe();

        loop {
            let mut replies: Vec<RelayMessage> = Vec::new();

            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => match ClientMessage::from_json(&text) {
                            Ok(ClientMessage::Event(event)) => {
                                replies.push(self.accept_event(event).await);
                            }
                            Ok(ClientMessage::Req { subscription_id, filter }) => {
                                for event in self.query(&filter).await {
                                    replies.push(RelayMessage::Event {
                                        subscription_id: subscription_id.clone(),
                                        event,
                                    });
                                }
                                replies.push(RelayMessage::Eose {
                                    subscription_id: subscription_id.clone(),
                                });
                                subscriptions.insert(subscription_id, filter);
                            }
                            Ok(ClientMessage::Close { subscription_id }) => {
                                subscriptions.remove(&subscription_id);
                            }
                            Err(e) => {
                                warn!("Invalid message from {}: {}", addr, e);
                                replies.push(RelayMessage::Notice {
                                    message: format!("invalid: {e}"),
                                });
                            }
                        },

                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Client {} disconnected", addr);
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }

                        Some(Err(e)) => {
                            warn!("WebSocket error from {}: {}", addr, e);
                            break;
                        }

                        _ => {}
                    }
                }

                live = live_rx.recv() => {
                    match live {
                        Ok(event) => {
                            for (subscription_id, filter) in &subscriptions {
                                if filter.matches(&event) {
                                    replies.push(RelayMessage::Event {
                                        subscription_id: subscription_id.clone(),
                                        event: event.clone(),
                                    });
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("Client {} missed {} live events", addr, missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }

            for reply in replies {
                if write.send(Message::Text(reply.to_json())).await.is_err() {
                    return;
                }
            }
        }
    }
}

impl Default for RelayServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBuilder;
    use crate::Identity;

    #[tokio::test]
    async fn test_accepts_valid_and_rejects_tampered() {
        let server = RelayServer::new();
        let author = Identity::generate();
        let event = EventBuilder::text_note("hi").sign(&author);

        match server.accept_event(event.clone()).await {
            RelayMessage::Ok { accepted, .. } => assert!(accepted),
            other => panic!("Wrong frame: {other:?}"),
        }

        let tampered = EventBuilder::text_note("hi again")
            .sign(&author)
            .with_forged_content("changed");
        match server.accept_event(tampered).await {
            RelayMessage::Ok { accepted, message, .. } => {
                assert!(!accepted);
                assert!(message.starts_with("invalid"));
            }
            other => panic!("Wrong frame: {other:?}"),
        }

        assert_eq!(server.stored_events().await, vec![event]);
    }

    #[tokio::test]
    async fn test_duplicate_is_acknowledged_once_stored() {
        let server = RelayServer::new();
        let event = EventBuilder::text_note("once").sign(&Identity::generate());

        server.accept_event(event.clone()).await;
        server.accept_event(event).await;
        assert_eq!(server.stored_events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_query_newest_first_with_limit() {
        let server = RelayServer::new();
        let author = Identity::generate();
        for (i, content) in ["old", "mid", "new"].iter().enumerate() {
            let event = EventBuilder::text_note(*content)
                .created_at(10 + i as u64)
                .sign(&author);
            server.accept_event(event).await;
        }

        let filter = Filter {
            authors: vec![author.public_key().to_hex()],
            kinds: vec![1],
            limit: Some(2),
        };
        let contents: Vec<String> = server
            .query(&filter)
            .await
            .into_iter()
            .map(|e| e.content().to_string())
            .collect();
        assert_eq!(contents, ["new", "mid"]);
    }
}
