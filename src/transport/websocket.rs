//! WebSocket transport to real relays
//!
//! Frames are JSON text messages (see [`protocol`](super::protocol)). A
//! connection carries at most one publish or one subscription at a time,
//! which is all the fan-out engine needs.

use super::{
    ClientMessage, Connector, Filter, RelayConnection, RelayMessage, SubscriptionItem,
    TransportError, TransportResult,
};
use crate::event::Event;
use crate::relays::RelayUrl;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Opens WebSocket connections to relays
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a connector
    pub fn new() -> Self {
        WebSocketConnector
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &RelayUrl) -> TransportResult<Box<dyn RelayConnection>> {
        Ok(Box::new(WebSocketConnection::connect(url).await?))
    }
}

/// WebSocket connection to one relay
pub struct WebSocketConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    relay: RelayUrl,
    subscription: Option<String>,
    connected: bool,
}

impl WebSocketConnection {
    /// Connect to a relay
    pub async fn connect(url: &RelayUrl) -> TransportResult<Self> {
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!(relay = %url, "websocket connected");
        Ok(WebSocketConnection {
            ws,
            relay: url.clone(),
            subscription: None,
            connected: true,
        })
    }

    /// Send a client frame
    async fn send_frame(&mut self, msg: &ClientMessage) -> TransportResult<()> {
        if !self.connected {
            return Err(TransportError::Disconnected);
        }

        self.ws
            .send(Message::Text(msg.to_json()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    /// Receive the next relay frame
    ///
    /// Frames that fail to parse are skipped; relays in the wild send
    /// extensions this client does not know.
    async fn receive_frame(&mut self) -> TransportResult<RelayMessage> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => match RelayMessage::from_json(&text) {
                    Ok(msg) => return Ok(msg),
                    Err(e) => {
                        debug!(relay = %self.relay, error = %e, "skipping frame");
                        continue;
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    self.connected = false;
                    return Err(TransportError::Disconnected);
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = self.ws.send(Message::Pong(data)).await;
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                _ => continue,
            }
        }
    }
}

#[async_trait]
impl RelayConnection for WebSocketConnection {
    async fn publish(&mut self, event: &Event) -> TransportResult<()> {
        self.send_frame(&ClientMessage::Event(event.clone())).await?;

        // Wait for the OK that answers this event
        loop {
            match self.receive_frame().await? {
                RelayMessage::Ok {
                    event_id,
                    accepted,
                    message,
                } if event_id == event.id() => {
                    return if accepted {
                        Ok(())
                    } else {
                        Err(TransportError::Rejected(message))
                    };
                }
                RelayMessage::Notice { message } => {
                    debug!(relay = %self.relay, %message, "notice");
                }
                _ => continue,
            }
        }
    }

    async fn subscribe(&mut self, subscription_id: &str, filter: &Filter) -> TransportResult<()> {
        self.send_frame(&ClientMessage::Req {
            subscription_id: subscription_id.to_string(),
            filter: filter.clone(),
        })
        .await?;
        self.subscription = Some(subscription_id.to_string());
        Ok(())
    }

    async fn next_item(&mut self) -> TransportResult<SubscriptionItem> {
        let Some(current) = self.subscription.clone() else {
            return Err(TransportError::Disconnected);
        };

        loop {
            match self.receive_frame().await? {
                RelayMessage::Event {
                    subscription_id,
                    event,
                } if subscription_id == current => return Ok(SubscriptionItem::Event(event)),
                RelayMessage::Eose { subscription_id } if subscription_id == current => {
                    return Ok(SubscriptionItem::EndOfStoredEvents)
                }
                RelayMessage::Closed {
                    subscription_id,
                    message,
                } if subscription_id == current => {
                    self.subscription = None;
                    return Ok(SubscriptionItem::Closed(message));
                }
                _ => continue,
            }
        }
    }

    async fn unsubscribe(&mut self, subscription_id: &str) -> TransportResult<()> {
        if self.subscription.as_deref() != Some(subscription_id) {
            return Ok(());
        }
        self.subscription = None;
        self.send_frame(&ClientMessage::Close {
            subscription_id: subscription_id.to_string(),
        })
        .await
    }

    async fn close(&mut self) -> TransportResult<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.ws
            .close(None)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = RelayUrl::parse(&format!("ws://127.0.0.1:{port}")).unwrap();
        let result = WebSocketConnector::new().connect(&url).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_secure_url_attempts_tls_handshake() {
        // A plain TCP peer that answers the ClientHello with HTTP
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                use tokio::io::AsyncWriteExt;
                let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
            }
        });

        let url = RelayUrl::parse(&format!("wss://127.0.0.1:{port}")).unwrap();
        let Err(TransportError::ConnectionFailed(cause)) =
            WebSocketConnector::new().connect(&url).await
        else {
            panic!("expected a failed TLS handshake");
        };
        assert!(!cause.contains("not compiled"), "TLS unavailable: {cause}");
    }
}
