//! Relay wire frames
//!
//! Frames are JSON arrays tagged by their first element, shared by the
//! WebSocket client and the bundled relay server:
//!
//! ```text
//! client -> relay   ["EVENT", <event>]
//!                   ["REQ", <subscription id>, <filter>]
//!                   ["CLOSE", <subscription id>]
//! relay -> client   ["EVENT", <subscription id>, <event>]
//!                   ["OK", <event id>, <accepted>, <message>]
//!                   ["EOSE", <subscription id>]
//!                   ["CLOSED", <subscription id>, <message>]
//!                   ["NOTICE", <message>]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{TransportError, TransportResult};
use crate::event::Event;

/// Subscription filter
///
/// Empty lists match anything; `limit` caps how many stored events the
/// relay returns before end-of-stored-events.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Hex public keys of accepted authors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    /// Accepted event kinds
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u32>,
    /// Maximum number of stored events to return
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    /// Whether `event` passes the author and kind constraints
    pub fn matches(&self, event: &Event) -> bool {
        let author_ok = self.authors.is_empty()
            || self
                .authors
                .iter()
                .any(|a| a.eq_ignore_ascii_case(event.pubkey()));
        let kind_ok = self.kinds.is_empty() || self.kinds.contains(&event.kind());
        author_ok && kind_ok
    }
}

/// Frames sent by clients
#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    /// Publish an event
    Event(Event),
    /// Open a subscription
    Req {
        /// Client-chosen subscription id
        subscription_id: String,
        /// What to match
        filter: Filter,
    },
    /// Close a subscription
    Close {
        /// Subscription to close
        subscription_id: String,
    },
}

/// Frames sent by relays
#[derive(Clone, Debug, PartialEq)]
pub enum RelayMessage {
    /// An event matching a subscription
    Event {
        /// Subscription the event belongs to
        subscription_id: String,
        /// The event
        event: Event,
    },
    /// Answer to a published event
    Ok {
        /// Id of the published event
        event_id: String,
        /// Whether the relay stored it
        accepted: bool,
        /// Human-readable reason
        message: String,
    },
    /// All stored events for the subscription have been sent
    Eose {
        /// Subscription id
        subscription_id: String,
    },
    /// The relay ended the subscription
    Closed {
        /// Subscription id
        subscription_id: String,
        /// Reason
        message: String,
    },
    /// Free-form notice
    Notice {
        /// Notice text
        message: String,
    },
}

impl ClientMessage {
    /// Encode as a JSON text frame
    pub fn to_json(&self) -> String {
        match self {
            ClientMessage::Event(event) => json!(["EVENT", event]),
            ClientMessage::Req {
                subscription_id,
                filter,
            } => json!(["REQ", subscription_id, filter]),
            ClientMessage::Close { subscription_id } => json!(["CLOSE", subscription_id]),
        }
        .to_string()
    }

    /// Decode a JSON text frame
    pub fn from_json(text: &str) -> TransportResult<Self> {
        let (tag, items) = split_frame(text)?;
        match tag.as_str() {
            "EVENT" => Ok(ClientMessage::Event(field(&items, 1)?)),
            "REQ" => Ok(ClientMessage::Req {
                subscription_id: field(&items, 1)?,
                filter: field(&items, 2)?,
            }),
            "CLOSE" => Ok(ClientMessage::Close {
                subscription_id: field(&items, 1)?,
            }),
            other => Err(TransportError::InvalidData(format!(
                "Unknown client frame: {other}"
            ))),
        }
    }
}

impl RelayMessage {
    /// Encode as a JSON text frame
    pub fn to_json(&self) -> String {
        match self {
            RelayMessage::Event {
                subscription_id,
                event,
            } => json!(["EVENT", subscription_id, event]),
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => json!(["OK", event_id, accepted, message]),
            RelayMessage::Eose { subscription_id } => json!(["EOSE", subscription_id]),
            RelayMessage::Closed {
                subscription_id,
                message,
            } => json!(["CLOSED", subscription_id, message]),
            RelayMessage::Notice { message } => json!(["NOTICE", message]),
        }
        .to_string()
    }

    /// Decode a JSON text frame
    pub fn from_json(text: &str) -> TransportResult<Self> {
        let (tag, items) = split_frame(text)?;
        match tag.as_str() {
            "EVENT" => Ok(RelayMessage::Event {
                subscription_id: field(&items, 1)?,
                event: field(&items, 2)?,
            }),
            "OK" => Ok(RelayMessage::Ok {
                event_id: field(&items, 1)?,
                accepted: field(&items, 2)?,
                message: optional_text(&items, 3),
            }),
            "EOSE" => Ok(RelayMessage::Eose {
                subscription_id: field(&items, 1)?,
            }),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: field(&items, 1)?,
                message: optional_text(&items, 2),
            }),
            "NOTICE" => Ok(RelayMessage::Notice {
                message: optional_text(&items, 1),
            }),
            other => Err(TransportError::InvalidData(format!(
                "Unknown relay frame: {other}"
            ))),
        }
    }
}

fn split_frame(text: &str) -> TransportResult<(String, Vec<Value>)> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| TransportError::InvalidData(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(TransportError::InvalidData("Frame is not an array".to_string()));
    };
    let tag = items
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| TransportError::InvalidData("Frame has no tag".to_string()))?
        .to_string();
    Ok((tag, items))
}

fn field<T: serde::de::DeserializeOwned>(items: &[Value], index: usize) -> TransportResult<T> {
    let value = items
        .get(index)
        .ok_or_else(|| TransportError::InvalidData(format!("Frame missing element {index}")))?;
    T::deserialize(value).map_err(|e| TransportError::InvalidData(e.to_string()))
}

fn optional_text(items: &[Value], index: usize) -> String {
    items
        .get(index)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
