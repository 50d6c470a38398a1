//! Fan-out publishing
//!
//! [`Publisher::publish`] delivers one signed event to every relay in a
//! list. Each relay gets its own connection budget and its own send budget,
//! failures are recorded and never stop the other attempts, and the whole
//! operation only fails when no relay accepted the event.
//!
//! ```text
//!            ┌──► relay A: connect ─► send ─► close ──┐
//!  event ────┼──► relay B: connect ─► send ─► close ──┼──► PublishReport
//!            └──► relay C: connect ─► send ─► close ──┘
//! ```

use futures_util::stream::{self, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::FanOutConfig;
use crate::crypto::CryptoError;
use crate::event::Event;
use crate::relays::RelayUrl;
use crate::transport::{Connector, TransportError};

/// How one relay attempt ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The relay accepted the event
    Delivered,
    /// No connection could be established
    ConnectionFailed,
    /// Connected, but the event was not accepted
    SendFailed,
}

/// Result of delivering to one relay
#[derive(Clone, Debug)]
pub struct DeliveryOutcome {
    /// Relay attempted
    pub relay: RelayUrl,
    /// How it ended
    pub status: DeliveryStatus,
    /// Cause of failure, if any
    pub error: Option<String>,
    /// Time spent on this relay
    pub elapsed: Duration,
}

impl DeliveryOutcome {
    /// Whether the relay accepted the event
    pub fn is_delivered(&self) -> bool {
        self.status == DeliveryStatus::Delivered
    }

    /// One-line description of a failure, naming the relay
    pub fn failure_detail(&self) -> Option<String> {
        let stage = match self.status {
            DeliveryStatus::Delivered => return None,
            DeliveryStatus::ConnectionFailed => "connection failed",
            DeliveryStatus::SendFailed => "publish failed",
        };
        let cause = self.error.as_deref().unwrap_or("unknown error");
        Some(format!("{} ({}: {})", self.relay, stage, cause))
    }
}

/// Aggregate of every relay attempt
///
/// Outcomes appear in completion order; with a single worker that is the
/// order of the input list.
#[derive(Clone, Debug, Default)]
pub struct PublishReport {
    outcomes: Vec<DeliveryOutcome>,
}

impl PublishReport {
    /// Build a report from outcomes
    pub fn new(outcomes: Vec<DeliveryOutcome>) -> Self {
        PublishReport { outcomes }
    }

    /// Every outcome
    pub fn outcomes(&self) -> &[DeliveryOutcome] {
        &self.outcomes
    }

    /// Relays attempted
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Relays that accepted the event
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_delivered()).count()
    }

    /// Relays that did not
    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    /// Failure descriptions, in outcome order
    pub fn failures(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter_map(DeliveryOutcome::failure_detail)
            .collect()
    }

    /// At least one relay accepted the event
    pub fn is_success(&self) -> bool {
        self.succeeded() >= 1
    }

    /// Some, but not all, relays accepted the event
    pub fn is_degraded(&self) -> bool {
        self.is_success() && self.failed() > 0
    }
}

/// Publish errors
#[derive(Error, Debug)]
pub enum PublishError {
    /// The relay list was empty
    #[error("No relays to publish to")]
    NoEndpoints,

    /// The event does not pass its own id and signature check
    #[error("Refusing to publish an invalid event: {0}")]
    InvalidEvent(#[from] CryptoError),

    /// No relay accepted the event
    #[error("Failed to publish to any of {} relays", .report.total())]
    AllFailed {
        /// Every failed attempt
        report: PublishReport,
    },
}

/// Delivers events to many relays
pub struct Publisher<C> {
    connector: C,
    config: FanOutConfig,
}

impl<C: Connector> Publisher<C> {
    /// Create a publisher
    pub fn new(connector: C, config: FanOutConfig) -> Self {
        Publisher { connector, config }
    }

    /// Deliver `event` to every relay in `relays`
    ///
    /// Duplicate addresses are attempted once per occurrence. Cancelling
    /// `cancel` aborts outstanding attempts; their connections are still
    /// closed and they are recorded as failures.
    pub async fn publish(
        &self,
        event: &Event,
        relays: &[RelayUrl],
        cancel: &CancellationToken,
    ) -> Result<PublishReport, PublishError> {
        if relays.is_empty() {
            return Err(PublishError::NoEndpoints);
        }
        event.verify()?;

        let workers = self.config.workers_for(relays.len());
        info!(event = %event.id(), relays = relays.len(), workers, "publishing");

        let outcomes: Vec<DeliveryOutcome> = stream::iter(relays)
            .map(|relay| self.deliver(event, relay, cancel))
            .buffer_unordered(workers)
            .collect()
            .await;

        let report = PublishReport::new(outcomes);
        info!(
            event = %event.id(),
            succeeded = report.succeeded(),
            total = report.total(),
            "publish finished"
        );

        if report.is_success() {
            Ok(report)
        } else {
            Err(PublishError::AllFailed { report })
        }
    }

    async fn deliver(&self, event: &Event, relay: &RelayUrl, cancel: &CancellationToken) -> DeliveryOutcome {
        let started = Instant::now();
        let finish = |status: DeliveryStatus, error: Option<String>| {
            if let Some(cause) = &error {
                warn!(relay = %relay, ?status, %cause, "delivery failed");
            }
            DeliveryOutcome {
                relay: relay.clone(),
                status,
                error,
                elapsed: started.elapsed(),
            }
        };

        debug!(relay = %relay, "connecting");
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err("cancelled".to_string()),
            result = timeout(self.config.connect_timeout, self.connector.connect(relay)) => {
                match result {
                    Ok(Ok(conn)) => Ok(conn),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(TransportError::Timeout.to_string()),
                }
            }
        };
        let mut conn = match connected {
            Ok(conn) => conn,
            Err(cause) => return finish(DeliveryStatus::ConnectionFailed, Some(cause)),
        };

        debug!(relay = %relay, "sending");
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err("cancelled".to_string()),
            result = timeout(self.config.send_timeout, conn.publish(event)) => {
                match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(TransportError::Timeout.to_string()),
                }
            }
        };

        // Released on every path; a slow close must not hold the worker
        match timeout(self.config.close_timeout, conn.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(relay = %relay, error = %e, "close failed"),
            Err(_) => debug!(relay = %relay, "close timed out"),
        }

        match sent {
            Ok(()) => {
                debug!(relay = %relay, "delivered");
                finish(DeliveryStatus::Delivered, None)
            }
            Err(cause) => finish(DeliveryStatus::SendFailed, Some(cause)),
        }
    }
}
