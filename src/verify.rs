//! Fan-out verification
//!
//! [`Verifier::verify`] asks every relay for the author's most recent notes
//! and reports what each one returned. It is a sampling check: each relay
//! is asked for at most `verify_limit` notes and given `collect_timeout` to
//! deliver them, so a slow or silent relay costs a bounded amount of time.

use futures_util::stream::{self, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::FanOutConfig;
use crate::crypto::PublicKey;
use crate::event::{Event, KIND_TEXT_NOTE};
use crate::relays::RelayUrl;
use crate::transport::{Connector, Filter, RelayConnection, SubscriptionItem, TransportError};

/// A note by the queried author, as seen on one relay
#[derive(Clone, Debug, PartialEq)]
pub struct VerificationMatch {
    /// Relay the note was received from
    pub relay: RelayUrl,
    /// The note
    pub event: Event,
}

impl VerificationMatch {
    /// Creation time of the note, unix seconds
    pub fn created_at(&self) -> u64 {
        self.event.created_at()
    }

    /// Note content
    pub fn content(&self) -> &str {
        self.event.content()
    }
}

/// What one relay returned
#[derive(Clone, Debug)]
pub struct RelayCheck {
    /// Relay queried
    pub relay: RelayUrl,
    /// Matches in arrival order
    pub matches: Vec<VerificationMatch>,
    /// Why the check ended early, if it did
    pub error: Option<String>,
    /// Time spent on this relay
    pub elapsed: Duration,
}

impl RelayCheck {
    /// Whether any note was found on this relay
    pub fn found(&self) -> bool {
        !self.matches.is_empty()
    }
}

/// Merged results of a verification
///
/// Relay checks appear in completion order.
#[derive(Clone, Debug, Default)]
pub struct VerifyReport {
    checks: Vec<RelayCheck>,
}

impl VerifyReport {
    /// Build a report from per-relay checks
    pub fn new(checks: Vec<RelayCheck>) -> Self {
        VerifyReport { checks }
    }

    /// Per-relay results
    pub fn checks(&self) -> &[RelayCheck] {
        &self.checks
    }

    /// Result for one relay
    pub fn check(&self, relay: &str) -> Option<&RelayCheck> {
        self.checks.iter().find(|c| c.relay.as_str() == relay)
    }

    /// Every match across all relays
    pub fn matches(&self) -> impl Iterator<Item = &VerificationMatch> {
        self.checks.iter().flat_map(|c| c.matches.iter())
    }

    /// Total matches across all relays
    pub fn total(&self) -> usize {
        self.checks.iter().map(|c| c.matches.len()).sum()
    }

    /// Number of relays where at least one note was found
    pub fn relays_with_matches(&self) -> usize {
        self.checks.iter().filter(|c| c.found()).count()
    }
}

/// Verification errors
#[derive(Error, Debug)]
pub enum VerifyError {
    /// The relay list was empty
    #[error("No relays to verify against")]
    NoEndpoints,
}

/// Queries many relays for an author's notes
pub struct Verifier<C> {
    connector: C,
    config: FanOutConfig,
}

impl<C: Connector> Verifier<C> {
    /// Create a verifier
    pub fn new(connector: C, config: FanOutConfig) -> Self {
        Verifier { connector, config }
    }

    /// Look for recent notes by `author` on every relay
    ///
    /// Finding nothing is a valid result: notes may not have propagated
    /// yet, relays may have refused them, or the key may be wrong.
    pub async fn verify(
        &self,
        author: &PublicKey,
        relays: &[RelayUrl],
        cancel: &CancellationToken,
    ) -> Result<VerifyReport, VerifyError> {
        if relays.is_empty() {
            return Err(VerifyError::NoEndpoints);
        }

        let filter = Filter {
            authors: vec![author.to_hex()],
            kinds: vec![KIND_TEXT_NOTE],
            limit: Some(self.config.verify_limit),
        };
        let workers = self.config.workers_for(relays.len());
        info!(author = %author, relays = relays.len(), workers, "verifying");

        let checks: Vec<RelayCheck> = stream::iter(relays)
            .map(|relay| self.check(author, &filter, relay, cancel))
            .buffer_unordered(workers)
            .collect()
            .await;

        let report = VerifyReport::new(checks);
        info!(
            total = report.total(),
            relays_with_matches = report.relays_with_matches(),
            "verify finished"
        );
        Ok(report)
    }

    async fn check(
        &self,
        author: &PublicKey,
        filter: &Filter,
        relay: &RelayUrl,
        cancel: &CancellationToken,
    ) -> RelayCheck {
        let started = Instant::now();
        let mut check = RelayCheck {
            relay: relay.clone(),
            matches: Vec::new(),
            error: None,
            elapsed: Duration::ZERO,
        };

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
            Err(cause) => {
                warn!(relay = %relay, %cause, "verify connection failed");
                check.error = Some(format!("connection failed: {cause}"));
                check.elapsed = started.elapsed();
                return check;
            }
        };

        // The time box starts once connected and covers subscribe and collect
        let deadline = Instant::now() + self.config.collect_timeout;
        let subscription_id = format!("nos-verify-{:08x}", rand::random::<u32>());

        let subscribed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err("cancelled".to_string()),
            result = timeout_at(deadline, conn.subscribe(&subscription_id, filter)) => {
                match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(format!("subscription failed: {e}")),
                    Err(_) => Err("subscription failed: timed out".to_string()),
                }
            }
        };

        match subscribed {
            Ok(()) => {
                check.error = self
                    .collect(conn.as_mut(), author, relay, deadline, cancel, &mut check.matches)
                    .await;
                if let Err(_) | Ok(Err(_)) =
                    timeout(self.config.close_timeout, conn.unsubscribe(&subscription_id)).await
                {
                    debug!(relay = %relay, "unsubscribe failed");
                }
            }
            Err(cause) => check.error = Some(cause),
        }

        if let Err(_) | Ok(Err(_)) = timeout(self.config.close_timeout, conn.close()).await {
            debug!(relay = %relay, "close failed");
        }

        if let Some(cause) = &check.error {
            warn!(relay = %relay, %cause, "verify check incomplete");
        }
        debug!(relay = %relay, found = check.matches.len(), "verify check done");
        check.elapsed = started.elapsed();
        check
    }

    /// Gather matches until the deadline, end of stored events, a close,
    /// cancellation, or the limit, whichever comes first
    async fn collect(
        &self,
        conn: &mut dyn RelayConnection,
        author: &PublicKey,
        relay: &RelayUrl,
        deadline: Instant,
        cancel: &CancellationToken,
        matches: &mut Vec<VerificationMatch>,
    ) -> Option<String> {
        while matches.len() < self.config.verify_limit {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Some("cancelled".to_string()),
                _ = sleep_until(deadline) => {
                    debug!(relay = %relay, "collection time box elapsed");
                    return None;
                }
                item = conn.next_item() => item,
            };

            match item {
                Ok(SubscriptionItem::Event(event)) => {
                    if !event.is_authored_by(author) {
                        debug!(relay = %relay, event = %event.id(), "dropping note by another author");
                    } else if let Err(e) = event.verify() {
                        debug!(relay = %relay, event = %event.id(), error = %e, "dropping invalid note");
                    } else {
                        matches.push(VerificationMatch {
                            relay: relay.clone(),
                            event,
                        });
                    }
                }
                Ok(SubscriptionItem::EndOfStoredEvents) => return None,
                Ok(SubscriptionItem::Closed(reason)) => {
                    debug!(relay = %relay, %reason, "subscription closed by relay");
                    return None;
                }
                Err(e) => return Some(format!("query failed: {e}")),
            }
        }
        None
    }
}
