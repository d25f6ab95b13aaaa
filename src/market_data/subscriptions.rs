use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::market_data::adapters::alpaca_types::ControlMessage;
use crate::market_data::feed::ControlChannel;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub subscribed: Vec<String>,
    pub unsubscribed: Vec<String>,
}

impl ReconcileOutcome {
    pub fn is_empty(&self) -> bool {
        self.subscribed.is_empty() && self.unsubscribed.is_empty()
    }
}

/// Owns the upstream trade subscription set and keeps it in line with the
/// latest candidate list by sending only the difference.
pub struct SubscriptionManager {
    channel: Arc<dyn ControlChannel>,
    current: Mutex<BTreeSet<String>>,
}

impl SubscriptionManager {
    pub fn new(channel: Arc<dyn ControlChannel>) -> Self {
        Self { channel, current: Mutex::new(BTreeSet::new()) }
    }

    /// Returns `None` when the connection is down; the next cycle retries.
    pub fn reconcile(&self, desired: &[String]) -> Option<ReconcileOutcome> {
        if !self.channel.is_open() {
            debug!(desired = desired.len(), "upstream not open, skipping reconcile");
            return None;
        }

        // Held across the sends so a concurrent resubscribe can't interleave
        let mut current = self.current.lock();
        let desired: BTreeSet<String> = desired.iter().cloned().collect();
        let outcome = ReconcileOutcome {
            unsubscribed: current.difference(&desired).cloned().collect(),
            subscribed: desired.difference(&current).cloned().collect(),
        };

        if !outcome.unsubscribed.is_empty() {
            let msg = ControlMessage::Unsubscribe { trades: outcome.unsubscribed.clone() };
            match self.channel.send(msg) {
                Ok(()) => info!(symbols = ?outcome.unsubscribed, "unsubscribed"),
                Err(e) => warn!(error = %e, "failed to send unsubscribe"),
            }
        }
        if !outcome.subscribed.is_empty() {
            let msg = ControlMessage::Subscribe { trades: outcome.subscribed.clone() };
            match self.channel.send(msg) {
                Ok(()) => info!(symbols = ?outcome.subscribed, "subscribed"),
                Err(e) => warn!(error = %e, "failed to send subscribe"),
            }
        }

        *current = desired;
        Some(outcome)
    }

    /// Replays the whole set; a fresh upstream session starts with nothing.
    pub fn resubscribe_all(&self) -> usize {
        let current = self.current.lock();
        if current.is_empty() || !self.channel.is_open() {
            return 0;
        }
        let trades: Vec<String> = current.iter().cloned().collect();
        let count = trades.len();
        match self.channel.send(ControlMessage::Subscribe { trades }) {
            Ok(()) => {
                info!(count, "resubscribed after reconnect");
                count
            }
            Err(e) => {
                warn!(error = %e, "failed to resubscribe");
                0
            }
        }
    }

    pub fn current(&self) -> Vec<String> {
        self.current.lock().iter().cloned().collect()
    }
}
