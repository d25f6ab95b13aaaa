// Fan-out of screened trades to downstream viewers
pub mod server;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

pub const TRADE_EVENT: &str = "trade";

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    event: &'a str,
    data: &'a T,
}

/// Best-effort broadcast of named events, pre-serialized once per publish.
///
/// Receivers that fall behind by more than the channel capacity lose the
/// oldest frames; nothing is acknowledged or retried.
#[derive(Clone, Debug)]
pub struct Publisher {
    tx: broadcast::Sender<Arc<str>>,
}

impl Publisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Returns how many subscribers the frame was handed to.
    pub fn publish<T: Serialize>(&self, event: &str, data: &T) -> usize {
        let frame = match serde_json::to_string(&Envelope { event, data }) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event, error = %e, "failed to encode event");
                return 0;
            }
        };
        // No subscribers is not an error
        self.tx.send(Arc::from(frame)).unwrap_or(0)
    }
}
