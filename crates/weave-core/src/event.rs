use tokio::sync::broadcast;
use tracing::trace;

use crate::types::EngineEvent;

/// Room for the events of a wide ready set without the run logger lagging.
const DEFAULT_CAPACITY: usize = 256;

/// Broadcast channel for engine events.
///
/// Every subscriber sees every event published after it subscribed. A
/// subscriber that falls more than `capacity` events behind skips the oldest
/// ones and is told how many it missed.
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to current subscribers. Nobody listening is not an error.
    pub fn publish(&self, event: EngineEvent) {
        let kind = event.kind();
        match self.tx.send(event) {
            Ok(receivers) => trace!(kind, receivers, "Event published"),
            Err(_) => trace!(kind, "Event dropped, no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
