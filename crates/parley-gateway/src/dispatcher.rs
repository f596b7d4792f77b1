use tokio::sync::broadcast;

use parley_types::events::GatewayEvent;

/// Process-wide event fan-out. Every connection subscribes to one broadcast
/// channel and filters events by its joined rooms; a slow consumer lags and
/// drops rather than blocking anyone else. Single-instance only — there is
/// no cross-process relay.
#[derive(Clone)]
pub struct Dispatcher {
    broadcast_tx: broadcast::Sender<GatewayEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self { broadcast_tx }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Fire-and-forget emit to all subscribers.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.broadcast_tx.send(event);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
