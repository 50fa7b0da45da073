use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-slot booking events; feeds the SSE endpoint that
/// live dashboards subscribe to. Sends are post-commit and fire-and-forget.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a slot. Creates the channel if needed.
    pub fn subscribe(&self, slot_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(slot_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, slot_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&slot_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel once its slot is deleted; live subscriber streams end.
    pub fn remove(&self, slot_id: &Ulid) {
        self.channels.remove(slot_id);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}
