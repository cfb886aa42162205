use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::Notification;

#[allow(dead_code)]
const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for live notification delivery, one channel per recipient
/// username. The persisted inbox is the source of truth; this hub only lets
/// an embedding UI stream new notifications without polling.
pub struct NotifyHub {
    channels: DashMap<String, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a recipient's feed. Creates the channel if needed.
    pub fn subscribe(&self, recipient: &str) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(recipient.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Push a notification to its recipient. No-op if nobody is listening.
    pub fn send(&self, notification: &Notification) {
        if let Some(sender) = self.channels.get(&notification.recipient) {
            let _ = sender.send(notification.clone());
        }
    }

    /// Drop a recipient's channel.
    #[allow(dead_code)]
    pub fn remove(&self, recipient: &str) {
        self.channels.remove(recipient);
    }
}
