use serde_json::json;
use tokio::sync::broadcast;

use overseer_scheduler::{StatusPublisher, StatusSnapshot};

const BROADCAST_CAPACITY: usize = 256;

/// Fan-out events to all connected WS clients via tokio broadcast channel.
pub struct EventBroadcaster {
    tx: broadcast::Sender<String>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    /// New client subscribes to the broadcast stream.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Push a JSON event string to all subscribers.
    /// Silently drops if no subscribers exist.
    pub fn send(&self, payload: String) {
        let _ = self.tx.send(payload);
    }

    pub fn client_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Bridges the scheduler's publisher trait onto the WS broadcast channel.
/// A lagging or absent client never blocks the core; slow subscribers just
/// miss events.
pub struct BroadcastPublisher {
    broadcaster: std::sync::Arc<EventBroadcaster>,
}

impl BroadcastPublisher {
    pub fn new(broadcaster: std::sync::Arc<EventBroadcaster>) -> Self {
        Self { broadcaster }
    }
}

impl StatusPublisher for BroadcastPublisher {
    fn publish_status(&self, snapshot: &StatusSnapshot) {
        let payload = json!({ "type": "status", "data": snapshot }).to_string();
        self.broadcaster.send(payload);
    }

    fn publish_log_line(&self, line: &str) {
        let payload = json!({ "type": "log", "message": line }).to_string();
        self.broadcaster.send(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn status_event_shape() {
        let broadcaster = Arc::new(EventBroadcaster::new());
        let mut rx = broadcaster.subscribe();
        let publisher = BroadcastPublisher::new(broadcaster);

        publisher.publish_status(&StatusSnapshot::new());
        let payload = rx.try_recv().unwrap();
        let v: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(v["type"], "status");
        assert!(v["data"].is_object());
    }

    #[test]
    fn log_event_shape() {
        let broadcaster = Arc::new(EventBroadcaster::new());
        let mut rx = broadcaster.subscribe();
        let publisher = BroadcastPublisher::new(broadcaster);

        publisher.publish_log_line("[t1] hello");
        let payload = rx.try_recv().unwrap();
        let v: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(v["type"], "log");
        assert_eq!(v["message"], "[t1] hello");
    }

    #[test]
    fn send_without_subscribers_is_a_noop() {
        let broadcaster = EventBroadcaster::new();
        broadcaster.send("{}".to_string());
        assert_eq!(broadcaster.client_count(), 0);
    }
}
