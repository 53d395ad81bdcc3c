//! Broadcast-based telemetry publisher.

use serde_json::Value;
use tokio::sync::broadcast;

/// A published telemetry event.
#[derive(Debug, Clone)]
pub struct TelemetryEvent {
    pub name: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

/// High-throughput publisher for cycle lifecycle events.
///
/// Publishing with no subscribers is not an error; the engine's behavior
/// must never depend on the telemetry sink.
#[derive(Debug, Clone)]
pub struct TelemetryPublisher {
    sender: broadcast::Sender<TelemetryEvent>,
}

impl TelemetryPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event_name: impl Into<String>, context: Value) {
        let event = TelemetryEvent {
            name: event_name.into(),
            context,
            published_at: chrono::Utc::now(),
        };

        // send() fails only when there are no subscribers, which is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for TelemetryPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
