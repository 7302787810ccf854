use super::types::FlowEvent;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

/// Broadcast publisher for outbound lifecycle events
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event_id: Uuid,
    pub name: String,
    pub natural_key: String,
    pub event: FlowEvent,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to every current subscriber
    pub fn publish(&self, event: FlowEvent) -> Result<(), PublishError> {
        let context = serde_json::to_value(&event)?;
        let published = PublishedEvent {
            event_id: Uuid::new_v4(),
            name: event.event_name().to_string(),
            natural_key: event.natural_key(),
            event,
            context,
            published_at: chrono::Utc::now(),
        };

        trace!(event = %published.name, key = %published.natural_key, "Publishing event");

        // send() only fails when nobody is subscribed, which is fine
        match self.sender.send(published) {
            Ok(_) => Ok(()),
            Err(broadcast::error::SendError(_)) => Ok(()),
        }
    }

    /// Publish a batch in order
    pub fn publish_all(&self, events: impl IntoIterator<Item = FlowEvent>) -> Result<(), PublishError> {
        for event in events {
            self.publish(event)?;
        }
        Ok(())
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Error types for event publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}
