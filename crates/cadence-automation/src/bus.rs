//! Event bus adapter — thin mpsc seam between event producers and the
//! orchestrator. Independent events are processed concurrently; ordering
//! between different events is explicitly not guaranteed.

use std::sync::Arc;

use tokio::sync::mpsc;

use cadence_core::{CadenceError, DomainEvent, Result};

use crate::orchestrator::Orchestrator;

/// Producer-side handle. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<DomainEvent>,
}

impl EventBus {
    /// Create a bounded bus; the receiver goes to `spawn_consumer`.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DomainEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Enqueue a domain event for processing.
    pub async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|e| CadenceError::store(format!("event bus closed: {e}")))
    }
}

/// Consume events until the bus closes, handing each to the orchestrator
/// on its own task.
pub async fn run_consumer(mut rx: mpsc::Receiver<DomainEvent>, orchestrator: Arc<Orchestrator>) {
    tracing::info!("📨 Event bus consumer started");
    while let Some(event) = rx.recv().await {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            orchestrator.handle_event(&event).await;
        });
    }
    tracing::info!("📨 Event bus consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::TriggerEvent;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let (bus, mut rx) = EventBus::new(8);
        let event = DomainEvent::new("t1", TriggerEvent::TodoCreated, serde_json::json!({}));
        bus.publish(event.clone()).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, event.id);
    }

    #[tokio::test]
    async fn test_publish_after_close_errors() {
        let (bus, rx) = EventBus::new(1);
        drop(rx);
        let event = DomainEvent::new("t1", TriggerEvent::TodoCreated, serde_json::json!({}));
        assert!(bus.publish(event).await.is_err());
    }
}
