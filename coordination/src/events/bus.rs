//! Event bus for run observers
//!
//! Pub/sub over a Tokio broadcast channel. Publishing never blocks and never
//! fails because nobody is listening; slow subscribers lag and skip.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use super::types::{ForgeEvent, Phase};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<ForgeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers. Returns how many received it.
    pub fn publish(&self, event: ForgeEvent) -> usize {
        let event_type = event.event_type();
        let receivers = self.sender.send(event).unwrap_or(0);
        debug!(event_type, receivers, "Event published");
        receivers
    }

    /// Publish, discarding the receiver count.
    pub fn emit(&self, event: ForgeEvent) {
        self.publish(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ForgeEvent> {
        self.sender.subscribe()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub run_id: Option<String>,
    pub phases: Option<Vec<Phase>>,
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(mut self, run_id: &str) -> Self {
        self.run_id = Some(run_id.to_string());
        self
    }

    pub fn phases(mut self, phases: Vec<Phase>) -> Self {
        self.phases = Some(phases);
        self
    }

    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    pub fn matches(&self, event: &ForgeEvent) -> bool {
        if let Some(ref rid) = self.run_id {
            if let Some(event_rid) = event.run_id() {
                if event_rid != rid {
                    return false;
                }
            }
        }

        if let Some(ref phases) = self.phases {
            if let Some(phase) = event.phase() {
                if !phases.contains(&phase) {
                    return false;
                }
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        true
    }
}

/// Filtered event receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<ForgeEvent>,
    filter: EventFilter,
}

impl FilteredReceiver {
    pub fn new(receiver: broadcast::Receiver<ForgeEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<ForgeEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// Extension trait for subscribing with filters
pub trait EventBusExt {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

impl EventBusExt for SharedEventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn file_event(run_id: &str, path: &str) -> ForgeEvent {
        ForgeEvent::FileGenerated {
            run_id: run_id.to_string(),
            path: path.to_string(),
            progress: 0.5,
            eta_secs: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        assert_eq!(
            bus.publish(ForgeEvent::progress(Phase::Planning, "planning", None)),
            1
        );

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.event_type(), "progress");
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        assert!(!bus.has_subscribers());
        assert_eq!(bus.publish(file_event("r", "a.rs")), 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new().shared();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert!(bus.has_subscribers());

        assert_eq!(bus.publish(file_event("run-1", "src/a.rs")), 2);

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.event_type(), e2.event_type());
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::new()
            .run("run-1")
            .types(vec!["file_generated"]);

        assert!(filter.matches(&file_event("run-1", "a.rs")));
        assert!(!filter.matches(&file_event("run-2", "a.rs")));
        assert!(!filter.matches(&ForgeEvent::progress(Phase::Build, "b", None)));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let bus = EventBus::new();
        let mut filtered = bus.subscribe_filtered(EventFilter::new().phases(vec![Phase::Fix]));

        tokio::spawn(async move {
            bus.emit(ForgeEvent::progress(Phase::Build, "building", None));
            bus.emit(ForgeEvent::progress(Phase::Fix, "fixing", None));
        });

        let event = filtered.recv().await.unwrap();
        assert_eq!(event.phase(), Some(Phase::Fix));
    }
}
