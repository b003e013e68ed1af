//! Demand-response event dispatch
//!
//! Creates events in the `pending` state, hands them to the outbound
//! [`EventSink`], and records the target's decision. An event moves out of
//! `pending` exactly once; the first decision wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::DrError;
use crate::types::{
    DecisionOutcome, DrEvent, EventDecision, EventId, EventInterval, EventNotice, OptType,
    ResourceId, SIGNAL_NAME_SIMPLE, SIGNAL_TYPE_LEVEL,
};

/// Outbound "create event" call towards the protocol layer
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn create_event(&self, notice: EventNotice) -> Result<(), DrError>;
}

/// Sink that forwards notices over a channel
pub struct ChannelSink {
    tx: mpsc::Sender<EventNotice>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EventNotice>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn create_event(&self, notice: EventNotice) -> Result<(), DrError> {
        self.tx
            .send(notice)
            .await
            .map_err(|_| DrError::Delivery("event channel closed".to_string()))
    }
}

/// Source of event identifiers
pub type IdSource = Box<dyn Fn() -> EventId + Send + Sync>;

#[derive(Default)]
struct EventTable {
    events: HashMap<EventId, DrEvent>,
    /// Creation order
    order: Vec<EventId>,
}

/// Event table and outbound dispatch
pub struct EventDispatcher {
    sink: Arc<dyn EventSink>,
    table: Mutex<EventTable>,
    id_source: IdSource,
}

impl EventDispatcher {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            table: Mutex::new(EventTable::default()),
            id_source: Box::new(|| Uuid::new_v4().to_string()),
        }
    }

    /// Replace the id generator
    pub fn with_id_source(mut self, source: IdSource) -> Self {
        self.id_source = source;
        self
    }

    /// Create a pending event for `resource_id` and emit it.
    ///
    /// A failed emission is logged and leaves the event pending and
    /// undelivered; the event id is still returned.
    pub async fn raise_event(
        &self,
        resource_id: &ResourceId,
        start: DateTime<Utc>,
        duration: Duration,
        payload: f64,
    ) -> Result<EventId, DrError> {
        let event_id = (self.id_source)();

        let event = DrEvent {
            event_id: event_id.clone(),
            resource_id: resource_id.clone(),
            signal_name: SIGNAL_NAME_SIMPLE.to_string(),
            signal_type: SIGNAL_TYPE_LEVEL.to_string(),
            intervals: vec![EventInterval {
                dtstart: start,
                duration,
                signal_payload: payload,
            }],
            created_at: Utc::now(),
            decision: EventDecision::Pending,
            decided_at: None,
            delivered: false,
        };
        let notice = event.notice();

        {
            let mut table = self.table.lock();
            if table.events.contains_key(&event_id) {
                error!(
                    "Dispatcher: Event id collision on {} (target {}), aborting request",
                    event_id, resource_id
                );
                return Err(DrError::EventIdCollision(event_id));
            }
            table.events.insert(event_id.clone(), event);
            table.order.push(event_id.clone());
        }

        info!(
            "Dispatcher: Raised event {} for {} ({}/{} payload={} for {:?})",
            event_id, resource_id, SIGNAL_TYPE_LEVEL, SIGNAL_NAME_SIMPLE, payload, duration
        );

        match self.sink.create_event(notice).await {
            Ok(()) => {
                if let Some(event) = self.table.lock().events.get_mut(&event_id) {
                    event.delivered = true;
                }
                debug!("Dispatcher: Delivered event {}", event_id);
            }
            Err(e) => {
                warn!("Dispatcher: Failed to deliver event {}: {}", event_id, e);
            }
        }

        Ok(event_id)
    }

    /// Record the target's decision. Only the first call per event has effect.
    pub fn record_decision(
        &self,
        event_id: &str,
        resource_id: &str,
        decision: OptType,
    ) -> Result<DecisionOutcome, DrError> {
        let mut table = self.table.lock();
        let event = table
            .events
            .get_mut(event_id)
            .ok_or_else(|| DrError::UnknownEvent(event_id.to_string()))?;

        if event.resource_id != resource_id {
            warn!(
                "Dispatcher: Decision for {} from {}, but it targets {}",
                event_id, resource_id, event.resource_id
            );
            return Err(DrError::TargetMismatch {
                event_id: event_id.to_string(),
                expected: event.resource_id.clone(),
                actual: resource_id.to_string(),
            });
        }

        match event.decision.opt() {
            None => {
                event.decision = decision.into();
                event.decided_at = Some(Utc::now());
                info!(
                    "Dispatcher: {} decided {} for event {}",
                    resource_id, decision, event_id
                );
                Ok(DecisionOutcome::Recorded(decision))
            }
            Some(stored) => {
                warn!(
                    "Dispatcher: AlreadyDecided event {} (stored {}, ignored {})",
                    event_id, stored, decision
                );
                Ok(DecisionOutcome::AlreadyDecided(stored))
            }
        }
    }

    /// Snapshot of one event
    pub fn get(&self, event_id: &str) -> Option<DrEvent> {
        self.table.lock().events.get(event_id).cloned()
    }

    /// All events in creation order
    pub fn events(&self) -> Vec<DrEvent> {
        let table = self.table.lock();
        table
            .order
            .iter()
            .filter_map(|id| table.events.get(id).cloned())
            .collect()
    }

    /// Events still awaiting a decision
    pub fn pending_count(&self) -> usize {
        self.table
            .lock()
            .events
            .values()
            .filter(|e| !e.decision.is_terminal())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    #[async_trait]
    impl EventSink for FailingSink {
        async fn create_event(&self, _notice: EventNotice) -> Result<(), DrError> {
            Err(DrError::Delivery("link down".to_string()))
        }
    }

    fn ten_minutes() -> Duration {
        Duration::from_secs(600)
    }

    #[tokio::test]
    async fn test_raise_event_emits_notice() {
        let (sink, mut rx) = ChannelSink::new(8);
        let dispatcher = EventDispatcher::new(Arc::new(sink));
        let target = "r1".to_string();

        let event_id = dispatcher
            .raise_event(&target, Utc::now(), ten_minutes(), 1.0)
            .await
            .unwrap();

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.event_id, event_id);
        assert_eq!(notice.signal_name, "simple");
        assert_eq!(notice.signal_type, "level");
        assert_eq!(notice.targets, vec![target]);
        assert_eq!(notice.intervals.len(), 1);
        assert_eq!(notice.intervals[0].signal_payload, 1.0);

        let event = dispatcher.get(&event_id).unwrap();
        assert_eq!(event.decision, EventDecision::Pending);
        assert!(event.delivered);
        assert_eq!(dispatcher.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_first_decision_wins() {
        let (sink, _rx) = ChannelSink::new(8);
        let dispatcher = EventDispatcher::new(Arc::new(sink));
        let target = "r1".to_string();
        let id = dispatcher
            .raise_event(&target, Utc::now(), ten_minutes(), 1.0)
            .await
            .unwrap();

        let first = dispatcher.record_decision(&id, "r1", OptType::OptIn).unwrap();
        assert_eq!(first, DecisionOutcome::Recorded(OptType::OptIn));

        let second = dispatcher.record_decision(&id, "r1", OptType::OptOut).unwrap();
        assert_eq!(second, DecisionOutcome::AlreadyDecided(OptType::OptIn));

        let event = dispatcher.get(&id).unwrap();
        assert_eq!(event.decision, EventDecision::OptIn);
        assert!(event.decided_at.is_some());
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_decisions_single_winner() {
        let (sink, _rx) = ChannelSink::new(8);
        let dispatcher = Arc::new(EventDispatcher::new(Arc::new(sink)));
        let id = dispatcher
            .raise_event(&"r1".to_string(), Utc::now(), ten_minutes(), 1.0)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let dispatcher = dispatcher.clone();
            let id = id.clone();
            let decision = if i % 2 == 0 { OptType::OptIn } else { OptType::OptOut };
            handles.push(tokio::spawn(async move {
                dispatcher.record_decision(&id, "r1", decision).unwrap()
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        let recorded: Vec<_> = outcomes
            .iter()
            .filter(|o| matches!(o, DecisionOutcome::Recorded(_)))
            .collect();
        assert_eq!(recorded.len(), 1);

        let stored = recorded[0].stored();
        assert!(outcomes.iter().all(|o| o.stored() == stored));
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, DecisionOutcome::AlreadyDecided(_)))
                .count(),
            15
        );
        assert_eq!(dispatcher.get(&id).unwrap().decision, EventDecision::from(stored));
    }

    #[tokio::test]
    async fn test_decision_rejections() {
        let (sink, _rx) = ChannelSink::new(8);
        let dispatcher = EventDispatcher::new(Arc::new(sink));
        let id = dispatcher
            .raise_event(&"r1".to_string(), Utc::now(), ten_minutes(), 1.0)
            .await
            .unwrap();

        assert!(matches!(
            dispatcher.record_decision("missing", "r1", OptType::OptIn),
            Err(DrError::UnknownEvent(_))
        ));
        assert!(matches!(
            dispatcher.record_decision(&id, "r2", OptType::OptOut),
            Err(DrError::TargetMismatch { .. })
        ));
        // Rejected calls do not consume the transition
        assert_eq!(
            dispatcher.record_decision(&id, "r1", OptType::OptOut).unwrap(),
            DecisionOutcome::Recorded(OptType::OptOut)
        );
    }

    #[tokio::test]
    async fn test_id_collision_is_fatal_for_request() {
        let (sink, mut rx) = ChannelSink::new(8);
        let dispatcher = EventDispatcher::new(Arc::new(sink))
            .with_id_source(Box::new(|| "fixed".to_string()));
        let target = "r1".to_string();

        dispatcher
            .raise_event(&target, Utc::now(), ten_minutes(), 1.0)
            .await
            .unwrap();
        dispatcher.record_decision("fixed", "r1", OptType::OptIn).unwrap();

        let second = dispatcher
            .raise_event(&target, Utc::now(), ten_minutes(), 1.0)
            .await;
        assert!(matches!(second, Err(DrError::EventIdCollision(id)) if id == "fixed"));

        // Existing record untouched, nothing extra emitted
        assert_eq!(dispatcher.events().len(), 1);
        assert_eq!(dispatcher.get("fixed").unwrap().decision, EventDecision::OptIn);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_undelivered_event_is_kept() {
        let dispatcher = EventDispatcher::new(Arc::new(FailingSink));
        let id = dispatcher
            .raise_event(&"r1".to_string(), Utc::now(), ten_minutes(), 1.0)
            .await
            .unwrap();

        let event = dispatcher.get(&id).unwrap();
        assert!(!event.delivered);
        assert_eq!(event.decision, EventDecision::Pending);
    }

    #[tokio::test]
    async fn test_events_in_creation_order() {
        let (sink, _rx) = ChannelSink::new(8);
        let counter = std::sync::atomic::AtomicU64::new(0);
        let dispatcher = EventDispatcher::new(Arc::new(sink)).with_id_source(Box::new(move || {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            format!("evt-{}", 9 - n)
        }));

        for _ in 0..3 {
            dispatcher
                .raise_event(&"r1".to_string(), Utc::now(), ten_minutes(), 1.0)
                .await
                .unwrap();
        }

        let ids: Vec<_> = dispatcher.events().into_iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec!["evt-9", "evt-8", "evt-7"]);
    }
}
