//! Event broker.
//!
//! Single dispatch task that owns the subscriber registry and fans published
//! events out to every subscriber:
//!
//! - **Publish**: bounded queue into the dispatcher; a full queue makes the
//!   publisher wait
//! - **Delivery**: non-blocking per subscriber; a full subscriber channel drops
//!   the event for that subscriber only
//! - **Subscribe/Unsubscribe**: control requests, always applied before the
//!   next queued publish

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::station::types::{ArchiveRecord, LoopSample};

// =============================================================================
// Constants
// =============================================================================

/// Default depth of the broker's publish queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

/// Default capacity of each subscriber's delivery channel.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 8;

// =============================================================================
// Types
// =============================================================================

/// A domain event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum Event {
    /// A record was added to the archive.
    Archive(ArchiveRecord),
    /// A loop sample was accepted.
    Loop(LoopSample),
}

impl Event {
    /// Event name used by subscribers to pick a renderer.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Archive(_) => "archive",
            Self::Loop(_) => "loop",
        }
    }
}

/// Broker errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The dispatch task is no longer running.
    #[error("event broker closed")]
    Closed,
}

/// Registry identity of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

enum Control {
    Subscribe {
        id: SubscriberId,
        name: String,
        tx: mpsc::Sender<Event>,
        dropped: Arc<AtomicU64>,
    },
    Unsubscribe(SubscriberId),
    Count(oneshot::Sender<usize>),
}

struct Entry {
    name: String,
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

// =============================================================================
// Broker
// =============================================================================

/// Handle to the event broker. Cheap to clone.
#[derive(Clone)]
pub struct Broker {
    events: mpsc::Sender<Event>,
    control: mpsc::UnboundedSender<Control>,
    subscriber_capacity: usize,
    next_id: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("subscriber_capacity", &self.subscriber_capacity)
            .field("dropped", &self.dropped_events())
            .finish_non_exhaustive()
    }
}

impl Broker {
    /// Spawn the dispatch task on the current Tokio runtime.
    ///
    /// The task runs until every `Broker` handle has been dropped.
    pub fn new(queue_depth: usize, subscriber_capacity: usize) -> Self {
        let (events_tx, events_rx) = mpsc::channel(queue_depth.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let dropped = Arc::new(AtomicU64::new(0));

        let dispatcher = Dispatcher {
            events: events_rx,
            control: control_rx,
            subs: HashMap::new(),
            dropped: Arc::clone(&dropped),
        };
        tokio::spawn(dispatcher.run());

        Self {
            events: events_tx,
            control: control_tx,
            subscriber_capacity: subscriber_capacity.max(1),
            next_id: Arc::new(AtomicU64::new(0)),
            dropped,
        }
    }

    /// Spawn a broker with the default queue and subscriber sizes.
    pub fn default_sized() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Register a subscriber and return its private delivery channel.
    ///
    /// Dropping the [`Subscription`] unsubscribes it.
    pub fn subscribe(&self, name: impl Into<String>) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        let (tx, rx) = mpsc::channel(self.subscriber_capacity);
        let dropped = Arc::new(AtomicU64::new(0));

        if self
            .control
            .send(Control::Subscribe {
                id,
                name: name.clone(),
                tx,
                dropped: Arc::clone(&dropped),
            })
            .is_err()
        {
            tracing::warn!(subscriber = %name, "Event broker closed, subscription will never receive events");
        }

        Subscription {
            id,
            name,
            rx,
            dropped,
            control: self.control.clone(),
            registered: true,
        }
    }

    /// Remove a subscriber. No further events are delivered to it.
    pub fn unsubscribe(&self, subscription: &mut Subscription) {
        subscription.unsubscribe();
    }

    /// Queue an event for delivery, waiting while the publish queue is full.
    pub async fn publish(&self, event: Event) -> Result<(), BrokerError> {
        self.events.send(event).await.map_err(|_| BrokerError::Closed)
    }

    /// Total events dropped across all subscribers because their channel was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of registered subscribers.
    pub async fn subscriber_count(&self) -> Result<usize, BrokerError> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Control::Count(tx))
            .map_err(|_| BrokerError::Closed)?;
        rx.await.map_err(|_| BrokerError::Closed)
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// A registered subscriber's end of the broker.
///
/// Events already buffered when the subscription is removed can still be
/// drained; after that the channel reports closed.
pub struct Subscription {
    id: SubscriberId,
    name: String,
    rx: mpsc::Receiver<Event>,
    dropped: Arc<AtomicU64>,
    control: mpsc::UnboundedSender<Control>,
    registered: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next event. `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take the next event if one is buffered.
    pub fn try_recv(&mut self) -> Result<Event, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }

    /// Events dropped for this subscriber because its channel was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Remove this subscriber from the broker. Idempotent.
    pub fn unsubscribe(&mut self) {
        if std::mem::take(&mut self.registered) {
            // A closed broker has no registry left to clean up.
            let _ = self.control.send(Control::Unsubscribe(self.id));
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("registered", &self.registered)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

struct Dispatcher {
    events: mpsc::Receiver<Event>,
    control: mpsc::UnboundedReceiver<Control>,
    subs: HashMap<SubscriberId, Entry>,
    dropped: Arc<AtomicU64>,
}

impl Dispatcher {
    async fn run(mut self) {
        tracing::debug!("Event broker started");

        loop {
            tokio::select! {
                biased;

                Some(ctl) = self.control.recv() => self.handle_control(ctl),
                event = self.events.recv() => match event {
                    Some(event) => {
                        // Apply any control request queued before this publish.
                        while let Ok(ctl) = self.control.try_recv() {
                            self.handle_control(ctl);
                        }
                        self.fan_out(event);
                    }
                    None => break,
                },
            }
        }

        tracing::debug!(subscribers = self.subs.len(), "Event broker stopped");
    }

    fn handle_control(&mut self, ctl: Control) {
        match ctl {
            Control::Subscribe {
                id,
                name,
                tx,
                dropped,
            } => {
                tracing::debug!(subscriber = %name, %id, "Subscriber added");
                self.subs.insert(id, Entry { name, tx, dropped });
            }
            Control::Unsubscribe(id) => {
                if let Some(entry) = self.subs.remove(&id) {
                    tracing::debug!(subscriber = %entry.name, %id, "Subscriber removed");
                }
            }
            Control::Count(reply) => {
                let _ = reply.send(self.subs.len());
            }
        }
    }

    fn fan_out(&self, event: Event) {
        for (id, entry) in &self.subs {
            match entry.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    entry.dropped.fetch_add(1, Ordering::Relaxed);
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        subscriber = %entry.name,
                        %id,
                        event = event.name(),
                        "Subscriber is dropping events"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(subscriber = %entry.name, %id, "Subscriber channel closed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::types::Loop;
    use chrono::Utc;

    fn loop_event(sequence: u64) -> Event {
        Event::Loop(LoopSample {
            sequence,
            timestamp: Utc::now(),
            current: Loop::qc_minimum(),
        })
    }

    fn sequence(event: &Event) -> u64 {
        match event {
            Event::Loop(s) => s.sequence,
            Event::Archive(_) => panic!("expected loop event"),
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_isolated() {
        let broker = Broker::new(8, 8);
        let mut fast = broker.subscribe("127.0.0.1:1000");
        let mut slow = broker.subscribe("127.0.0.1:2000");

        for i in 0..9 {
            broker.publish(loop_event(i)).await.unwrap();
            let got = fast.recv().await.unwrap();
            assert_eq!(sequence(&got), i);
        }

        let mut slow_got = Vec::new();
        while let Ok(e) = slow.try_recv() {
            slow_got.push(sequence(&e));
        }
        assert_eq!(slow_got, (0..8).collect::<Vec<_>>());
        assert_eq!(slow.dropped(), 1);
        assert_eq!(fast.dropped(), 0);
        assert_eq!(broker.dropped_events(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broker = Broker::default_sized();
        let mut kept = broker.subscribe("kept");
        let mut removed = broker.subscribe("removed");

        broker.publish(loop_event(0)).await.unwrap();
        assert_eq!(sequence(&kept.recv().await.unwrap()), 0);
        assert_eq!(sequence(&removed.recv().await.unwrap()), 0);

        broker.unsubscribe(&mut removed);
        broker.publish(loop_event(1)).await.unwrap();
        assert_eq!(sequence(&kept.recv().await.unwrap()), 1);

        assert!(removed.try_recv().is_err());
        assert_eq!(broker.subscriber_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let broker = Broker::default_sized();
        {
            let _a = broker.subscribe("a");
            let _b = broker.subscribe("b");
            assert_eq!(broker.subscriber_count().await.unwrap(), 2);
        }
        assert_eq!(broker.subscriber_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let broker = Broker::default_sized();
        let mut sub = broker.subscribe("twice");
        sub.unsubscribe();
        sub.unsubscribe();
        drop(sub);
        assert_eq!(broker.subscriber_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let broker = Broker::default_sized();
        for i in 0..32 {
            broker.publish(loop_event(i)).await.unwrap();
        }
        assert_eq!(broker.dropped_events(), 0);
    }

    #[test]
    fn test_event_json_shape() {
        let event = Event::Archive(ArchiveRecord::new(Utc::now()));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "archive");
        assert!(json["data"]["timestamp"].is_string());
        assert_eq!(event.name(), "archive");
        assert_eq!(loop_event(0).name(), "loop");
    }
}
