//! Broadcaster: fan-out of events to live SSE subscribers with filtering,
//! heartbeats, bounded capacity with oldest-eviction, and per-client write
//! isolation.
//!
//! Each subscriber gets its own outbound channel, forwarded via
//! `mpsc::Sender::try_send` so a slow consumer is dropped from, not
//! blocking, the producer; a separate task drives the periodic heartbeat.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::{Event, EventProjection, SubscriberFilter};

/// One SSE wire frame.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: &'static str,
    pub data: String,
}

impl SseFrame {
    pub fn event(name: &'static str, payload: &impl Serialize) -> Self {
        Self {
            event: name,
            data: serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string()),
        }
    }

    pub fn empty(name: &'static str) -> Self {
        Self {
            event: name,
            data: "{}".to_string(),
        }
    }

    /// Render as `event: <name>\ndata: <json>\n\n`.
    pub fn render(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

struct Subscriber {
    tx: mpsc::Sender<SseFrame>,
    filter: SubscriberFilter,
    verbose: bool,
}

/// Subscriber set plus insertion order, for bounded-capacity eviction.
///
/// Membership bookkeeping (insert/remove/order) lives behind one map; the
/// outbound write to each subscriber goes through its own channel so one
/// slow peer never blocks ingestion or another subscriber's delivery.
pub struct Broadcaster {
    clients: DashMap<Uuid, Subscriber>,
    order: parking_lot::Mutex<VecDeque<Uuid>>,
    max_clients: usize,
}

pub struct Subscription {
    pub id: Uuid,
    pub rx: mpsc::Receiver<SseFrame>,
}

impl Broadcaster {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: DashMap::new(),
            order: parking_lot::Mutex::new(VecDeque::new()),
            max_clients,
        }
    }

    /// Admit a new subscriber, evicting the oldest first if at capacity.
    pub fn subscribe(&self, filter: SubscriberFilter, verbose: bool) -> Subscription {
        if self.clients.len() >= self.max_clients {
            self.evict_oldest();
        }

        let (tx, rx) = mpsc::channel(256);
        let id = Uuid::new_v4();
        self.clients.insert(id, Subscriber { tx, filter, verbose });
        self.order.lock().push_back(id);

        tracing::info!(subscriber_id = %id, "subscriber admitted");
        Subscription { id, rx }
    }

    fn evict_oldest(&self) {
        let oldest = self.order.lock().pop_front();
        if let Some(id) = oldest {
            if let Some((_, sub)) = self.clients.remove(&id) {
                let _ = sub.tx.try_send(SseFrame::empty("close"));
                tracing::info!(subscriber_id = %id, "subscriber evicted (capacity)");
            }
        }
    }

    /// Remove a subscriber on disconnect/write-error.
    pub fn remove(&self, id: Uuid) {
        if self.clients.remove(&id).is_some() {
            self.order.lock().retain(|x| *x != id);
        }
    }

    /// Broadcast one event to every matching subscriber.
    /// Per-subscriber serialization differs by `verbose`; a write error
    /// evicts that subscriber only — delivery to others is unaffected.
    pub fn broadcast(&self, event: &Event) {
        let mut dead = Vec::new();
        for entry in self.clients.iter() {
            let id = *entry.key();
            let sub = entry.value();
            if !sub.filter.matches(event) {
                continue;
            }
            let frame = if sub.verbose {
                SseFrame::event("event", event)
            } else {
                let projection = EventProjection::from(event);
                SseFrame::event("event", &projection)
            };
            if sub.tx.try_send(frame).is_err() {
                dead.push(id);
            }
        }
        for id in dead {
            self.remove(id);
        }
    }

    /// Send a heartbeat `ping` frame to every subscriber.
    pub fn heartbeat(&self) {
        let mut dead = Vec::new();
        for entry in self.clients.iter() {
            if entry.value().tx.try_send(SseFrame::empty("ping")).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.remove(id);
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Stop the heartbeat timer (the caller owns the `JoinHandle`), send a
    /// `close` frame to everyone, and drop all state.
    pub fn shutdown(&self) {
        for entry in self.clients.iter() {
            let _ = entry.value().tx.try_send(SseFrame::empty("close"));
        }
        self.clients.clear();
        self.order.lock().clear();
    }
}

/// Spawn the periodic heartbeat task. Returns a handle the caller should
/// `abort()` on shutdown.
pub fn spawn_heartbeat(
    broadcaster: Arc<Broadcaster>,
    interval_ms: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;
            broadcaster.heartbeat();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Event, Severity};
    use chrono::Utc;

    fn make_event(seq: u64, task_id: Option<&str>) -> Event {
        Event {
            seq,
            schema_version: 1,
            source_version: "test".into(),
            id: Uuid::new_v4(),
            event_type: "task.submitted".into(),
            severity: Severity::Info,
            source: "test".into(),
            task_id: task_id.map(|s| s.to_string()),
            agent_id: None,
            trace_id: None,
            span_id: None,
            correlation_id: None,
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn eviction_admits_nth_plus_one_by_dropping_oldest() {
        let b = Broadcaster::new(3);
        let s1 = b.subscribe(SubscriberFilter::default(), true);
        let _s2 = b.subscribe(SubscriberFilter::default(), true);
        let _s3 = b.subscribe(SubscriberFilter::default(), true);
        assert_eq!(b.client_count(), 3);

        let _s4 = b.subscribe(SubscriberFilter::default(), true);
        assert_eq!(b.client_count(), 3);
        assert!(!b.clients.contains_key(&s1.id));
    }

    #[tokio::test]
    async fn matched_events_delivered_in_seq_order() {
        let b = Broadcaster::new(10);
        let filter = SubscriberFilter {
            task_id: Some("T".into()),
            ..Default::default()
        };
        let mut sub = b.subscribe(filter, true);

        b.broadcast(&make_event(1, Some("T")));
        b.broadcast(&make_event(2, Some("other")));
        b.broadcast(&make_event(3, Some("T")));

        let first = sub.rx.recv().await.unwrap();
        assert!(first.data.contains("\"seq\":1"));
        let second = sub.rx.recv().await.unwrap();
        assert!(second.data.contains("\"seq\":3"));
    }

    #[tokio::test]
    async fn heartbeat_continues_after_individual_eviction() {
        let b = Arc::new(Broadcaster::new(10));
        let mut sub1 = b.subscribe(SubscriberFilter::default(), true);
        let sub2 = b.subscribe(SubscriberFilter::default(), true);

        // Drop sub2's receiver to simulate a dead peer.
        drop(sub2);

        b.heartbeat();
        assert_eq!(b.client_count(), 1);

        let frame = sub1.rx.recv().await.unwrap();
        assert_eq!(frame.event, "ping");
    }
}
