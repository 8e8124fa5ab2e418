// Copyright (c) 2026 MCP Gateway Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Typed in-process pub/sub (spec §4.2). Six fixed topics; each subscriber
//! gets its own bounded queue so a slow consumer can't block publishers —
//! on overflow the oldest queued event is dropped and a warning logged.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::warn;

use crate::domain::events::GatewayEvent;

/// Queue depth per subscriber (spec §4.2: "bounded queue (capacity 256)").
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// Bounded FIFO queue backing a single subscriber. Unlike a `tokio::sync::mpsc`
/// channel, the producer side can evict the oldest entry when the queue is
/// full, since nothing but a `Mutex<VecDeque<_>>` stands between it and the
/// data — an `mpsc::Sender` has no such access to a full channel's contents.
struct EventQueue {
    buffer: Mutex<VecDeque<GatewayEvent>>,
    notify: Notify,
    closed: AtomicBool,
}

impl EventQueue {
    fn new() -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(SUBSCRIBER_QUEUE_CAPACITY)),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Push `event`, evicting the oldest queued event first if at capacity.
    /// Returns `true` when an eviction happened.
    fn push(&self, event: GatewayEvent) -> bool {
        let mut buf = self.buffer.lock();
        let evicted = if buf.len() >= SUBSCRIBER_QUEUE_CAPACITY {
            buf.pop_front();
            true
        } else {
            false
        };
        buf.push_back(event);
        drop(buf);
        self.notify.notify_one();
        evicted
    }

    /// Wait for and pop the oldest queued event, or return `None` once the
    /// queue is closed and drained.
    async fn recv(&self) -> Option<GatewayEvent> {
        loop {
            {
                let mut buf = self.buffer.lock();
                if let Some(event) = buf.pop_front() {
                    return Some(event);
                }
                if self.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    fn try_recv(&self) -> Option<GatewayEvent> {
        self.buffer.lock().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SubscriberId(u64);

struct Subscriber {
    id: SubscriberId,
    topic: &'static str,
    queue: Arc<EventQueue>,
}

/// Handle returned by [`EventBus::subscribe`]; dropping or calling
/// [`Unsubscribe::unsubscribe`] removes the subscriber.
pub struct Unsubscribe {
    bus: EventBus,
    topic: &'static str,
    id: SubscriberId,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        self.bus.remove_subscriber(self.topic, self.id);
    }
}

/// Receiver half returned by [`EventBus::subscribe_channel`]. Pulls directly
/// from the subscriber's queue, so it shares the same drop-oldest overflow
/// policy as the closure-handler path in [`EventBus::subscribe`].
pub struct EventReceiver {
    queue: Arc<EventQueue>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Option<GatewayEvent> {
        self.queue.recv().await
    }

    pub fn try_recv(&mut self) -> Option<GatewayEvent> {
        self.queue.try_recv()
    }
}

#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<HashMap<&'static str, Vec<Subscriber>>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event to every current subscriber of its topic. Ordering
    /// per-subscriber-per-topic is preserved because the queue is FIFO and
    /// a single publisher call fully completes its pushes before returning.
    /// Delivery is best-effort and non-blocking: a full queue drops its
    /// oldest entry to make room for the new one, never blocks the publisher.
    pub fn emit(&self, event: GatewayEvent) {
        let topic = event.topic();
        let subs = self.subscribers.lock();
        let Some(list) = subs.get(topic) else {
            return;
        };
        for sub in list {
            if sub.queue.push(event.clone()) {
                warn!(
                    topic,
                    "subscriber queue full (capacity {SUBSCRIBER_QUEUE_CAPACITY}), dropped oldest event"
                );
            }
        }
    }

    /// Subscribe to one topic. `handler` runs on its own task, invoked once
    /// per delivered event in arrival order; the returned [`Unsubscribe`]
    /// tears the subscription down.
    pub fn subscribe<F, Fut>(&self, topic: &'static str, mut handler: F) -> Unsubscribe
    where
        F: FnMut(GatewayEvent) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let queue = Arc::new(EventQueue::new());
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));

        self.subscribers.lock().entry(topic).or_default().push(Subscriber {
            id,
            topic,
            queue: queue.clone(),
        });

        tokio::spawn(async move {
            while let Some(event) = queue.recv().await {
                handler(event).await;
            }
        });

        Unsubscribe {
            bus: self.clone(),
            topic,
            id,
        }
    }

    /// Subscribe and receive events directly, for callers (the notification
    /// service) that want to pump a `select!` loop rather than install a
    /// closure handler.
    pub fn subscribe_channel(&self, topic: &'static str) -> (Unsubscribe, EventReceiver) {
        let queue = Arc::new(EventQueue::new());
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().entry(topic).or_default().push(Subscriber {
            id,
            topic,
            queue: queue.clone(),
        });
        (
            Unsubscribe {
                bus: self.clone(),
                topic,
                id,
            },
            EventReceiver { queue },
        )
    }

    fn remove_subscriber(&self, topic: &'static str, id: SubscriberId) {
        if let Some(list) = self.subscribers.lock().get_mut(topic) {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                let removed = list.remove(pos);
                removed.queue.close();
            }
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self, topic: &'static str) -> usize {
        self.subscribers
            .lock()
            .get(topic)
            .map(|l| l.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mcp::{EndpointState, ServiceState};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn delivers_to_subscriber_on_matching_topic() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::channel(4);
        let _sub = bus.subscribe("endpoint:statusChanged", move |ev| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(ev).await;
            }
        });

        bus.emit(GatewayEvent::EndpointStatusChanged {
            endpoint: EndpointState::new("wss://hub.example.com"),
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic(), "endpoint:statusChanged");
    }

    #[tokio::test]
    async fn does_not_deliver_to_other_topics() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let _sub = bus.subscribe("service:statusChanged", move |_ev| {
            let count2 = count2.clone();
            async move {
                count2.fetch_add(1, Ordering::SeqCst);
            }
        });

        bus.emit(GatewayEvent::EndpointStatusChanged {
            endpoint: EndpointState::new("wss://hub.example.com"),
        });
        // Give the (non-existent) delivery a chance to run if it were wrongly wired.
        tokio::task::yield_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes_listener() {
        let bus = EventBus::new();
        let unsub = bus.subscribe("service:statusChanged", |_ev| async {});
        assert_eq!(bus.subscriber_count("service:statusChanged"), 1);
        unsub.unsubscribe();
        assert_eq!(bus.subscriber_count("service:statusChanged"), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let bus = EventBus::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        let _s1 = bus.subscribe("service:statusChanged", move |ev| {
            let tx1 = tx1.clone();
            async move {
                let _ = tx1.send(ev).await;
            }
        });
        let _s2 = bus.subscribe("service:statusChanged", move |ev| {
            let tx2 = tx2.clone();
            async move {
                let _ = tx2.send(ev).await;
            }
        });

        bus.emit(GatewayEvent::ServiceStatusChanged {
            service: ServiceState::new("filesystem"),
        });

        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn overflow_drops_oldest_event_and_keeps_newest() {
        let bus = EventBus::new();
        let (unsub, mut rx) = bus.subscribe_channel("service:statusChanged");

        // Fill the queue to capacity without anyone draining it, then push
        // one more: the oldest entry should be evicted, not the new one.
        for i in 0..SUBSCRIBER_QUEUE_CAPACITY {
            bus.emit(GatewayEvent::ServiceStatusChanged {
                service: ServiceState::new(format!("service-{i}")),
            });
        }
        bus.emit(GatewayEvent::ServiceStatusChanged {
            service: ServiceState::new("overflow"),
        });

        let first = rx.try_recv().expect("queue should still hold events");
        match first {
            GatewayEvent::ServiceStatusChanged { service } => {
                assert_eq!(service.name, "service-1");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let mut last = first;
        while let Some(ev) = rx.try_recv() {
            last = ev;
        }
        match last {
            GatewayEvent::ServiceStatusChanged { service } => {
                assert_eq!(service.name, "overflow");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        unsub.unsubscribe();
    }
}
