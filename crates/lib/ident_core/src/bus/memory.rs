//! In-process [`EventBus`] with at-least-once semantics.
//!
//! A delivery stays in flight until acked. A new subscription to the queue
//! puts every in-flight delivery back at the head of the queue.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::event::{Acknowledge, Delivery, EventBus};

#[derive(Default)]
struct QueueState {
    ready: VecDeque<(u64, Vec<u8>)>,
    in_flight: BTreeMap<u64, Vec<u8>>,
    history: Vec<Vec<u8>>,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, QueueState>,
    next_id: u64,
    fail_publish: bool,
}

#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }

    /// Make every publish fail until switched off again.
    pub fn fail_publish(&self, fail: bool) {
        self.lock().fail_publish = fail;
    }

    /// Every payload ever published to `queue`.
    pub fn published(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.history.clone())
            .unwrap_or_default()
    }

    /// Deliveries not yet acked, queued or in flight.
    pub fn pending(&self, queue: &str) -> usize {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.ready.len() + q.in_flight.len())
            .unwrap_or_default()
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.fail_publish {
                return Err(Error::internal("publish", "bus unavailable"));
            }
            inner.next_id += 1;
            let id = inner.next_id;
            let state = inner.queues.entry(queue.to_string()).or_default();
            state.ready.push_back((id, payload.to_vec()));
            state.history.push(payload.to_vec());
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<BoxStream<'static, Result<Delivery>>> {
        {
            let mut inner = self.lock();
            let state = inner.queues.entry(queue.to_string()).or_default();
            let in_flight = std::mem::take(&mut state.in_flight);
            for (id, body) in in_flight.into_iter().rev() {
                state.ready.push_front((id, body));
            }
        }

        let bus = self.clone();
        let queue = queue.to_string();
        let deliveries = stream::unfold((bus, queue), |(bus, queue)| async move {
            loop {
                let notify = Arc::clone(&bus.notify);
                let notified = notify.notified();
                let next = {
                    let mut inner = bus.lock();
                    let state = inner.queues.entry(queue.clone()).or_default();
                    state.ready.pop_front().inspect(|(id, body)| {
                        state.in_flight.insert(*id, body.clone());
                    })
                };
                if let Some((id, body)) = next {
                    let acker = MemoryAck {
                        inner: Arc::clone(&bus.inner),
                        queue: queue.clone(),
                        id,
                    };
                    return Some((Ok(Delivery::new(body, Box::new(acker))), (bus, queue)));
                }
                notified.await;
            }
        });
        Ok(deliveries.boxed())
    }
}

struct MemoryAck {
    inner: Arc<Mutex<Inner>>,
    queue: String,
    id: u64,
}

#[async_trait]
impl Acknowledge for MemoryAck {
    async fn ack(&self) -> Result<()> {
        let mut inner = lock(&self.inner);
        if let Some(state) = inner.queues.get_mut(&self.queue) {
            state.in_flight.remove(&self.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unacked_delivery_is_redelivered_on_resubscribe() {
        let bus = MemoryBus::new();
        bus.publish("q", b"one").await.unwrap();
        bus.publish("q", b"two").await.unwrap();

        let mut first = bus.subscribe("q").await.unwrap();
        let d1 = first.next().await.unwrap().unwrap();
        assert_eq!(d1.body, b"one");
        drop(first);

        let mut second = bus.subscribe("q").await.unwrap();
        let again = second.next().await.unwrap().unwrap();
        assert_eq!(again.body, b"one");
        again.ack().await.unwrap();
        let d2 = second.next().await.unwrap().unwrap();
        assert_eq!(d2.body, b"two");
        d2.ack().await.unwrap();
        assert_eq!(bus.pending("q"), 0);
    }

    #[tokio::test]
    async fn subscriber_wakes_on_publish() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("q").await.unwrap();
        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            publisher.publish("q", b"late").await.unwrap();
        });
        let d = sub.next().await.unwrap().unwrap();
        assert_eq!(d.body, b"late");
    }

    #[tokio::test]
    async fn failing_publish_reports_internal() {
        let bus = MemoryBus::new();
        bus.fail_publish(true);
        assert!(bus.publish("q", b"x").await.is_err());
        assert!(bus.published("q").is_empty());
    }
}
