//! Background workers that consume domain events.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::{Ctx, DEFAULT_TIMEOUT};
use crate::error::{ErrorKind, Result};
use crate::event::{Delivery, Event, EventBus, EventCode, QueueMap};
use crate::session::SessionManager;

const INITIAL_RETRY: Duration = Duration::from_millis(200);
const MAX_RETRY: Duration = Duration::from_secs(30);

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn code(&self) -> EventCode;

    async fn handle(&self, ctx: &Ctx, event: &Event) -> Result<()>;
}

/// `password-updated`: revoke every session of the user.
pub struct RevokeSessionsOnPasswordUpdate {
    sessions: Arc<SessionManager>,
}

impl RevokeSessionsOnPasswordUpdate {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl EventHandler for RevokeSessionsOnPasswordUpdate {
    fn code(&self) -> EventCode {
        EventCode::PasswordUpdated
    }

    async fn handle(&self, ctx: &Ctx, event: &Event) -> Result<()> {
        let user_id = event.user_id()?;
        self.sessions.revoke_all(ctx, user_id).await?;
        Ok(())
    }
}

/// `sign-up`: nothing to do here beyond a log line.
pub struct LogSignUp;

#[async_trait]
impl EventHandler for LogSignUp {
    fn code(&self) -> EventCode {
        EventCode::SignUp
    }

    async fn handle(&self, _ctx: &Ctx, event: &Event) -> Result<()> {
        tracing::info!(user_id = %event.data, "user signed up");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Acked,
    /// Handler failed on a transient error; the delivery stays pending.
    Retry,
}

/// One worker per queue that has a handler.
pub struct EventConsumer {
    bus: Arc<dyn EventBus>,
    queues: QueueMap,
    handlers: BTreeMap<EventCode, Arc<dyn EventHandler>>,
}

impl EventConsumer {
    pub fn new(bus: Arc<dyn EventBus>, queues: QueueMap) -> Self {
        Self {
            bus,
            queues,
            handlers: BTreeMap::new(),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(handler.code(), handler);
        self
    }

    /// Start the workers. They stop once `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut workers = Vec::new();
        for (code, queue) in self.queues.iter() {
            let Some(handler) = self.handlers.get(&code) else {
                tracing::debug!(%code, queue, "no handler registered, not consuming");
                continue;
            };
            let worker = Worker {
                bus: Arc::clone(&self.bus),
                queue: queue.to_string(),
                code,
                handler: Arc::clone(handler),
            };
            workers.push(tokio::spawn(worker.run(cancel.clone())));
        }
        workers
    }
}

struct Worker {
    bus: Arc<dyn EventBus>,
    queue: String,
    code: EventCode,
    handler: Arc<dyn EventHandler>,
}

impl Worker {
    async fn run(self, cancel: CancellationToken) {
        tracing::info!(queue = %self.queue, code = %self.code, "event consumer started");
        let mut retry = INITIAL_RETRY;
        'subscribe: while !cancel.is_cancelled() {
            let mut stream = match self.bus.subscribe(&self.queue).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(queue = %self.queue, error = %e, "subscribe failed");
                    if !pause(&cancel, &mut retry).await {
                        break;
                    }
                    continue;
                }
            };

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break 'subscribe,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(delivery)) => match self.process(&cancel, &delivery).await {
                        Outcome::Acked => retry = INITIAL_RETRY,
                        Outcome::Retry => break,
                    },
                    Some(Err(e)) => {
                        tracing::warn!(queue = %self.queue, error = %e, "event stream failed");
                        break;
                    }
                    None => break,
                }
            }

            if !pause(&cancel, &mut retry).await {
                break;
            }
        }
        tracing::info!(queue = %self.queue, "event consumer stopped");
    }

    async fn process(&self, cancel: &CancellationToken, delivery: &Delivery) -> Outcome {
        match Event::decode(&delivery.body) {
            Ok(event) if event.code == self.code => {
                let ctx = Ctx::with_token(cancel.child_token(), DEFAULT_TIMEOUT);
                match self.handler.handle(&ctx, &event).await {
                    Ok(()) => {}
                    // Redelivery cannot fix a malformed event.
                    Err(e) if e.kind() == ErrorKind::Validation => {
                        tracing::error!(queue = %self.queue, code = %event.code, error = %e, "invalid event, dropping");
                    }
                    Err(e) => {
                        tracing::error!(queue = %self.queue, code = %event.code, error = %e, "event handler failed");
                        return Outcome::Retry;
                    }
                }
            }
            Ok(event) => {
                tracing::warn!(queue = %self.queue, code = %event.code, "event on unexpected queue, dropping");
            }
            Err(e) => {
                tracing::warn!(queue = %self.queue, error = %e, "undecodable event, dropping");
            }
        }
        if let Err(e) = delivery.ack().await {
            tracing::warn!(queue = %self.queue, error = %e, "ack failed, event may be delivered again");
        }
        Outcome::Acked
    }
}

/// Sleep for the current retry delay and double it. False when cancelled.
async fn pause(cancel: &CancellationToken, retry: &mut Duration) -> bool {
    let delay = *retry;
    *retry = retry.saturating_mul(2).min(MAX_RETRY);
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemoryBus;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct Flaky {
        failures_left: AtomicUsize,
        handled: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for Flaky {
        fn code(&self) -> EventCode {
            EventCode::PasswordUpdated
        }

        async fn handle(&self, _ctx: &Ctx, _event: &Event) -> Result<()> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::internal("handle", "boom"));
            }
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn failed_handler_gets_the_event_again() {
        let bus = MemoryBus::new();
        let handler = Arc::new(Flaky {
            failures_left: AtomicUsize::new(1),
            handled: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        let workers = EventConsumer::new(Arc::new(bus.clone()), QueueMap::default())
            .with_handler(handler.clone())
            .spawn(cancel.clone());
        assert_eq!(workers.len(), 1);

        let body = Event::password_updated(Uuid::nil()).encode().unwrap();
        bus.publish("password-updated", &body).await.unwrap();

        eventually(|| handler.handled.load(Ordering::SeqCst) == 1).await;
        eventually(|| bus.pending("password-updated") == 0).await;

        cancel.cancel();
        for w in workers {
            w.await.unwrap();
        }
    }

    #[tokio::test]
    async fn garbage_is_acked_and_dropped() {
        let bus = MemoryBus::new();
        let handler = Arc::new(Flaky {
            failures_left: AtomicUsize::new(0),
            handled: AtomicUsize::new(0),
        });
        let cancel = CancellationToken::new();
        let workers = EventConsumer::new(Arc::new(bus.clone()), QueueMap::default())
            .with_handler(handler.clone())
            .spawn(cancel.clone());

        bus.publish("password-updated", b"not json").await.unwrap();
        eventually(|| bus.pending("password-updated") == 0 && bus.published("password-updated").len() == 1).await;
        assert_eq!(handler.handled.load(Ordering::SeqCst), 0);

        cancel.cancel();
        for w in workers {
            w.await.unwrap();
        }
    }

    /// Records the user id of every `password-updated` event it handles.
    #[derive(Default)]
    struct RecordUsers {
        users: std::sync::Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl EventHandler for RecordUsers {
        fn code(&self) -> EventCode {
            EventCode::PasswordUpdated
        }

        async fn handle(&self, _ctx: &Ctx, event: &Event) -> Result<()> {
            let user_id = event.user_id()?;
            self.users.lock().unwrap().push(user_id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn invalid_user_id_does_not_block_later_events() {
        let bus = MemoryBus::new();
        let handler = Arc::new(RecordUsers::default());
        let cancel = CancellationToken::new();
        let workers = EventConsumer::new(Arc::new(bus.clone()), QueueMap::default())
            .with_handler(handler.clone())
            .spawn(cancel.clone());

        let user_id = Uuid::new_v4();
        bus.publish("password-updated", br#"{"code":"password-updated","data":"oops"}"#)
            .await
            .unwrap();
        let body = Event::password_updated(user_id).encode().unwrap();
        bus.publish("password-updated", &body).await.unwrap();

        eventually(|| handler.users.lock().unwrap().len() == 1).await;
        eventually(|| bus.pending("password-updated") == 0).await;
        assert_eq!(*handler.users.lock().unwrap(), vec![user_id]);

        cancel.cancel();
        for w in workers {
            w.await.unwrap();
        }
    }
}
