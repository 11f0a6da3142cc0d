//! Transactional outbox for events that must not be lost.
//!
//! Rows are written in the same transaction as the state change they
//! describe. The writer publishes right after commit; [`OutboxRelay`] sweeps
//! up whatever is still unpublished after a grace period.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::context::Ctx;
use crate::error::Result;
use crate::event::{Event, EventCode, EventPublisher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub code: EventCode,
    pub data: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn new(event: &Event) -> Self {
        Self {
            id: crate::uuid::uuidv7(),
            code: event.code,
            data: event.data.clone(),
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            published_at: None,
        }
    }

    pub fn event(&self) -> Event {
        Event {
            code: self.code,
            data: self.data.clone(),
        }
    }
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Unpublished rows created before `older_than`, oldest first.
    async fn pending_outbox_events(&self, older_than: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxEvent>>;

    async fn mark_outbox_published(&self, id: Uuid) -> Result<()>;

    async fn record_outbox_failure(&self, id: Uuid, error: &str) -> Result<()>;

    /// Delete rows published before `published_before`; returns the count.
    async fn delete_published_outbox_events(&self, published_before: DateTime<Utc>) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    /// Rows younger than this are left to the writer's own publish.
    pub grace: Duration,
    pub max_backoff: Duration,
    pub batch_size: i64,
    /// Published rows are kept this long.
    pub retention: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            grace: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
            batch_size: 100,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    publisher: EventPublisher,
    config: RelayConfig,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn OutboxStore>, publisher: EventPublisher, config: RelayConfig) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    /// Poll until `cancel` fires. Failed rounds back off exponentially up to
    /// `max_backoff`; a clean round resets the delay.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!("outbox relay started");
        let mut delay = self.config.poll_interval;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            let ctx = Ctx::with_token(cancel.child_token(), crate::context::DEFAULT_TIMEOUT);
            delay = match self.relay_once(&ctx).await {
                Ok(report) if report.failed == 0 => self.config.poll_interval,
                Ok(report) => {
                    tracing::warn!(failed = report.failed, "outbox relay round had failures");
                    next_backoff(delay, self.config.max_backoff)
                }
                Err(e) => {
                    tracing::error!(error = %e, "outbox relay round failed");
                    next_backoff(delay, self.config.max_backoff)
                }
            };
        }
        tracing::info!("outbox relay stopped");
    }

    /// Publish one batch of pending rows, then prune rows published longer
    /// than `retention` ago.
    pub async fn relay_once(&self, ctx: &Ctx) -> Result<RelayReport> {
        let grace = chrono::Duration::from_std(self.config.grace).unwrap_or(chrono::Duration::zero());
        let pending = ctx
            .run(
                "load pending outbox events",
                self.store
                    .pending_outbox_events(Utc::now() - grace, self.config.batch_size),
            )
            .await?;

        let mut report = RelayReport::default();
        for row in pending {
            match self.publisher.publish(ctx, &row.event()).await {
                Ok(()) => {
                    ctx.run("mark outbox published", self.store.mark_outbox_published(row.id))
                        .await?;
                    report.published += 1;
                }
                Err(e) => {
                    tracing::warn!(event_id = %row.id, code = %row.code, attempts = row.attempts + 1, error = %e, "outbox publish failed");
                    ctx.run(
                        "record outbox failure",
                        self.store.record_outbox_failure(row.id, &e.to_string()),
                    )
                    .await?;
                    report.failed += 1;
                }
            }
        }
        if report.published > 0 {
            tracing::info!(published = report.published, "outbox events relayed");
        }

        let retention =
            chrono::Duration::from_std(self.config.retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        report.pruned = ctx
            .run(
                "prune published outbox events",
                self.store.delete_published_outbox_events(cutoff),
            )
            .await?;
        if report.pruned > 0 {
            tracing::debug!(pruned = report.pruned, "pruned published outbox events");
        }
        Ok(report)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub published: usize,
    pub failed: usize,
    pub pruned: u64,
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemoryBus;
    use crate::event::QueueMap;
    use crate::store::memory::MemoryStore;

    fn relay(store: &MemoryStore, bus: &MemoryBus) -> OutboxRelay {
        OutboxRelay::new(
            Arc::new(store.clone()),
            EventPublisher::new(Arc::new(bus.clone()), QueueMap::default()),
            RelayConfig {
                grace: Duration::ZERO,
                ..RelayConfig::default()
            },
        )
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let max = Duration::from_secs(10);
        assert_eq!(next_backoff(Duration::from_secs(2), max), Duration::from_secs(4));
        assert_eq!(next_backoff(Duration::from_secs(8), max), max);
    }

    #[tokio::test]
    async fn relay_publishes_pending_rows_once() {
        let store = MemoryStore::new();
        let bus = MemoryBus::new();
        store.push_outbox(OutboxEvent::new(&Event::password_updated(Uuid::nil())));

        let relay = relay(&store, &bus);
        let ctx = Ctx::background();
        let report = relay.relay_once(&ctx).await.unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(bus.published("password-updated").len(), 1);

        let report = relay.relay_once(&ctx).await.unwrap();
        assert_eq!(report, RelayReport::default());
    }

    #[tokio::test]
    async fn relay_records_failures_and_retries() {
        let store = MemoryStore::new();
        let bus = MemoryBus::new();
        let row = OutboxEvent::new(&Event::password_updated(Uuid::nil()));
        store.push_outbox(row.clone());
        bus.fail_publish(true);

        let relay = relay(&store, &bus);
        let ctx = Ctx::background();
        let report = relay.relay_once(&ctx).await.unwrap();
        assert_eq!(report.failed, 1);
        let pending = store.outbox_rows();
        assert_eq!(pending[0].attempts, 1);
        assert!(pending[0].last_error.is_some());

        bus.fail_publish(false);
        let report = relay.relay_once(&ctx).await.unwrap();
        assert_eq!(report.published, 1);
        assert!(store.outbox_rows()[0].published_at.is_some());
    }

    #[tokio::test]
    async fn relay_prunes_rows_past_retention() {
        let store = MemoryStore::new();
        let bus = MemoryBus::new();
        let mut old = OutboxEvent::new(&Event::password_updated(Uuid::nil()));
        old.published_at = Some(Utc::now() - chrono::Duration::days(8));
        let mut recent = OutboxEvent::new(&Event::password_updated(Uuid::nil()));
        recent.published_at = Some(Utc::now() - chrono::Duration::days(1));
        let pending = OutboxEvent::new(&Event::password_updated(Uuid::nil()));
        store.push_outbox(old);
        store.push_outbox(recent.clone());
        store.push_outbox(pending.clone());
        bus.fail_publish(true);

        let report = relay(&store, &bus).relay_once(&Ctx::background()).await.unwrap();
        assert_eq!(report.pruned, 1);
        let ids: Vec<Uuid> = store.outbox_rows().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![recent.id, pending.id]);
    }

    #[tokio::test]
    async fn relay_stops_on_cancel() {
        let store = MemoryStore::new();
        let bus = MemoryBus::new();
        let relay = relay(&store, &bus);
        let cancel = CancellationToken::new();
        cancel.cancel();
        relay.run(cancel).await;
    }
}
