//! [`EventBus`] over Redis Streams with consumer groups.
//!
//! Each queue is a stream. Publishing is `XADD <queue> * body <payload>`.
//! A subscription first drains this consumer's pending entries (`XREADGROUP`
//! from id `0`), then blocks on new ones (`>`). Entries stay pending until
//! acked with `XACK`, so a worker that fails or restarts sees them again.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadReply};

use crate::error::{Error, Result, redis_error};
use crate::event::{Acknowledge, Delivery, EventBus};

const BODY_FIELD: &str = "body";
const READ_COUNT: usize = 100;
const BLOCK_MS: usize = 5_000;

#[derive(Clone)]
pub struct RedisStreamBus {
    client: redis::Client,
    conn: ConnectionManager,
    group: String,
    consumer: String,
}

impl RedisStreamBus {
    pub async fn connect(url: &str, group: &str, consumer: &str) -> Result<Self> {
        const OP: &str = "connect event bus";
        let client = redis::Client::open(url).map_err(|e| redis_error(OP, e))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| redis_error(OP, e))?;
        Ok(Self {
            client,
            conn,
            group: group.to_string(),
            consumer: consumer.to_string(),
        })
    }

    /// Create the consumer group (and stream) if missing.
    async fn ensure_group(&self, queue: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let res = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(queue)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async::<_, ()>(&mut conn)
            .await;
        match res {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(redis_error("create consumer group", e)),
        }
    }
}

#[async_trait]
impl EventBus for RedisStreamBus {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("XADD")
            .arg(queue)
            .arg("*")
            .arg(BODY_FIELD)
            .arg(payload)
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| redis_error("publish", e))?;
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<BoxStream<'static, Result<Delivery>>> {
        self.ensure_group(queue).await?;
        // Blocking reads get their own connection so publishes are not held up.
        let reader = ConnectionManager::new(self.client.clone())
            .await
            .map_err(|e| redis_error("subscribe", e))?;

        let state = Subscription {
            reader,
            acker: self.conn.clone(),
            queue: queue.to_string(),
            group: self.group.clone(),
            consumer: self.consumer.clone(),
            cursor: Cursor::Pending("0".to_string()),
            buffer: VecDeque::new(),
        };
        Ok(stream::unfold(state, |mut state| async move {
            let item = state.next_delivery().await;
            Some((item, state))
        })
        .boxed())
    }
}

enum Cursor {
    /// Replaying this consumer's pending entries after the given id.
    Pending(String),
    /// Reading entries never delivered to the group.
    New,
}

struct Subscription {
    reader: ConnectionManager,
    acker: ConnectionManager,
    queue: String,
    group: String,
    consumer: String,
    cursor: Cursor,
    buffer: VecDeque<StreamId>,
}

impl Subscription {
    async fn next_delivery(&mut self) -> Result<Delivery> {
        loop {
            while let Some(entry) = self.buffer.pop_front() {
                if let Cursor::Pending(last) = &mut self.cursor {
                    *last = entry.id.clone();
                }
                match entry.get::<Vec<u8>>(BODY_FIELD) {
                    Some(body) => {
                        let acker = RedisAck {
                            conn: self.acker.clone(),
                            queue: self.queue.clone(),
                            group: self.group.clone(),
                            id: entry.id,
                        };
                        return Ok(Delivery::new(body, Box::new(acker)));
                    }
                    None => {
                        // Trimmed or foreign entry; nothing to hand out.
                        tracing::warn!(queue = %self.queue, id = %entry.id, "stream entry without body, acking");
                        let ack = RedisAck {
                            conn: self.acker.clone(),
                            queue: self.queue.clone(),
                            group: self.group.clone(),
                            id: entry.id,
                        };
                        ack.ack().await?;
                    }
                }
            }
            self.fill().await?;
        }
    }

    async fn fill(&mut self) -> Result<()> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(READ_COUNT);
        let id = match &self.cursor {
            Cursor::Pending(last) => last.clone(),
            Cursor::New => {
                cmd.arg("BLOCK").arg(BLOCK_MS);
                ">".to_string()
            }
        };
        cmd.arg("STREAMS").arg(&self.queue).arg(&id);

        let reply = cmd
            .query_async::<_, Option<StreamReadReply>>(&mut self.reader)
            .await
            .map_err(|e| redis_error("read stream", e))?;
        let entries: Vec<StreamId> = reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default();

        if entries.is_empty() {
            if let Cursor::Pending(_) = self.cursor {
                tracing::debug!(queue = %self.queue, "pending entries drained");
                self.cursor = Cursor::New;
            }
            return Ok(());
        }
        self.buffer.extend(entries);
        Ok(())
    }
}

struct RedisAck {
    conn: ConnectionManager,
    queue: String,
    group: String,
    id: String,
}

#[async_trait]
impl Acknowledge for RedisAck {
    async fn ack(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let acked = redis::cmd("XACK")
            .arg(&self.queue)
            .arg(&self.group)
            .arg(&self.id)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| redis_error("ack", e))?;
        if acked == 0 {
            return Err(Error::internal("ack", format!("entry {} was not pending", self.id)));
        }
        Ok(())
    }
}
