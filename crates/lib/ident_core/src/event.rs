//! Domain events and the bus contract that carries them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::Ctx;
use crate::error::{Error, OpContext, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventCode {
    #[serde(rename = "sign-up")]
    SignUp,
    #[serde(rename = "password-updated")]
    PasswordUpdated,
}

impl EventCode {
    pub const ALL: [EventCode; 2] = [EventCode::SignUp, EventCode::PasswordUpdated];

    pub fn as_str(self) -> &'static str {
        match self {
            EventCode::SignUp => "sign-up",
            EventCode::PasswordUpdated => "password-updated",
        }
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EventCode::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::validation("parse event code", format!("unknown event code {s}")))
    }
}

/// Wire form: `{"code": "<code>", "data": "<string>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub code: EventCode,
    pub data: String,
}

impl Event {
    pub fn sign_up(user_id: Uuid) -> Self {
        Self {
            code: EventCode::SignUp,
            data: user_id.to_string(),
        }
    }

    pub fn password_updated(user_id: Uuid) -> Self {
        Self {
            code: EventCode::PasswordUpdated,
            data: user_id.to_string(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| Error::validation("decode event", e.to_string()))
    }

    /// The payload as a user id.
    pub fn user_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.data)
            .map_err(|_| Error::validation("decode event", "event data is not a user id"))
    }
}

/// Event code to queue name. The keys are the set of codes this process handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMap {
    queues: BTreeMap<EventCode, String>,
}

impl Default for QueueMap {
    fn default() -> Self {
        Self {
            queues: EventCode::ALL
                .into_iter()
                .map(|c| (c, c.as_str().to_string()))
                .collect(),
        }
    }
}

impl FromStr for QueueMap {
    type Err = Error;

    /// Parse `code=queue,code=queue`.
    fn from_str(s: &str) -> Result<Self> {
        const OP: &str = "parse queue map";

        let mut queues = BTreeMap::new();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (code, queue) = pair
                .split_once('=')
                .ok_or_else(|| Error::config(OP, format!("expected code=queue, got {pair}")))?;
            let code: EventCode = code
                .trim()
                .parse()
                .map_err(|e: Error| Error::config(OP, e.public_message().to_string()))?;
            let queue = queue.trim();
            if queue.is_empty() {
                return Err(Error::config(OP, format!("queue for {code} is empty")));
            }
            queues.insert(code, queue.to_string());
        }
        if queues.is_empty() {
            return Err(Error::config(OP, "queue map is empty"));
        }
        Ok(Self { queues })
    }
}

impl QueueMap {
    pub fn queue(&self, code: EventCode) -> Option<&str> {
        self.queues.get(&code).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EventCode, &str)> {
        self.queues.iter().map(|(c, q)| (*c, q.as_str()))
    }
}

/// Acknowledges one delivery to the broker.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<()>;
}

/// One message taken off a queue.
pub struct Delivery {
    pub body: Vec<u8>,
    acker: Box<dyn Acknowledge>,
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery").field("len", &self.body.len()).finish()
    }
}

impl Delivery {
    pub fn new(body: Vec<u8>, acker: Box<dyn Acknowledge>) -> Self {
        Self { body, acker }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack().await
    }
}

/// At-least-once message transport.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()>;

    /// Stream of deliveries. Unacked deliveries from an earlier subscription
    /// of this consumer are delivered again first.
    async fn subscribe(&self, queue: &str) -> Result<BoxStream<'static, Result<Delivery>>>;
}

/// Routes events to their queue on a shared bus.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
    queues: QueueMap,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn EventBus>, queues: QueueMap) -> Self {
        Self { bus, queues }
    }

    pub fn queues(&self) -> &QueueMap {
        &self.queues
    }

    pub async fn publish(&self, ctx: &Ctx, event: &Event) -> Result<()> {
        const OP: &str = "publish event";

        let queue = self
            .queues
            .queue(event.code)
            .ok_or_else(|| Error::internal(OP, format!("no queue configured for {}", event.code)))?;
        let body = event.encode()?;
        ctx.run(OP, self.bus.publish(queue, &body)).await.op(OP)?;
        tracing::debug!(code = %event.code, queue, "event published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemoryBus;
    use crate::error::ErrorKind;

    #[test]
    fn event_wire_format() {
        let id = Uuid::nil();
        let body = Event::password_updated(id).encode().unwrap();
        assert_eq!(
            String::from_utf8(body).unwrap(),
            r#"{"code":"password-updated","data":"00000000-0000-0000-0000-000000000000"}"#
        );
    }

    #[test]
    fn unknown_code_does_not_decode() {
        let err = Event::decode(br#"{"code":"deleted","data":"x"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn queue_map_parses_pairs() {
        let map: QueueMap = "sign-up=ident.sign-up, password-updated=ident.pw".parse().unwrap();
        assert_eq!(map.queue(EventCode::SignUp), Some("ident.sign-up"));
        assert_eq!(map.queue(EventCode::PasswordUpdated), Some("ident.pw"));
    }

    #[test]
    fn queue_map_rejects_unknown_codes() {
        let err = "deleted=q".parse::<QueueMap>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!("sign-up".parse::<QueueMap>().is_err());
        assert!("".parse::<QueueMap>().is_err());
    }

    #[tokio::test]
    async fn publisher_routes_by_code() {
        let bus = MemoryBus::new();
        let queues: QueueMap = "sign-up=welcome".parse().unwrap();
        let publisher = EventPublisher::new(Arc::new(bus.clone()), queues);
        let ctx = Ctx::background();

        publisher.publish(&ctx, &Event::sign_up(Uuid::nil())).await.unwrap();
        assert_eq!(bus.published("welcome").len(), 1);

        let err = publisher
            .publish(&ctx, &Event::password_updated(Uuid::nil()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
