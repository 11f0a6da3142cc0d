//! Wiring of the registries, the session manager and the event plumbing.

use std::sync::Arc;

use crate::bus::MemoryBus;
use crate::cache::MemoryClientCache;
use crate::client::{ClientCache, ClientRegistry, ClientStore};
use crate::consumer::{EventConsumer, LogSignUp, RevokeSessionsOnPasswordUpdate};
use crate::error::Result;
use crate::event::{EventBus, EventPublisher, QueueMap};
use crate::outbox::{OutboxRelay, OutboxStore, RelayConfig};
use crate::password::{PasswordCodec, PasswordPolicy};
use crate::session::{SessionManager, SessionStore};
use crate::store::MemoryStore;
use crate::strategy::StrategyRegistry;
use crate::token::{KeyPair, TokenIssuer, TokenSettings};
use crate::user::{UserRegistry, UserStore};

/// Backing services.
#[derive(Clone)]
pub struct Stores {
    pub clients: Arc<dyn ClientStore>,
    pub users: Arc<dyn UserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub outbox: Arc<dyn OutboxStore>,
    pub cache: Arc<dyn ClientCache>,
    pub bus: Arc<dyn EventBus>,
}

impl Stores {
    /// Every contract served by one store of type `S`.
    pub fn shared<S>(store: S, cache: Arc<dyn ClientCache>, bus: Arc<dyn EventBus>) -> Self
    where
        S: ClientStore + UserStore + SessionStore + OutboxStore + Clone + 'static,
    {
        Self {
            clients: Arc::new(store.clone()),
            users: Arc::new(store.clone()),
            sessions: Arc::new(store.clone()),
            outbox: Arc::new(store),
            cache,
            bus,
        }
    }

    pub fn memory(store: &MemoryStore, cache: &MemoryClientCache, bus: &MemoryBus) -> Self {
        Self::shared(store.clone(), Arc::new(cache.clone()), Arc::new(bus.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub password: PasswordPolicy,
    pub tokens: TokenSettings,
    pub signing_key: KeyPair,
    pub strategies: StrategyRegistry,
    pub queues: QueueMap,
}

pub struct Identity {
    pub clients: ClientRegistry,
    pub users: Arc<UserRegistry>,
    pub sessions: Arc<SessionManager>,
    stores: Stores,
    publisher: EventPublisher,
    queues: QueueMap,
}

impl Identity {
    pub fn new(stores: Stores, settings: Settings) -> Result<Self> {
        let codec = PasswordCodec::new(settings.password)?;
        let publisher = EventPublisher::new(Arc::clone(&stores.bus), settings.queues.clone());

        let clients = ClientRegistry::new(
            Arc::clone(&stores.clients),
            Arc::clone(&stores.cache),
            settings.strategies.clone(),
        );
        let users = Arc::new(UserRegistry::new(
            Arc::clone(&stores.users),
            Arc::clone(&stores.outbox),
            codec,
            publisher.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&stores.sessions),
            Arc::clone(&users),
            TokenIssuer::new(settings.tokens, settings.signing_key),
            settings.strategies,
        ));

        Ok(Self {
            clients,
            users,
            sessions,
            stores,
            publisher,
            queues: settings.queues,
        })
    }

    /// Consumer with the built-in handlers registered.
    pub fn consumer(&self) -> EventConsumer {
        EventConsumer::new(Arc::clone(&self.stores.bus), self.queues.clone())
            .with_handler(Arc::new(RevokeSessionsOnPasswordUpdate::new(Arc::clone(
                &self.sessions,
            ))))
            .with_handler(Arc::new(LogSignUp))
    }

    pub fn outbox_relay(&self, config: RelayConfig) -> OutboxRelay {
        OutboxRelay::new(Arc::clone(&self.stores.outbox), self.publisher.clone(), config)
    }
}
