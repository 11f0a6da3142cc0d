//! Client registry: registration, revocation and credential lookup.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::context::Ctx;
use crate::error::{Error, ErrorKind, OpContext, Result};
use crate::strategy::StrategyRegistry;
use crate::token::{KeyPair, generate_keypair};

/// Per-client session policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientPolicy {
    pub access_token_ttl_minutes: i64,
    pub session_ttl_minutes: i64,
    pub max_active_sessions: i64,
    pub session_strategy: String,
}

impl ClientPolicy {
    /// Check the numeric bounds and that the strategy is allowed.
    pub fn validate(&self, strategies: &StrategyRegistry) -> Result<()> {
        const OP: &str = "validate client policy";

        if self.access_token_ttl_minutes < 1 {
            return Err(Error::validation(OP, "access_token_ttl must be at least 1"));
        }
        if self.session_ttl_minutes < 1 {
            return Err(Error::validation(OP, "session_ttl must be at least 1"));
        }
        if self.max_active_sessions < 1 {
            return Err(Error::validation(OP, "max_active_sessions must be at least 1"));
        }
        if self.session_ttl_minutes < self.access_token_ttl_minutes {
            return Err(Error::validation(
                OP,
                "session_ttl must not be shorter than access_token_ttl",
            ));
        }
        if !strategies.contains(&self.session_strategy) {
            return Err(Error::validation(
                OP,
                format!("unknown session_strategy {}", self.session_strategy),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub secret: Uuid,
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
    pub policy: ClientPolicy,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("revoked", &self.revoked)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// A new unrevoked client with a fresh id and secret.
    pub fn new(name: impl Into<String>, policy: ClientPolicy, keys: KeyPair) -> Self {
        let now = Utc::now();
        Self {
            id: crate::uuid::uuidv7(),
            name: name.into(),
            secret: crate::uuid::uuidv4(),
            public_key: keys.public,
            private_key: keys.private,
            policy,
            revoked: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Client record as held by the cache: the secret is replaced by its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedClient {
    pub id: Uuid,
    pub name: String,
    pub secret_digest: String,
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
    pub policy: ClientPolicy,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CachedClient {
    pub fn from_client(client: &Client) -> Self {
        Self {
            id: client.id,
            name: client.name.clone(),
            secret_digest: secret_digest(&client.secret),
            public_key: client.public_key.clone(),
            private_key: client.private_key.clone(),
            policy: client.policy.clone(),
            revoked: client.revoked,
            created_at: client.created_at,
            updated_at: client.updated_at,
        }
    }

    pub fn matches(&self, secret: &Uuid) -> bool {
        bool::from(
            self.secret_digest
                .as_bytes()
                .ct_eq(secret_digest(secret).as_bytes()),
        )
    }

    /// Rebuild a full client once the presented secret has matched.
    pub fn into_client(self, secret: Uuid) -> Client {
        Client {
            id: self.id,
            name: self.name,
            secret,
            public_key: self.public_key,
            private_key: self.private_key,
            policy: self.policy,
            revoked: self.revoked,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

fn secret_digest(secret: &Uuid) -> String {
    Sha256::digest(secret.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Relational client storage.
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// `DuplicateRecord` when the name (or secret) is taken.
    async fn insert_client(&self, client: &Client) -> Result<()>;

    /// `ResourceNotFound` when no client has this name and secret.
    async fn find_client(&self, name: &str, secret: Uuid) -> Result<Client>;

    /// Set `revoked = true`; `None` when the id is unknown.
    async fn revoke_client(&self, id: Uuid) -> Result<Option<Client>>;
}

/// Key-value cache of client records keyed by name.
///
/// Lookups only ever insert; the revoked record written on revocation stays
/// until it expires.
#[async_trait]
pub trait ClientCache: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<CachedClient>>;

    /// Insert unless a live entry for the name already exists.
    async fn put(&self, client: &CachedClient) -> Result<()>;

    /// Overwrite the entry with the revoked record.
    async fn put_revoked(&self, client: &CachedClient) -> Result<()>;
}

/// Registration request.
#[derive(Debug, Clone)]
pub struct ClientSpec {
    pub name: String,
    pub policy: ClientPolicy,
}

/// What a caller receives once, at registration.
#[derive(Debug, Clone)]
pub struct RegisteredClient {
    pub id: Uuid,
    pub secret: Uuid,
    pub public_key: Vec<u8>,
}

pub struct ClientRegistry {
    clients: Arc<dyn ClientStore>,
    cache: Arc<dyn ClientCache>,
    strategies: StrategyRegistry,
}

impl ClientRegistry {
    pub fn new(
        clients: Arc<dyn ClientStore>,
        cache: Arc<dyn ClientCache>,
        strategies: StrategyRegistry,
    ) -> Self {
        Self {
            clients,
            cache,
            strategies,
        }
    }

    pub fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }

    pub async fn register(&self, ctx: &Ctx, spec: ClientSpec) -> Result<RegisteredClient> {
        const OP: &str = "register client";

        let name = spec.name.trim();
        if name.is_empty() {
            return Err(Error::validation(OP, "name is required"));
        }
        spec.policy.validate(&self.strategies)?;

        let client = Client::new(name, spec.policy, generate_keypair());
        ctx.run("insert client", self.clients.insert_client(&client))
            .await
            .op(OP)?;

        tracing::info!(client = %client.name, client_id = %client.id, "client registered");
        Ok(RegisteredClient {
            id: client.id,
            secret: client.secret,
            public_key: client.public_key,
        })
    }

    /// Mark the client revoked and replace its cache entry with the revoked
    /// record, so a lookup that read the row before the update cannot cache
    /// it as live.
    pub async fn revoke(&self, ctx: &Ctx, id: Uuid) -> Result<()> {
        const OP: &str = "revoke client";

        let client = ctx
            .run("update client", self.clients.revoke_client(id))
            .await
            .op(OP)?
            .ok_or_else(|| Error::not_found(OP, "client not found"))?;
        ctx.run(
            "write revoked client to cache",
            self.cache.put_revoked(&CachedClient::from_client(&client)),
        )
            .await
            .op(OP)?;

        tracing::info!(client = %client.name, client_id = %client.id, "client revoked");
        Ok(())
    }

    /// Authenticate a client by name and secret, cache first.
    ///
    /// A revoked client is returned as-is; callers reject it.
    pub async fn get(&self, ctx: &Ctx, name: &str, secret: &str) -> Result<Client> {
        const OP: &str = "get client";

        if name.is_empty() || secret.is_empty() {
            return Err(Error::authentication(OP, "client credentials are required"));
        }
        let secret = Uuid::parse_str(secret)
            .map_err(|_| Error::authentication(OP, "invalid client credentials"))?;

        match ctx.run("read client cache", self.cache.get(name)).await {
            Ok(Some(cached)) if cached.matches(&secret) => return Ok(cached.into_client(secret)),
            Ok(_) => {}
            Err(e) if e.is_interrupted() => return Err(Error::wrap(OP, e)),
            Err(e) => tracing::warn!(client = %name, error = %e, "client cache read failed"),
        }

        let client = match ctx.run("find client", self.clients.find_client(name, secret)).await {
            Ok(client) => client,
            Err(e) if e.kind() == ErrorKind::ResourceNotFound => {
                return Err(e.reclassify(
                    ErrorKind::AuthenticationError,
                    OP,
                    "invalid client credentials",
                ));
            }
            Err(e) => return Err(Error::wrap(OP, e)),
        };

        if let Err(e) = ctx
            .run("write client cache", self.cache.put(&CachedClient::from_client(&client)))
            .await
        {
            tracing::warn!(client = %name, error = %e, "client cache write failed");
        }
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::MemoryClientCache;
    use crate::store::memory::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn policy() -> ClientPolicy {
        ClientPolicy {
            access_token_ttl_minutes: 10,
            session_ttl_minutes: 1440,
            max_active_sessions: 2,
            session_strategy: "revoke_old".into(),
        }
    }

    fn registry() -> (ClientRegistry, MemoryStore, MemoryClientCache) {
        let store = MemoryStore::new();
        let cache = MemoryClientCache::new(Duration::from_secs(60));
        let registry = ClientRegistry::new(
            Arc::new(store.clone()),
            Arc::new(cache.clone()),
            StrategyRegistry::with_builtin(),
        );
        (registry, store, cache)
    }

    fn spec(name: &str, policy: ClientPolicy) -> ClientSpec {
        ClientSpec {
            name: name.into(),
            policy,
        }
    }

    #[tokio::test]
    async fn register_then_get_populates_cache() {
        let (registry, _, cache) = registry();
        let ctx = Ctx::background();
        let reg = registry.register(&ctx, spec("c1", policy())).await.unwrap();
        assert_eq!(reg.public_key.len(), 32);

        let client = registry.get(&ctx, "c1", &reg.secret.to_string()).await.unwrap();
        assert_eq!(client.id, reg.id);
        let cached = cache.get("c1").await.unwrap().unwrap();
        assert!(cached.matches(&reg.secret));

        let again = registry.get(&ctx, "c1", &reg.secret.to_string()).await.unwrap();
        assert_eq!(again, client);
    }

    #[tokio::test]
    async fn equal_ttls_are_allowed() {
        let (registry, _, _) = registry();
        let mut p = policy();
        p.session_ttl_minutes = p.access_token_ttl_minutes;
        assert!(registry.register(&Ctx::background(), spec("c1", p)).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_policies_are_rejected() {
        let (registry, _, _) = registry();
        let ctx = Ctx::background();
        let cases = [
            ClientPolicy { access_token_ttl_minutes: 0, ..policy() },
            ClientPolicy { max_active_sessions: 0, ..policy() },
            ClientPolicy { access_token_ttl_minutes: 20, session_ttl_minutes: 10, ..policy() },
            ClientPolicy { session_strategy: "deny_new".into(), ..policy() },
        ];
        for p in cases {
            let err = registry.register(&ctx, spec("c1", p)).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        let err = registry.register(&ctx, spec("  ", policy())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let (registry, _, _) = registry();
        let ctx = Ctx::background();
        registry.register(&ctx, spec("c1", policy())).await.unwrap();
        let err = registry.register(&ctx, spec("c1", policy())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateRecord);
    }

    #[tokio::test]
    async fn wrong_secret_is_authentication_error() {
        let (registry, _, _) = registry();
        let ctx = Ctx::background();
        let reg = registry.register(&ctx, spec("c1", policy())).await.unwrap();
        registry.get(&ctx, "c1", &reg.secret.to_string()).await.unwrap();

        for secret in [Uuid::new_v4().to_string(), "garbage".to_string(), String::new()] {
            let err = registry.get(&ctx, "c1", &secret).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AuthenticationError);
        }
    }

    #[tokio::test]
    async fn revoke_replaces_cached_record() {
        let (registry, _, cache) = registry();
        let ctx = Ctx::background();
        let reg = registry.register(&ctx, spec("c1", policy())).await.unwrap();
        registry.get(&ctx, "c1", &reg.secret.to_string()).await.unwrap();

        registry.revoke(&ctx, reg.id).await.unwrap();
        assert!(cache.get("c1").await.unwrap().unwrap().revoked);

        let client = registry.get(&ctx, "c1", &reg.secret.to_string()).await.unwrap();
        assert!(client.revoked);
    }

    /// Client store whose next `find_client` stops after reading the row
    /// until released.
    struct PausingStore {
        inner: MemoryStore,
        pause: AtomicBool,
        read_done: Notify,
        release: Notify,
    }

    impl PausingStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                pause: AtomicBool::new(false),
                read_done: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl ClientStore for PausingStore {
        async fn insert_client(&self, client: &Client) -> Result<()> {
            self.inner.insert_client(client).await
        }

        async fn find_client(&self, name: &str, secret: Uuid) -> Result<Client> {
            let client = self.inner.find_client(name, secret).await?;
            if self.pause.swap(false, Ordering::SeqCst) {
                self.read_done.notify_one();
                self.release.notified().await;
            }
            Ok(client)
        }

        async fn revoke_client(&self, id: Uuid) -> Result<Option<Client>> {
            self.inner.revoke_client(id).await
        }
    }

    #[tokio::test]
    async fn lookup_racing_revoke_cannot_cache_live_client() {
        let store = Arc::new(PausingStore::new(MemoryStore::new()));
        let cache = MemoryClientCache::new(Duration::from_secs(60));
        let registry = Arc::new(ClientRegistry::new(
            store.clone(),
            Arc::new(cache.clone()),
            StrategyRegistry::with_builtin(),
        ));
        let ctx = Ctx::background();
        let reg = registry.register(&ctx, spec("c1", policy())).await.unwrap();
        let secret = reg.secret.to_string();

        store.pause.store(true, Ordering::SeqCst);
        let lookup = tokio::spawn({
            let registry = Arc::clone(&registry);
            let secret = secret.clone();
            async move { registry.get(&Ctx::background(), "c1", &secret).await }
        });
        store.read_done.notified().await;

        registry.revoke(&ctx, reg.id).await.unwrap();
        store.release.notify_one();
        let in_flight = lookup.await.unwrap().unwrap();
        assert!(!in_flight.revoked);

        assert!(cache.get("c1").await.unwrap().unwrap().revoked);
        let after = registry.get(&ctx, "c1", &secret).await.unwrap();
        assert!(after.revoked);
    }

    #[tokio::test]
    async fn revoking_unknown_client_is_not_found() {
        let (registry, _, _) = registry();
        let err = registry.revoke(&Ctx::background(), Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceNotFound);
    }

    #[test]
    fn debug_hides_keys_and_secret() {
        let client = Client::new("c1", policy(), generate_keypair());
        let out = format!("{client:?}");
        assert!(!out.contains(&client.secret.to_string()));
        assert!(!out.contains("private_key"));
    }
}
