//! In-memory client cache with TTL-based expiration.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::client::{CachedClient, ClientCache};
use crate::error::Result;

/// Default entry lifetime: 5 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedClient,
    expires_at: DateTime<Utc>,
}

/// Client records keyed by name.
#[derive(Debug, Clone)]
pub struct MemoryClientCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

impl Default for MemoryClientCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl MemoryClientCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Drop expired entries.
    pub async fn evict_expired(&self) {
        let now = Utc::now();
        self.entries.write().await.retain(|_, e| now < e.expires_at);
    }

    fn entry(&self, client: &CachedClient, now: DateTime<Utc>) -> CacheEntry {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        CacheEntry {
            value: client.clone(),
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl ClientCache for MemoryClientCache {
    async fn get(&self, name: &str) -> Result<Option<CachedClient>> {
        let entries = self.entries.read().await;
        Ok(entries.get(name).and_then(|entry| {
            if Utc::now() < entry.expires_at {
                Some(entry.value.clone())
            } else {
                None
            }
        }))
    }

    async fn put(&self, client: &CachedClient) -> Result<()> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        match entries.entry(client.name.clone()) {
            Entry::Occupied(live) if now < live.get().expires_at => {}
            Entry::Occupied(mut expired) => {
                expired.insert(self.entry(client, now));
            }
            Entry::Vacant(slot) => {
                slot.insert(self.entry(client, now));
            }
        }
        Ok(())
    }

    async fn put_revoked(&self, client: &CachedClient) -> Result<()> {
        let entry = self.entry(client, Utc::now());
        self.entries.write().await.insert(client.name.clone(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, ClientPolicy};
    use crate::token::generate_keypair;

    fn cached(name: &str) -> CachedClient {
        let client = Client::new(
            name,
            ClientPolicy {
                access_token_ttl_minutes: 10,
                session_ttl_minutes: 1440,
                max_active_sessions: 2,
                session_strategy: "revoke_old".into(),
            },
            generate_keypair(),
        );
        CachedClient::from_client(&client)
    }

    #[tokio::test]
    async fn get_returns_fresh_entry() {
        let cache = MemoryClientCache::default();
        cache.put(&cached("c1")).await.unwrap();
        assert_eq!(cache.get("c1").await.unwrap().unwrap().name, "c1");
        assert!(cache.get("c2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = MemoryClientCache::new(Duration::ZERO);
        cache.put(&cached("c1")).await.unwrap();
        assert!(cache.get("c1").await.unwrap().is_none());
        cache.evict_expired().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn put_keeps_revoked_entry() {
        let cache = MemoryClientCache::default();
        let live = cached("c1");
        let mut revoked = live.clone();
        revoked.revoked = true;

        cache.put(&live).await.unwrap();
        cache.put_revoked(&revoked).await.unwrap();
        cache.put(&live).await.unwrap();
        assert!(cache.get("c1").await.unwrap().unwrap().revoked);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn put_replaces_expired_entry() {
        let cache = MemoryClientCache::new(Duration::ZERO);
        let mut revoked = cached("c1");
        revoked.revoked = true;
        cache.put_revoked(&revoked).await.unwrap();
        cache.put(&cached("c1")).await.unwrap();
        assert_eq!(cache.len().await, 1);
    }
}
