//! Redis-backed client cache. Values are sealed JSON with a TTL.
//!
//! Lookups write with `SET NX`; revocation overwrites.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::seal::Sealer;
use crate::client::{CachedClient, ClientCache};
use crate::error::{Result, redis_error};

const KEY_PREFIX: &str = "ident:client:";

#[derive(Clone)]
pub struct RedisClientCache {
    conn: ConnectionManager,
    sealer: Sealer,
    ttl: Duration,
}

impl RedisClientCache {
    pub async fn connect(url: &str, sealer: Sealer, ttl: Duration) -> Result<Self> {
        const OP: &str = "connect client cache";
        let client = redis::Client::open(url).map_err(|e| redis_error(OP, e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| redis_error(OP, e))?;
        Ok(Self::new(conn, sealer, ttl))
    }

    pub fn new(conn: ConnectionManager, sealer: Sealer, ttl: Duration) -> Self {
        Self { conn, sealer, ttl }
    }

    fn key(name: &str) -> String {
        format!("{KEY_PREFIX}{name}")
    }
}

#[async_trait]
impl ClientCache for RedisClientCache {
    async fn get(&self, name: &str) -> Result<Option<CachedClient>> {
        let mut conn = self.conn.clone();
        let sealed = redis::cmd("GET")
            .arg(Self::key(name))
            .query_async::<_, Option<Vec<u8>>>(&mut conn)
            .await
            .map_err(|e| redis_error("cache get", e))?;
        let Some(sealed) = sealed else {
            return Ok(None);
        };
        let plain = self.sealer.open(&sealed)?;
        Ok(Some(serde_json::from_slice(&plain)?))
    }

    async fn put(&self, client: &CachedClient) -> Result<()> {
        let sealed = self.sealer.seal(&serde_json::to_vec(client)?)?;
        let mut conn = self.conn.clone();
        // NX: never replace a record written by revocation.
        redis::cmd("SET")
            .arg(Self::key(&client.name))
            .arg(sealed)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map_err(|e| redis_error("cache put", e))?;
        Ok(())
    }

    async fn put_revoked(&self, client: &CachedClient) -> Result<()> {
        let sealed = self.sealer.seal(&serde_json::to_vec(client)?)?;
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(Self::key(&client.name))
            .arg(sealed)
            .arg("EX")
            .arg(self.ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| redis_error("cache put revoked", e))
    }
}
