//! Session overflow strategies.
//!
//! A strategy runs when a login would push a user past the client's
//! `max_active_sessions`. Strategies are looked up by name in a
//! [`StrategyRegistry`] built once at startup; the registry's keys are the
//! allow-list that client registration validates against.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::session::SessionStore;

pub const REVOKE_OLD: &str = "revoke_old";

/// Inputs for a single overflow decision.
#[derive(Debug, Clone, Copy)]
pub struct Overflow {
    pub user_id: Uuid,
    pub current_active: i64,
    pub max_active: i64,
    /// Sessions created at or after this instant count as active.
    pub active_since: DateTime<Utc>,
}

impl Overflow {
    /// How many sessions must go so that one more fits.
    pub fn excess(&self) -> i64 {
        (self.current_active - self.max_active + 1).max(0)
    }
}

#[async_trait]
pub trait OverflowStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, ctx: &Ctx, overflow: &Overflow) -> Result<()>;
}

/// Revokes the oldest active sessions, ties broken by id.
pub struct RevokeOld {
    sessions: Arc<dyn SessionStore>,
}

impl RevokeOld {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl OverflowStrategy for RevokeOld {
    fn name(&self) -> &str {
        REVOKE_OLD
    }

    async fn apply(&self, ctx: &Ctx, overflow: &Overflow) -> Result<()> {
        const OP: &str = "revoke old sessions";

        let wanted = overflow.excess();
        if wanted == 0 {
            return Ok(());
        }
        let revoked = ctx
            .run(
                OP,
                self.sessions
                    .revoke_oldest_sessions(overflow.user_id, overflow.active_since, wanted),
            )
            .await?;
        if revoked != wanted as u64 {
            return Err(Error::internal(
                OP,
                format!("expected to revoke {wanted} sessions, revoked {revoked}"),
            ));
        }
        tracing::debug!(user_id = %overflow.user_id, revoked, "evicted oldest sessions");
        Ok(())
    }
}

pub type StrategyFactory =
    Arc<dyn Fn(Arc<dyn SessionStore>) -> Arc<dyn OverflowStrategy> + Send + Sync>;

#[derive(Clone, Default)]
pub struct StrategyRegistry {
    factories: BTreeMap<String, StrategyFactory>,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in strategy.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(REVOKE_OLD, |store| Arc::new(RevokeOld::new(store)));
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Arc<dyn SessionStore>) -> Arc<dyn OverflowStrategy> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Keep only the strategies named in `allow`. Unknown names are a config error.
    pub fn restrict<I, S>(mut self, allow: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut kept = BTreeMap::new();
        for name in allow {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            let factory = self.factories.remove(name).ok_or_else(|| {
                Error::config("session strategies", format!("unknown session strategy {name}"))
            })?;
            kept.insert(name.to_string(), factory);
        }
        if kept.is_empty() {
            return Err(Error::config(
                "session strategies",
                "at least one session strategy must be allowed",
            ));
        }
        self.factories = kept;
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn build(&self, name: &str, store: Arc<dyn SessionStore>) -> Result<Arc<dyn OverflowStrategy>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::internal("build session strategy", format!("session strategy {name} is not registered"))
        })?;
        Ok(factory(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::session::Session;
    use crate::store::memory::MemoryStore;
    use crate::user::{User, UserStore};
    use chrono::Duration;

    async fn seeded(store: &MemoryStore, user_id: Uuid, n: usize) -> Vec<Session> {
        let mut out = Vec::new();
        for _ in 0..n {
            let s = Session::new(user_id);
            store.insert_session(&s).await.unwrap();
            out.push(s);
        }
        out
    }

    async fn user(store: &MemoryStore) -> Uuid {
        let user = User::new("A", "a@x.io", "hash".into(), vec![1, 2, 3]);
        store.insert_user(&user).await.unwrap();
        user.id
    }

    #[tokio::test]
    async fn revoke_old_evicts_exactly_the_oldest() {
        let store = MemoryStore::new();
        let user_id = user(&store).await;
        let sessions = seeded(&store, user_id, 3).await;

        let strategy = RevokeOld::new(Arc::new(store.clone()));
        let overflow = Overflow {
            user_id,
            current_active: 3,
            max_active: 2,
            active_since: Utc::now() - Duration::days(1),
        };
        strategy.apply(&Ctx::background(), &overflow).await.unwrap();

        let after = store.sessions_for(user_id);
        let revoked: Vec<_> = after.iter().filter(|s| s.revoked).map(|s| s.id).collect();
        assert_eq!(revoked, vec![sessions[0].id, sessions[1].id]);
    }

    #[tokio::test]
    async fn revoke_old_fails_when_too_few_sessions_are_revoked() {
        let store = MemoryStore::new();
        let user_id = user(&store).await;
        seeded(&store, user_id, 1).await;

        let strategy = RevokeOld::new(Arc::new(store.clone()));
        let overflow = Overflow {
            user_id,
            current_active: 3,
            max_active: 1,
            active_since: Utc::now() - Duration::days(1),
        };
        let err = strategy.apply(&Ctx::background(), &overflow).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn restrict_rejects_unknown_names() {
        let err = StrategyRegistry::with_builtin()
            .restrict(["revoke_old", "deny_new"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn restrict_keeps_allowed_names() {
        let registry = StrategyRegistry::with_builtin().restrict(["revoke_old"]).unwrap();
        assert!(registry.contains(REVOKE_OLD));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec![REVOKE_OLD]);
    }

    #[test]
    fn custom_strategies_can_be_registered() {
        struct Noop;
        #[async_trait]
        impl OverflowStrategy for Noop {
            fn name(&self) -> &str {
                "noop"
            }
            async fn apply(&self, _: &Ctx, _: &Overflow) -> Result<()> {
                Ok(())
            }
        }

        let mut registry = StrategyRegistry::with_builtin();
        registry.register("noop", |_| Arc::new(Noop));
        let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
        assert_eq!(registry.build("noop", store).unwrap().name(), "noop");
    }
}
