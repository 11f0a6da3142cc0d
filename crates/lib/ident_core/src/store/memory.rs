//! In-memory implementation of every store contract.
//!
//! Behaves like the Postgres store: the same uniqueness rules, the same
//! `(created_at, id)` ordering, and user deletion cascades to sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::client::{Client, ClientStore};
use crate::error::{Error, Result};
use crate::outbox::{OutboxEvent, OutboxStore};
use crate::session::{Session, SessionStore};
use crate::user::{User, UserStore};

#[derive(Default)]
struct State {
    clients: HashMap<Uuid, Client>,
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, Session>,
    outbox: Vec<OutboxEvent>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sessions of `user_id` ordered by `(created_at, id)`.
    pub fn sessions_for(&self, user_id: Uuid) -> Vec<Session> {
        let state = self.lock();
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| (s.created_at, s.id));
        sessions
    }

    /// Rewrite a session's creation time.
    pub fn backdate_session(&self, id: Uuid, created_at: DateTime<Utc>) {
        if let Some(s) = self.lock().sessions.get_mut(&id) {
            s.created_at = created_at;
        }
    }

    /// Delete a user and, like the foreign key, its sessions.
    pub fn delete_user(&self, id: Uuid) {
        let mut state = self.lock();
        state.users.remove(&id);
        state.sessions.retain(|_, s| s.user_id != id);
    }

    pub fn push_outbox(&self, event: OutboxEvent) {
        self.lock().outbox.push(event);
    }

    pub fn outbox_rows(&self) -> Vec<OutboxEvent> {
        self.lock().outbox.clone()
    }
}

fn is_active(session: &Session, user_id: Uuid, created_after: DateTime<Utc>) -> bool {
    session.user_id == user_id && !session.revoked && session.created_at > created_after
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn insert_client(&self, client: &Client) -> Result<()> {
        let mut state = self.lock();
        if state
            .clients
            .values()
            .any(|c| c.name == client.name || c.secret == client.secret)
        {
            return Err(Error::duplicate("insert client", "client already exists"));
        }
        state.clients.insert(client.id, client.clone());
        Ok(())
    }

    async fn find_client(&self, name: &str, secret: Uuid) -> Result<Client> {
        self.lock()
            .clients
            .values()
            .find(|c| c.name == name && c.secret == secret)
            .cloned()
            .ok_or_else(|| Error::not_found("find client", "client not found"))
    }

    async fn revoke_client(&self, id: Uuid) -> Result<Option<Client>> {
        let mut state = self.lock();
        Ok(state.clients.get_mut(&id).map(|c| {
            c.revoked = true;
            c.updated_at = Utc::now();
            c.clone()
        }))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut state = self.lock();
        if state.users.values().any(|u| u.email == user.email) {
            return Err(Error::duplicate("insert user", "email already registered"));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<User> {
        self.lock()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| Error::not_found("find user", "user not found"))
    }

    async fn update_password_with_outbox(
        &self,
        user_id: Uuid,
        password_hash: &str,
        password_salt: &[u8],
        event: &OutboxEvent,
    ) -> Result<()> {
        let mut state = self.lock();
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| Error::not_found("update password", "user not found"))?;
        user.password_hash = password_hash.to_string();
        user.password_salt = password_salt.to_vec();
        user.updated_at = Utc::now();
        state.outbox.push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &Session) -> Result<()> {
        let mut state = self.lock();
        if !state.users.contains_key(&session.user_id) {
            return Err(Error::internal("insert session", "user does not exist"));
        }
        if state
            .sessions
            .values()
            .any(|s| s.id == session.id || s.refresh_token == session.refresh_token)
        {
            return Err(Error::duplicate("insert session", "session already exists"));
        }
        state.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session_by_refresh_token(&self, refresh_token: Uuid) -> Result<Session> {
        self.lock()
            .sessions
            .values()
            .find(|s| s.refresh_token == refresh_token)
            .cloned()
            .ok_or_else(|| Error::not_found("find session", "session not found"))
    }

    async fn count_active_sessions(&self, user_id: Uuid, created_after: DateTime<Utc>) -> Result<i64> {
        let count = self
            .lock()
            .sessions
            .values()
            .filter(|s| is_active(s, user_id, created_after))
            .count();
        Ok(count as i64)
    }

    async fn revoke_oldest_sessions(
        &self,
        user_id: Uuid,
        created_after: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64> {
        let mut state = self.lock();
        let mut oldest: Vec<(DateTime<Utc>, Uuid)> = state
            .sessions
            .values()
            .filter(|s| is_active(s, user_id, created_after))
            .map(|s| (s.created_at, s.id))
            .collect();
        oldest.sort();
        oldest.truncate(usize::try_from(limit).unwrap_or(0));

        let now = Utc::now();
        for (_, id) in &oldest {
            if let Some(s) = state.sessions.get_mut(id) {
                s.revoked = true;
                s.updated_at = now;
            }
        }
        Ok(oldest.len() as u64)
    }

    async fn revoke_session(&self, id: Uuid) -> Result<()> {
        let mut state = self.lock();
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("revoke session", "session not found"))?;
        session.revoked = true;
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<u64> {
        let mut state = self.lock();
        let now = Utc::now();
        let mut revoked = 0;
        for s in state
            .sessions
            .values_mut()
            .filter(|s| s.user_id == user_id && !s.revoked)
        {
            s.revoked = true;
            s.updated_at = now;
            revoked += 1;
        }
        Ok(revoked)
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn pending_outbox_events(&self, older_than: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxEvent>> {
        let mut pending: Vec<OutboxEvent> = self
            .lock()
            .outbox
            .iter()
            .filter(|e| e.published_at.is_none() && e.created_at <= older_than)
            .cloned()
            .collect();
        pending.sort_by_key(|e| (e.created_at, e.id));
        pending.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(pending)
    }

    async fn mark_outbox_published(&self, id: Uuid) -> Result<()> {
        let mut state = self.lock();
        if let Some(e) = state.outbox.iter_mut().find(|e| e.id == id) {
            e.published_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn record_outbox_failure(&self, id: Uuid, error: &str) -> Result<()> {
        let mut state = self.lock();
        if let Some(e) = state.outbox.iter_mut().find(|e| e.id == id) {
            e.attempts += 1;
            e.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn delete_published_outbox_events(&self, published_before: DateTime<Utc>) -> Result<u64> {
        let mut state = self.lock();
        let before = state.outbox.len();
        state
            .outbox
            .retain(|e| e.published_at.is_none_or(|at| at >= published_before));
        Ok((before - state.outbox.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    async fn user(store: &MemoryStore) -> Uuid {
        let user = User::new("A", "a@x.io", "h".into(), vec![0]);
        store.insert_user(&user).await.unwrap();
        user.id
    }

    #[tokio::test]
    async fn delete_user_cascades_to_sessions() {
        let store = MemoryStore::new();
        let user_id = user(&store).await;
        store.insert_session(&Session::new(user_id)).await.unwrap();
        store.delete_user(user_id);
        assert!(store.sessions_for(user_id).is_empty());
    }

    #[tokio::test]
    async fn session_for_unknown_user_is_rejected() {
        let store = MemoryStore::new();
        assert!(store.insert_session(&Session::new(Uuid::new_v4())).await.is_err());
    }

    #[tokio::test]
    async fn expired_sessions_are_not_counted() {
        let store = MemoryStore::new();
        let user_id = user(&store).await;
        let old = Session::new(user_id);
        store.insert_session(&old).await.unwrap();
        store.insert_session(&Session::new(user_id)).await.unwrap();
        store.backdate_session(old.id, Utc::now() - chrono::Duration::days(2));

        let since = Utc::now() - chrono::Duration::days(1);
        assert_eq!(store.count_active_sessions(user_id, since).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ties_on_created_at_break_by_id() {
        let store = MemoryStore::new();
        let user_id = user(&store).await;
        let at = Utc::now();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let s = Session::new(user_id);
            store.insert_session(&s).await.unwrap();
            store.backdate_session(s.id, at);
            ids.push(s.id);
        }
        ids.sort();

        let since = at - chrono::Duration::days(1);
        assert_eq!(store.revoke_oldest_sessions(user_id, since, 1).await.unwrap(), 1);
        let revoked: Vec<_> = store
            .sessions_for(user_id)
            .into_iter()
            .filter(|s| s.revoked)
            .map(|s| s.id)
            .collect();
        assert_eq!(revoked, vec![ids[0]]);
    }

    #[tokio::test]
    async fn revoking_unknown_session_is_not_found() {
        let store = MemoryStore::new();
        let err = store.revoke_session(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceNotFound);
    }
}
