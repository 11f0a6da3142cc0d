//! Postgres implementation of the store contracts.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::client::{Client, ClientPolicy, ClientStore};
use crate::error::{Error, Result};
use crate::outbox::{OutboxEvent, OutboxStore};
use crate::session::{Session, SessionStore};
use crate::user::{User, UserStore};

/// Default per-query timeout.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

type ClientRow = (
    Uuid,
    String,
    Uuid,
    i32,
    i32,
    i32,
    String,
    Vec<u8>,
    Vec<u8>,
    bool,
    DateTime<Utc>,
    DateTime<Utc>,
);

const CLIENT_COLUMNS: &str = "id, name, secret, access_token_ttl, session_ttl, max_active_sessions, \
     session_strategy, public_key, private_key, revoked, created_at, updated_at";

type UserRow = (Uuid, String, String, String, Vec<u8>, DateTime<Utc>, DateTime<Utc>);

type SessionRow = (Uuid, Uuid, Uuid, bool, DateTime<Utc>, DateTime<Utc>);

type OutboxRow = (
    Uuid,
    String,
    String,
    i32,
    Option<String>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn timed<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(res) => res.map_err(|e| db_error(op, e)),
            Err(_) => Err(Error::timeout(op)),
        }
    }
}

/// Map a driver error onto the core taxonomy.
fn db_error(op: &'static str, err: sqlx::Error) -> Error {
    let unique = err
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation());
    if unique {
        Error::duplicate(op, "record already exists").with_source(err)
    } else if matches!(err, sqlx::Error::RowNotFound) {
        Error::not_found(op, "record not found").with_source(err)
    } else if matches!(err, sqlx::Error::PoolTimedOut) {
        Error::timeout(op).with_source(err)
    } else {
        Error::wrap(op, err)
    }
}

fn client_from_row(row: ClientRow) -> Client {
    let (
        id,
        name,
        secret,
        access_token_ttl,
        session_ttl,
        max_active_sessions,
        session_strategy,
        public_key,
        private_key,
        revoked,
        created_at,
        updated_at,
    ) = row;
    Client {
        id,
        name,
        secret,
        public_key,
        private_key,
        policy: ClientPolicy {
            access_token_ttl_minutes: i64::from(access_token_ttl),
            session_ttl_minutes: i64::from(session_ttl),
            max_active_sessions: i64::from(max_active_sessions),
            session_strategy,
        },
        revoked,
        created_at,
        updated_at,
    }
}

fn to_i32(op: &'static str, field: &str, value: i64) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::validation(op, format!("{field} is out of range")))
}

fn session_from_row(row: SessionRow) -> Session {
    let (id, user_id, refresh_token, revoked, created_at, updated_at) = row;
    Session {
        id,
        user_id,
        refresh_token,
        revoked,
        created_at,
        updated_at,
    }
}

fn outbox_from_row(row: OutboxRow) -> Result<OutboxEvent> {
    let (id, code, data, attempts, last_error, created_at, published_at) = row;
    Ok(OutboxEvent {
        id,
        code: code
            .parse()
            .map_err(|e| Error::wrap("load outbox event", e))?,
        data,
        attempts,
        last_error,
        created_at,
        published_at,
    })
}

#[async_trait]
impl ClientStore for PgStore {
    async fn insert_client(&self, client: &Client) -> Result<()> {
        const OP: &str = "insert client";
        let p = &client.policy;
        let access_ttl = to_i32(OP, "access_token_ttl", p.access_token_ttl_minutes)?;
        let session_ttl = to_i32(OP, "session_ttl", p.session_ttl_minutes)?;
        let max_sessions = to_i32(OP, "max_active_sessions", p.max_active_sessions)?;

        let sql = format!(
            "INSERT INTO clients ({CLIENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        );
        self.timed(
            OP,
            sqlx::query(&sql)
                .bind(client.id)
                .bind(&client.name)
                .bind(client.secret)
                .bind(access_ttl)
                .bind(session_ttl)
                .bind(max_sessions)
                .bind(&p.session_strategy)
                .bind(&client.public_key)
                .bind(&client.private_key)
                .bind(client.revoked)
                .bind(client.created_at)
                .bind(client.updated_at)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn find_client(&self, name: &str, secret: Uuid) -> Result<Client> {
        let sql = format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE name = $1 AND secret = $2");
        let row = self
            .timed(
                "find client",
                sqlx::query_as::<_, ClientRow>(&sql)
                    .bind(name)
                    .bind(secret)
                    .fetch_one(&self.pool),
            )
            .await?;
        Ok(client_from_row(row))
    }

    async fn revoke_client(&self, id: Uuid) -> Result<Option<Client>> {
        let sql = format!(
            "UPDATE clients SET revoked = TRUE, updated_at = now() \
             WHERE id = $1 RETURNING {CLIENT_COLUMNS}"
        );
        let row = self
            .timed(
                "revoke client",
                sqlx::query_as::<_, ClientRow>(&sql)
                    .bind(id)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(client_from_row))
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn insert_user(&self, user: &User) -> Result<()> {
        self.timed(
            "insert user",
            sqlx::query(
                "INSERT INTO users (id, name, email, password_hash, password_salt, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(user.id)
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.password_salt)
            .bind(user.created_at)
            .bind(user.updated_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<User> {
        let (id, name, email, password_hash, password_salt, created_at, updated_at) = self
            .timed(
                "find user",
                sqlx::query_as::<_, UserRow>(
                    "SELECT id, name, email, password_hash, password_salt, created_at, updated_at \
                     FROM users WHERE email = $1",
                )
                .bind(email)
                .fetch_one(&self.pool),
            )
            .await?;
        Ok(User {
            id,
            name,
            email,
            password_hash,
            password_salt,
            created_at,
            updated_at,
        })
    }

    async fn update_password_with_outbox(
        &self,
        user_id: Uuid,
        password_hash: &str,
        password_salt: &[u8],
        event: &OutboxEvent,
    ) -> Result<()> {
        const OP: &str = "update password";

        let tx = async {
            let mut tx = self.pool.begin().await?;
            let updated = sqlx::query(
                "UPDATE users SET password_hash = $2, password_salt = $3, updated_at = now() \
                 WHERE id = $1",
            )
            .bind(user_id)
            .bind(password_hash)
            .bind(password_salt)
            .execute(&mut *tx)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(sqlx::Error::RowNotFound);
            }
            sqlx::query(
                "INSERT INTO outbox_events (id, code, data, attempts, created_at) \
                 VALUES ($1, $2, $3, 0, $4)",
            )
            .bind(event.id)
            .bind(event.code.as_str())
            .bind(&event.data)
            .bind(event.created_at)
            .execute(&mut *tx)
            .await?;
            tx.commit().await
        };
        self.timed(OP, tx).await
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, session: &Session) -> Result<()> {
        self.timed(
            "insert session",
            sqlx::query(
                "INSERT INTO sessions (id, user_id, refresh_token, revoked, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(session.id)
            .bind(session.user_id)
            .bind(session.refresh_token)
            .bind(session.revoked)
            .bind(session.created_at)
            .bind(session.updated_at)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn find_session_by_refresh_token(&self, refresh_token: Uuid) -> Result<Session> {
        let row = self
            .timed(
                "find session",
                sqlx::query_as::<_, SessionRow>(
                    "SELECT id, user_id, refresh_token, revoked, created_at, updated_at \
                     FROM sessions WHERE refresh_token = $1",
                )
                .bind(refresh_token)
                .fetch_one(&self.pool),
            )
            .await?;
        Ok(session_from_row(row))
    }

    async fn count_active_sessions(&self, user_id: Uuid, created_after: DateTime<Utc>) -> Result<i64> {
        self.timed(
            "count active sessions",
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM sessions \
                 WHERE user_id = $1 AND revoked = FALSE AND created_at > $2",
            )
            .bind(user_id)
            .bind(created_after)
            .fetch_one(&self.pool),
        )
        .await
    }

    async fn revoke_oldest_sessions(
        &self,
        user_id: Uuid,
        created_after: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64> {
        let res = self
            .timed(
                "revoke oldest sessions",
                sqlx::query(
                    "UPDATE sessions SET revoked = TRUE, updated_at = now() \
                     WHERE id IN ( \
                         SELECT id FROM sessions \
                         WHERE user_id = $1 AND revoked = FALSE AND created_at > $2 \
                         ORDER BY created_at ASC, id ASC \
                         LIMIT $3 \
                         FOR UPDATE)",
                )
                .bind(user_id)
                .bind(created_after)
                .bind(limit)
                .execute(&self.pool),
            )
            .await?;
        Ok(res.rows_affected())
    }

    async fn revoke_session(&self, id: Uuid) -> Result<()> {
        const OP: &str = "revoke session";
        let res = self
            .timed(
                OP,
                sqlx::query("UPDATE sessions SET revoked = TRUE, updated_at = now() WHERE id = $1")
                    .bind(id)
                    .execute(&self.pool),
            )
            .await?;
        if res.rows_affected() == 0 {
            return Err(Error::not_found(OP, "session not found"));
        }
        Ok(())
    }

    async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<u64> {
        let res = self
            .timed(
                "revoke all sessions",
                sqlx::query(
                    "UPDATE sessions SET revoked = TRUE, updated_at = now() \
                     WHERE user_id = $1 AND revoked = FALSE",
                )
                .bind(user_id)
                .execute(&self.pool),
            )
            .await?;
        Ok(res.rows_affected())
    }
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn pending_outbox_events(&self, older_than: DateTime<Utc>, limit: i64) -> Result<Vec<OutboxEvent>> {
        let rows = self
            .timed(
                "load pending outbox events",
                sqlx::query_as::<_, OutboxRow>(
                    "SELECT id, code, data, attempts, last_error, created_at, published_at \
                     FROM outbox_events \
                     WHERE published_at IS NULL AND created_at <= $1 \
                     ORDER BY created_at ASC, id ASC \
                     LIMIT $2",
                )
                .bind(older_than)
                .bind(limit)
                .fetch_all(&self.pool),
            )
            .await?;
        rows.into_iter().map(outbox_from_row).collect()
    }

    async fn mark_outbox_published(&self, id: Uuid) -> Result<()> {
        self.timed(
            "mark outbox published",
            sqlx::query("UPDATE outbox_events SET published_at = now() WHERE id = $1")
                .bind(id)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn record_outbox_failure(&self, id: Uuid, error: &str) -> Result<()> {
        self.timed(
            "record outbox failure",
            sqlx::query(
                "UPDATE outbox_events SET attempts = attempts + 1, last_error = $2 WHERE id = $1",
            )
            .bind(id)
            .bind(error)
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn delete_published_outbox_events(&self, published_before: DateTime<Utc>) -> Result<u64> {
        let res = self
            .timed(
                "prune published outbox events",
                sqlx::query(
                    "DELETE FROM outbox_events \
                     WHERE published_at IS NOT NULL AND published_at < $1",
                )
                .bind(published_before)
                .execute(&self.pool),
            )
            .await?;
        Ok(res.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn row_not_found_maps_to_not_found() {
        assert_eq!(
            db_error("find", sqlx::Error::RowNotFound).kind(),
            ErrorKind::ResourceNotFound
        );
    }

    #[test]
    fn pool_timeout_maps_to_timeout() {
        assert_eq!(db_error("find", sqlx::Error::PoolTimedOut).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn other_driver_errors_are_internal() {
        assert_eq!(db_error("find", sqlx::Error::PoolClosed).kind(), ErrorKind::Internal);
    }

    #[test]
    fn oversized_policy_values_are_rejected() {
        let err = to_i32("insert client", "session_ttl", i64::MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
