//! Session lifecycle: login, refresh, logout and global revocation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::context::{ClientContext, Ctx};
use crate::error::{Error, OpContext, Result};
use crate::strategy::{Overflow, StrategyRegistry};
use crate::token::{SESSION_ID_CLAIM, TokenIssuer};
use crate::user::UserRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub refresh_token: Uuid,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// A fresh, unrevoked session with a new refresh token.
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: crate::uuid::uuidv7(),
            user_id,
            refresh_token: crate::token::issue_refresh(),
            revoked: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn expires_at(&self, session_ttl_minutes: i64) -> DateTime<Utc> {
        self.created_at + Duration::minutes(session_ttl_minutes)
    }

    pub fn is_expired(&self, session_ttl_minutes: i64, now: DateTime<Utc>) -> bool {
        now >= self.expires_at(session_ttl_minutes)
    }

    pub fn is_active(&self, session_ttl_minutes: i64, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(session_ttl_minutes, now)
    }
}

/// Relational session storage.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, session: &Session) -> Result<()>;

    /// `ResourceNotFound` when no session has this refresh token.
    async fn find_session_by_refresh_token(&self, refresh_token: Uuid) -> Result<Session>;

    /// Unrevoked sessions of `user_id` created after `created_after`.
    async fn count_active_sessions(&self, user_id: Uuid, created_after: DateTime<Utc>) -> Result<i64>;

    /// Revoke up to `limit` active sessions ordered by `(created_at, id)`.
    /// Returns how many were revoked.
    async fn revoke_oldest_sessions(
        &self,
        user_id: Uuid,
        created_after: DateTime<Utc>,
        limit: i64,
    ) -> Result<u64>;

    /// `ResourceNotFound` when the id is unknown.
    async fn revoke_session(&self, id: Uuid) -> Result<()>;

    /// Revoke every unrevoked session of `user_id`; returns the affected count.
    async fn revoke_all_sessions(&self, user_id: Uuid) -> Result<u64>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Uuid,
}

pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    users: Arc<UserRegistry>,
    tokens: TokenIssuer,
    strategies: StrategyRegistry,
}

impl SessionManager {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        users: Arc<UserRegistry>,
        tokens: TokenIssuer,
        strategies: StrategyRegistry,
    ) -> Self {
        Self {
            sessions,
            users,
            tokens,
            strategies,
        }
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    /// Authenticate the user and open a new session.
    ///
    /// When the user already holds `max_active_sessions` active sessions the
    /// client's overflow strategy runs first; its failure aborts the login.
    pub async fn login(&self, cctx: &ClientContext, email: &str, password: &str) -> Result<TokenPair> {
        const OP: &str = "login";

        let client = &cctx.client;
        let ctx = &cctx.ctx;
        let user_id = self.users.authenticate(ctx, email, password).await.op(OP)?;

        let now = Utc::now();
        let active_since = now - Duration::minutes(client.policy.session_ttl_minutes);
        let current_active = ctx
            .run(
                "count active sessions",
                self.sessions.count_active_sessions(user_id, active_since),
            )
            .await
            .op(OP)?;

        let max_active = client.policy.max_active_sessions;
        if current_active >= max_active {
            let strategy = self
                .strategies
                .build(&client.policy.session_strategy, Arc::clone(&self.sessions))
                .op(OP)?;
            let overflow = Overflow {
                user_id,
                current_active,
                max_active,
                active_since,
            };
            strategy.apply(ctx, &overflow).await.op(OP)?;
        }

        let session = Session::new(user_id);
        ctx.run("insert session", self.sessions.insert_session(&session))
            .await
            .op(OP)?;
        let access_token = self.mint(cctx, &session).op(OP)?;

        tracing::info!(user_id = %user_id, client = %client.name, session_id = %session.id, "session created");
        Ok(TokenPair {
            access_token,
            refresh_token: session.refresh_token,
        })
    }

    /// Mint a new access token for an active session.
    pub async fn refresh(&self, cctx: &ClientContext, refresh_token: &str) -> Result<String> {
        const OP: &str = "refresh";

        let session = self.load_active(cctx, refresh_token).await.op(OP)?;
        let access_token = self.mint(cctx, &session).op(OP)?;
        tracing::debug!(session_id = %session.id, "access token refreshed");
        Ok(access_token)
    }

    pub async fn logout(&self, cctx: &ClientContext, refresh_token: &str) -> Result<()> {
        const OP: &str = "logout";

        let session = self.load_active(cctx, refresh_token).await.op(OP)?;
        cctx.ctx
            .run("revoke session", self.sessions.revoke_session(session.id))
            .await
            .op(OP)?;
        tracing::info!(session_id = %session.id, user_id = %session.user_id, "session revoked");
        Ok(())
    }

    /// Revoke every session of `user_id`. Repeating the call returns 0.
    pub async fn revoke_all(&self, ctx: &Ctx, user_id: Uuid) -> Result<u64> {
        let revoked = ctx
            .run("revoke all sessions", self.sessions.revoke_all_sessions(user_id))
            .await?;
        tracing::info!(user_id = %user_id, revoked, "revoked all sessions");
        Ok(revoked)
    }

    /// Load the session behind `refresh_token` and check it is still usable.
    /// An expired session is revoked on the way out.
    async fn load_active(&self, cctx: &ClientContext, refresh_token: &str) -> Result<Session> {
        const OP: &str = "load session";

        let token = parse_refresh_token(refresh_token)?;
        let session = cctx
            .ctx
            .run(OP, self.sessions.find_session_by_refresh_token(token))
            .await?;

        if session.revoked {
            return Err(Error::authentication(OP, "session is revoked"));
        }
        if session.is_expired(cctx.client.policy.session_ttl_minutes, Utc::now()) {
            cctx.ctx
                .run("revoke expired session", self.sessions.revoke_session(session.id))
                .await?;
            tracing::info!(session_id = %session.id, "revoked expired session");
            return Err(Error::authentication(OP, "session is expired"));
        }
        Ok(session)
    }

    fn mint(&self, cctx: &ClientContext, session: &Session) -> Result<String> {
        let claims = BTreeMap::from([(SESSION_ID_CLAIM.to_string(), session.id.to_string())]);
        self.tokens.issue_access(
            &cctx.client.private_key,
            cctx.client.policy.access_token_ttl_minutes,
            &session.user_id.to_string(),
            &claims,
        )
    }
}

fn parse_refresh_token(raw: &str) -> Result<Uuid> {
    const OP: &str = "parse refresh token";
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::validation(OP, "refresh token is required"));
    }
    Uuid::parse_str(raw).map_err(|_| Error::validation(OP, "refresh token is malformed"))
}
