//! User registry: sign-up, authentication and password changes.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::context::Ctx;
use crate::error::{Error, ErrorKind, OpContext, Result};
use crate::event::{Event, EventPublisher};
use crate::outbox::{OutboxEvent, OutboxStore};
use crate::password::PasswordCodec;

#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub password_salt: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl User {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password_hash: String,
        password_salt: Vec<u8>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: crate::uuid::uuidv4(),
            name: name.into(),
            email: email.into(),
            password_hash,
            password_salt,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Relational user storage.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// `DuplicateRecord` when the email is taken.
    async fn insert_user(&self, user: &User) -> Result<()>;

    /// `ResourceNotFound` when no user has this email.
    async fn find_user_by_email(&self, email: &str) -> Result<User>;

    /// Replace the password and append `event` to the outbox atomically.
    async fn update_password_with_outbox(
        &self,
        user_id: Uuid,
        password_hash: &str,
        password_salt: &[u8],
        event: &OutboxEvent,
    ) -> Result<()>;
}

pub struct UserRegistry {
    users: Arc<dyn UserStore>,
    outbox: Arc<dyn OutboxStore>,
    codec: PasswordCodec,
    publisher: EventPublisher,
}

impl UserRegistry {
    pub fn new(
        users: Arc<dyn UserStore>,
        outbox: Arc<dyn OutboxStore>,
        codec: PasswordCodec,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            users,
            outbox,
            codec,
            publisher,
        }
    }

    /// Create a user and announce the sign-up without waiting for the bus.
    pub async fn create_user(&self, ctx: &Ctx, name: &str, email: &str, password: &str) -> Result<Uuid> {
        const OP: &str = "create user";

        let name = name.trim();
        let email = email.trim();
        if name.is_empty() {
            return Err(Error::validation(OP, "name is required"));
        }
        if email.is_empty() {
            return Err(Error::validation(OP, "email is required"));
        }
        if password.is_empty() {
            return Err(Error::validation(OP, "password is required"));
        }
        self.codec.validate_strength(password)?;

        let hashed = self.codec.spawn_hash(password).await.op(OP)?;
        let user = User::new(name, email, hashed.hash, hashed.salt);
        ctx.run("insert user", self.users.insert_user(&user))
            .await
            .op(OP)?;
        tracing::info!(user_id = %user.id, "user created");

        let publisher = self.publisher.clone();
        let event = Event::sign_up(user.id);
        tokio::spawn(async move {
            if let Err(e) = publisher.publish(&Ctx::background(), &event).await {
                tracing::error!(user_id = %event.data, error = %e, "failed to publish sign-up event");
            }
        });

        Ok(user.id)
    }

    /// Resolve a user id from email and password.
    ///
    /// Unknown email and wrong password both fail with `InvalidCredentials`.
    pub async fn authenticate(&self, ctx: &Ctx, email: &str, password: &str) -> Result<Uuid> {
        Ok(self.authenticate_user(ctx, email, password).await?.id)
    }

    async fn authenticate_user(&self, ctx: &Ctx, email: &str, password: &str) -> Result<User> {
        const OP: &str = "authenticate";

        let user = match ctx.run("find user", self.users.find_user_by_email(email.trim())).await {
            Ok(user) => user,
            Err(e) if e.is_interrupted() => return Err(Error::wrap(OP, e)),
            Err(e) => {
                if e.kind() != ErrorKind::ResourceNotFound {
                    tracing::warn!(error = %e, "user lookup failed during authentication");
                }
                return Err(e.reclassify(ErrorKind::InvalidCredentials, OP, "invalid credentials"));
            }
        };
        self.codec
            .spawn_verify(password, &user.password_hash, &user.password_salt)
            .await
            .op(OP)?;
        Ok(user)
    }

    /// Change a password and fan out `password-updated`.
    ///
    /// The event row commits with the new password. A failed publish fails
    /// the call; the outbox relay delivers the event later regardless.
    pub async fn update_password(
        &self,
        ctx: &Ctx,
        email: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        const OP: &str = "update password";

        self.codec.validate_strength(new_password)?;
        let user = self.authenticate_user(ctx, email, old_password).await.op(OP)?;

        let hashed = self.codec.spawn_hash(new_password).await.op(OP)?;
        let event = Event::password_updated(user.id);
        let row = OutboxEvent::new(&event);
        ctx.run(
            "store password",
            self.users
                .update_password_with_outbox(user.id, &hashed.hash, &hashed.salt, &row),
        )
        .await
        .op(OP)?;
        tracing::info!(user_id = %user.id, "password updated");

        if let Err(e) = self.publisher.publish(ctx, &event).await {
            tracing::error!(user_id = %user.id, error = %e, "failed to publish password-updated event");
            if let Err(re) = ctx
                .run(
                    "record outbox failure",
                    self.outbox.record_outbox_failure(row.id, &e.to_string()),
                )
                .await
            {
                tracing::warn!(event_id = %row.id, error = %re, "failed to record outbox failure");
            }
            if e.is_interrupted() {
                return Err(Error::wrap(OP, e));
            }
            return Err(e.reclassify(
                ErrorKind::Internal,
                OP,
                "failed to publish password-updated event",
            ));
        }

        if let Err(e) = ctx
            .run("mark outbox published", self.outbox.mark_outbox_published(row.id))
            .await
        {
            // Left for the relay to republish.
            tracing::warn!(event_id = %row.id, error = %e, "failed to mark outbox event published");
        }
        Ok(())
    }
}
