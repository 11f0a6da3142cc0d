//! Store contract implementations.
//!
//! The contracts themselves live next to their entities:
//! [`ClientStore`](crate::client::ClientStore), [`UserStore`](crate::user::UserStore),
//! [`SessionStore`](crate::session::SessionStore) and
//! [`OutboxStore`](crate::outbox::OutboxStore).

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;
