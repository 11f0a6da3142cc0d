//! # ident_core
//!
//! Core domain logic for Ident: clients, users, sessions, tokens and the
//! events that tie password changes to session revocation.

pub mod bus;
pub mod cache;
pub mod client;
pub mod consumer;
pub mod context;
pub mod error;
pub mod event;
pub mod identity;
pub mod migrate;
pub mod outbox;
pub mod password;
pub mod session;
pub mod store;
pub mod strategy;
pub mod token;
pub mod user;
pub mod uuid;

pub use context::{ClientContext, Ctx};
pub use error::{Error, ErrorKind, Result};
pub use identity::Identity;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
