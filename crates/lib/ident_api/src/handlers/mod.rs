//! Request handlers.

pub mod client;
pub mod health;
pub mod session;
pub mod user;
