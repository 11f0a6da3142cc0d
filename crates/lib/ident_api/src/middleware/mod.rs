//! Request authentication.

pub mod admin;
pub mod client;
