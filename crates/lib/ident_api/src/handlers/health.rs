//! Liveness endpoint.

use axum::http::StatusCode;

use crate::models::{Reply, reply};

/// `GET /ping`
pub async fn ping() -> Reply<&'static str> {
    reply(StatusCode::OK, "pong")
}
