//! Request and response bodies.
//!
//! Every response is wrapped in [`Envelope`].

use axum::Json;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Uniform response wrapper: `{"data": ..., "error": ..., "success": bool}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: Option<T>,
    pub error: Option<ErrorBody>,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            success: true,
        }
    }
}

impl Envelope<()> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(ErrorBody {
                message: message.into(),
            }),
            success: false,
        }
    }
}

/// Handler output: status plus enveloped body.
pub type Reply<T> = (StatusCode, Json<Envelope<T>>);

pub fn reply<T>(status: StatusCode, data: T) -> Reply<T> {
    (status, Json(Envelope::ok(data)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterClientRequest {
    pub name: String,
    /// Minutes.
    pub access_token_ttl: i64,
    /// Minutes.
    pub session_ttl: i64,
    pub max_active_sessions: i64,
    pub session_strategy: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterClientResponse {
    pub id: Uuid,
    pub secret: Uuid,
    /// Base64 of the raw 32-byte ed25519 public key.
    pub public_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevokeClientRequest {
    pub id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignUpRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePasswordRequest {
    pub email: String,
    pub old_password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: Uuid,
}

/// Body of both `/session/refresh-token` and `/session/logout`.
///
/// Kept as a string so a malformed token reaches the core and is reported as
/// a validation error.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
}
