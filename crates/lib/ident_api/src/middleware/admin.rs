//! Admin authentication middleware: HTTP Basic against the configured
//! credentials.

use axum::{
    extract::{Request, State},
    http::{
        HeaderValue,
        header::{AUTHORIZATION, WWW_AUTHENTICATE},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ident_core::Error;
use subtle::ConstantTimeEq;

use crate::AppState;
use crate::config::ApiConfig;
use crate::error::AppError;

const OP: &str = "authenticate admin";

/// Decode `Basic <base64(user:password)>`.
fn basic_credentials(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

fn is_admin(config: &ApiConfig, user: &str, password: &str) -> bool {
    let user_ok = user.as_bytes().ct_eq(config.admin_user.as_bytes());
    let password_ok = password.as_bytes().ct_eq(config.admin_password.as_bytes());
    (user_ok & password_ok).into()
}

fn unauthorized(message: &str) -> Response {
    let mut response = AppError(Error::authentication(OP, message)).into_response();
    response.headers_mut().insert(
        WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"ident\""),
    );
    response
}

/// Axum middleware: requires admin Basic credentials.
pub async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let credentials = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(basic_credentials);

    match credentials {
        None => unauthorized("admin credentials are required"),
        Some((user, password)) if is_admin(&state.config, &user, &password) => {
            next.run(request).await
        }
        Some((user, _)) => {
            tracing::warn!(user = %user, "admin authentication failed");
            unauthorized("invalid admin credentials")
        }
    }
}
