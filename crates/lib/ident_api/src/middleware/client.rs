//! Client authentication middleware: `CLIENT-ID` / `CLIENT-SECRET` headers.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use ident_core::{ClientContext, Ctx, Error};

use crate::AppState;
use crate::error::AppError;

pub const CLIENT_ID_HEADER: &str = "client-id";
pub const CLIENT_SECRET_HEADER: &str = "client-secret";

const OP: &str = "authenticate client";

fn header(headers: &HeaderMap, name: &str) -> Result<String, Error> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| Error::authentication(OP, "client credentials are required"))
}

/// Axum middleware: resolves the calling client and injects a
/// [`ClientContext`] carrying the request deadline into request extensions.
pub async fn require_client(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let name = header(request.headers(), CLIENT_ID_HEADER)?;
    let secret = header(request.headers(), CLIENT_SECRET_HEADER)?;

    let ctx = Ctx::new(state.config.request_timeout);
    let client = state.identity.clients.get(&ctx, &name, &secret).await?;
    if client.revoked {
        tracing::debug!(client = %client.name, "rejected revoked client");
        return Err(Error::authentication(OP, "client has been revoked").into());
    }

    request
        .extensions_mut()
        .insert(ClientContext::new(ctx, Arc::new(client)));

    Ok(next.run(request).await)
}
