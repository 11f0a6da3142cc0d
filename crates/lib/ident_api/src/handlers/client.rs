//! Client administration handlers.

use axum::extract::State;
use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ident_core::Ctx;
use ident_core::client::{ClientPolicy, ClientSpec};

use crate::AppState;
use crate::error::AppResult;
use crate::extract::ApiJson;
use crate::models::{
    MessageResponse, RegisterClientRequest, RegisterClientResponse, Reply, RevokeClientRequest,
    reply,
};

/// `POST /client/register`: create a client and its signing key.
///
/// The secret is only ever returned here.
pub async fn register_handler(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RegisterClientRequest>,
) -> AppResult<Reply<RegisterClientResponse>> {
    let ctx = Ctx::new(state.config.request_timeout);
    let spec = ClientSpec {
        name: body.name,
        policy: ClientPolicy {
            access_token_ttl_minutes: body.access_token_ttl,
            session_ttl_minutes: body.session_ttl,
            max_active_sessions: body.max_active_sessions,
            session_strategy: body.session_strategy,
        },
    };
    let registered = state.identity.clients.register(&ctx, spec).await?;
    Ok(reply(
        StatusCode::CREATED,
        RegisterClientResponse {
            id: registered.id,
            secret: registered.secret,
            public_key: STANDARD.encode(&registered.public_key),
        },
    ))
}

/// `POST /client/revoke`
pub async fn revoke_handler(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RevokeClientRequest>,
) -> AppResult<Reply<MessageResponse>> {
    let ctx = Ctx::new(state.config.request_timeout);
    state.identity.clients.revoke(&ctx, body.id).await?;
    Ok(reply(StatusCode::OK, MessageResponse::new("client revoked")))
}
