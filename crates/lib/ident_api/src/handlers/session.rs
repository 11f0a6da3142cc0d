//! Session handlers.

use axum::Extension;
use axum::extract::State;
use axum::http::StatusCode;
use ident_core::ClientContext;

use crate::AppState;
use crate::error::AppResult;
use crate::extract::ApiJson;
use crate::models::{
    AccessTokenResponse, LoginRequest, LoginResponse, MessageResponse, RefreshTokenRequest, Reply,
    reply,
};

/// `POST /session/login`: open a session and mint its first access token.
pub async fn login_handler(
    State(state): State<AppState>,
    Extension(cctx): Extension<ClientContext>,
    ApiJson(body): ApiJson<LoginRequest>,
) -> AppResult<Reply<LoginResponse>> {
    let pair = state
        .identity
        .sessions
        .login(&cctx, &body.email, &body.password)
        .await?;
    Ok(reply(
        StatusCode::CREATED,
        LoginResponse {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        },
    ))
}

/// `POST /session/refresh-token`
pub async fn refresh_handler(
    State(state): State<AppState>,
    Extension(cctx): Extension<ClientContext>,
    ApiJson(body): ApiJson<RefreshTokenRequest>,
) -> AppResult<Reply<AccessTokenResponse>> {
    let access_token = state
        .identity
        .sessions
        .refresh(&cctx, &body.refresh_token)
        .await?;
    Ok(reply(StatusCode::OK, AccessTokenResponse { access_token }))
}

/// `POST /session/logout`
pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(cctx): Extension<ClientContext>,
    ApiJson(body): ApiJson<RefreshTokenRequest>,
) -> AppResult<Reply<MessageResponse>> {
    state
        .identity
        .sessions
        .logout(&cctx, &body.refresh_token)
        .await?;
    Ok(reply(StatusCode::OK, MessageResponse::new("logged out")))
}
