//! User handlers.

use axum::Extension;
use axum::extract::State;
use axum::http::StatusCode;
use ident_core::ClientContext;

use crate::AppState;
use crate::error::AppResult;
use crate::extract::ApiJson;
use crate::models::{MessageResponse, Reply, SignUpRequest, UpdatePasswordRequest, reply};

/// `POST /user/sign-up`
pub async fn sign_up_handler(
    State(state): State<AppState>,
    Extension(cctx): Extension<ClientContext>,
    ApiJson(body): ApiJson<SignUpRequest>,
) -> AppResult<Reply<MessageResponse>> {
    let user_id = state
        .identity
        .users
        .create_user(&cctx.ctx, &body.name, &body.email, &body.password)
        .await?;
    tracing::debug!(client = %cctx.client.name, user_id = %user_id, "user signed up");
    Ok(reply(StatusCode::CREATED, MessageResponse::new("user created")))
}

/// `POST /user/update-password`: also revokes every session of the user,
/// asynchronously.
pub async fn update_password_handler(
    State(state): State<AppState>,
    Extension(cctx): Extension<ClientContext>,
    ApiJson(body): ApiJson<UpdatePasswordRequest>,
) -> AppResult<Reply<MessageResponse>> {
    state
        .identity
        .users
        .update_password(&cctx.ctx, &body.email, &body.old_password, &body.new_password)
        .await?;
    Ok(reply(StatusCode::OK, MessageResponse::new("password updated")))
}
