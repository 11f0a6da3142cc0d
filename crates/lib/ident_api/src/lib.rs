//! # ident_api
//!
//! HTTP API library for Ident.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use ident_core::Identity;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::handlers::{client, health, session, user};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Registries and session manager.
    pub identity: Arc<Identity>,
    /// API configuration.
    pub config: ApiConfig,
}

/// Run embedded database migrations.
///
/// Delegates to `ident_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    ident_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new().route(routes::GET_PING, get(health::ping));

    // Admin routes (basic auth)
    let admin = Router::new()
        .route(routes::POST_CLIENT_REGISTER, post(client::register_handler))
        .route(routes::POST_CLIENT_REVOKE, post(client::revoke_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::admin::require_admin,
        ));

    // Client routes (CLIENT-ID / CLIENT-SECRET headers)
    let client_scoped = Router::new()
        .route(routes::POST_USER_SIGN_UP, post(user::sign_up_handler))
        .route(
            routes::POST_USER_UPDATE_PASSWORD,
            post(user::update_password_handler),
        )
        .route(routes::POST_SESSION_LOGIN, post(session::login_handler))
        .route(
            routes::POST_SESSION_REFRESH_TOKEN,
            post(session::refresh_handler),
        )
        .route(routes::POST_SESSION_LOGOUT, post(session::logout_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::client::require_client,
        ));

    Router::new()
        .merge(public)
        .merge(admin)
        .merge(client_scoped)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
