//! Request extractors.

use axum::extract::FromRequest;

use crate::error::AppError;

/// `Json<T>` whose rejections are reported as validation errors inside the
/// response envelope.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);
