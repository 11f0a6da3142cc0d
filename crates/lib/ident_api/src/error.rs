//! Application error type.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ident_core::{Error, ErrorKind};

use crate::models::Envelope;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Nginx's "client closed request"; there is no standard code for it.
const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Core error on its way out over HTTP.
#[derive(Debug)]
pub struct AppError(pub Error);

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        self.0.kind()
    }

    pub fn status(&self) -> StatusCode {
        status_for(self.kind())
    }
}

/// HTTP status for the outermost error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::InvalidCredentials | ErrorKind::AuthenticationError => StatusCode::UNAUTHORIZED,
        ErrorKind::ResourceNotFound => StatusCode::NOT_FOUND,
        ErrorKind::DuplicateRecord => StatusCode::CONFLICT,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Cancelled => {
            StatusCode::from_u16(CLIENT_CLOSED_REQUEST).unwrap_or(StatusCode::REQUEST_TIMEOUT)
        }
        ErrorKind::Config | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        AppError(e)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError(Error::validation("parse request body", rejection.body_text()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(kind = %self.kind(), error = ?self.0, "request failed");
            "internal server error".to_string()
        } else {
            tracing::debug!(kind = %self.kind(), op = self.0.op(), "request rejected");
            self.0.public_message().to_string()
        };
        (status, Json(Envelope::failure(message))).into_response()
    }
}
