//! Error value shared by every layer of the core.
//!
//! An [`Error`] carries an optional [`ErrorKind`], the name of the operation
//! that produced it and an optional cause. Wrapping keeps the cause intact and
//! leaves the kind unset, so [`Error::kind`] walks the chain and reports the
//! outermost kind that was set explicitly.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

/// Boxed, thread-safe error used as a cause.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Result alias for core operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Classification of a failure, independent of where it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Input fails its contract (empty, invalid format, rule violation).
    Validation,
    /// Password mismatch or unknown user on the authentication path.
    InvalidCredentials,
    /// Missing or invalid client credentials, or an expired/revoked session.
    AuthenticationError,
    /// A required row is absent.
    ResourceNotFound,
    /// Unique-constraint violation.
    DuplicateRecord,
    /// Deadline exceeded while waiting on I/O.
    Timeout,
    /// The caller cancelled the operation.
    Cancelled,
    /// Malformed configuration or key material.
    Config,
    /// Everything else.
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::InvalidCredentials => "invalid_credentials",
            ErrorKind::AuthenticationError => "authentication_error",
            ErrorKind::ResourceNotFound => "resource_not_found",
            ErrorKind::DuplicateRecord => "duplicate_record",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged error: `{kind?, op, message, cause?}`.
#[derive(Debug, thiserror::Error)]
#[error("{op}: {message}")]
pub struct Error {
    kind: Option<ErrorKind>,
    op: Cow<'static, str>,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl Error {
    /// Create an error with an explicit kind.
    pub fn new(
        kind: ErrorKind,
        op: impl Into<Cow<'static, str>>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: Some(kind),
            op: op.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a cause under `op` without classifying it.
    pub fn wrap(op: impl Into<Cow<'static, str>>, cause: impl Into<BoxError>) -> Self {
        let cause = cause.into();
        Self {
            kind: None,
            op: op.into(),
            message: cause.to_string(),
            source: Some(cause),
        }
    }

    /// Attach a cause to an already classified error.
    pub fn with_source(mut self, cause: impl Into<BoxError>) -> Self {
        self.source = Some(cause.into());
        self
    }

    /// Re-classify: a new outer error with `kind`, keeping `self` as the cause.
    pub fn reclassify(
        self,
        kind: ErrorKind,
        op: impl Into<Cow<'static, str>>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(kind, op, message).with_source(self)
    }

    pub fn validation(op: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, op, message)
    }

    pub fn invalid_credentials(op: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::InvalidCredentials, op, "invalid credentials")
    }

    pub fn authentication(op: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationError, op, message)
    }

    pub fn not_found(op: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceNotFound, op, message)
    }

    pub fn duplicate(op: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateRecord, op, message)
    }

    pub fn timeout(op: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Timeout, op, "deadline exceeded")
    }

    pub fn cancelled(op: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::Cancelled, op, "operation cancelled")
    }

    pub fn config(op: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, op, message)
    }

    pub fn internal(op: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, op, message)
    }

    /// Operation tag of this (outermost) error.
    pub fn op(&self) -> &str {
        &self.op
    }

    /// The outermost explicitly set kind in the chain, `Internal` if none.
    pub fn kind(&self) -> ErrorKind {
        self.classified()
            .and_then(|e| e.kind)
            .unwrap_or(ErrorKind::Internal)
    }

    /// Message of the error that carries the effective kind.
    ///
    /// This is the text safe to show a caller: it never includes the messages
    /// of the causes below it.
    pub fn public_message(&self) -> &str {
        self.classified()
            .map(|e| e.message.as_str())
            .unwrap_or(self.message.as_str())
    }

    /// True when the chain was interrupted by a deadline or a cancellation.
    pub fn is_interrupted(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout | ErrorKind::Cancelled)
    }

    fn classified(&self) -> Option<&Error> {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(e) = err.downcast_ref::<Error>()
                && e.kind.is_some()
            {
                return Some(e);
            }
            current = err.source();
        }
        None
    }
}

/// Extension for tagging fallible results with an operation name.
pub trait OpContext<T> {
    /// Wrap the error (if any) under `op`, keeping its kind.
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> OpContext<T> for Result<T> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|e| Error::wrap(op, e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::wrap("json", e)
    }
}

/// Classify a Redis failure: timeouts stay timeouts, the rest is internal.
pub(crate) fn redis_error(op: &'static str, err: redis::RedisError) -> Error {
    if err.is_timeout() {
        Error::timeout(op).with_source(err)
    } else {
        Error::wrap(op, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unclassified_error_is_internal() {
        let err = Error::wrap("load", std::io::Error::other("disk"));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn wrapping_keeps_inner_kind() {
        let inner = Error::not_found("find session", "session not found");
        let outer = Error::wrap("logout", Error::wrap("load", inner));
        assert_eq!(outer.kind(), ErrorKind::ResourceNotFound);
        assert_eq!(outer.public_message(), "session not found");
    }

    #[test]
    fn explicit_kind_overrides_inner_kind() {
        let inner = Error::not_found("find user", "user not found");
        let outer = inner.reclassify(ErrorKind::InvalidCredentials, "authenticate", "invalid credentials");
        assert_eq!(outer.kind(), ErrorKind::InvalidCredentials);
        assert_eq!(outer.public_message(), "invalid credentials");
        assert!(outer.source().is_some());
    }

    #[test]
    fn op_context_wraps_without_reclassifying() {
        let res: Result<()> = Err(Error::cancelled("query"));
        let err = res.op("login").unwrap_err();
        assert_eq!(err.op(), "login");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(err.is_interrupted());
    }

    #[test]
    fn display_includes_operation() {
        let err = Error::validation("register", "name is required");
        assert_eq!(err.to_string(), "register: name is required");
    }
}
