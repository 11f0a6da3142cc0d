//! API configuration.

use std::fmt;
use std::time::Duration;

/// Per-request deadline used when none is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for the HTTP layer.
#[derive(Clone)]
pub struct ApiConfig {
    /// Basic-auth user for the client administration routes.
    pub admin_user: String,
    /// Basic-auth password for the client administration routes.
    pub admin_password: String,
    /// Deadline attached to every request context.
    pub request_timeout: Duration,
}

impl ApiConfig {
    pub fn new(admin_user: impl Into<String>, admin_password: impl Into<String>) -> Self {
        Self {
            admin_user: admin_user.into(),
            admin_password: admin_password.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("admin_user", &self.admin_user)
            .field("admin_password", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_admin_password() {
        let config = ApiConfig::new("admin", "hunter22");
        let printed = format!("{config:?}");
        assert!(printed.contains("admin"));
        assert!(!printed.contains("hunter22"));
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }
}
