//! Command-line and environment configuration.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use ident_api::config::ApiConfig;
use ident_core::event::QueueMap;
use ident_core::identity::Settings;
use ident_core::password::{
    DEFAULT_ITERATIONS, DEFAULT_KEY_LENGTH, DEFAULT_SALT_LENGTH, PasswordPolicy,
};
use ident_core::strategy::StrategyRegistry;
use ident_core::token::{TokenSettings, load_signing_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// CLI arguments for the server. Every flag falls back to an environment
/// variable.
#[derive(Parser)]
#[command(name = "ident_server", about = "Ident identification service")]
pub struct Args {
    /// Address to bind the HTTP listener.
    #[arg(long, env = "IDENT_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/ident"
    )]
    pub database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, env = "IDENT_DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub max_connections: u32,

    /// Per-query timeout.
    #[arg(long, env = "IDENT_DB_QUERY_TIMEOUT_SECS", default_value_t = 60)]
    pub db_query_timeout_secs: u64,

    /// Redis URL for the client cache.
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Redis URL for the event bus; defaults to `--redis-url`.
    #[arg(long, env = "IDENT_BUS_URL")]
    pub bus_url: Option<String>,

    #[arg(long, env = "IDENT_CLIENT_CACHE_TTL_SECS", default_value_t = 300)]
    pub client_cache_ttl_secs: u64,

    /// Passphrase sealing cached client records.
    #[arg(long, env = "IDENT_CACHE_ENCRYPTION_KEY", hide_env_values = true)]
    pub cache_encryption_key: String,

    /// Consumer group on the event streams.
    #[arg(long, env = "IDENT_BUS_GROUP", default_value = "ident")]
    pub bus_group: String,

    /// Consumer name within the group; unique per replica.
    #[arg(long, env = "IDENT_BUS_CONSUMER", default_value = "ident")]
    pub bus_consumer: String,

    /// Event code to queue map, `code=queue,...`. Defaults to one queue per code,
    /// named after the code.
    #[arg(long, env = "IDENT_QUEUES")]
    pub queues: Option<String>,

    #[arg(long, env = "IDENT_ADMIN_USER")]
    pub admin_user: String,

    #[arg(long, env = "IDENT_ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: String,

    #[arg(long, env = "IDENT_TOKEN_AUDIENCE")]
    pub token_audience: String,

    #[arg(long, env = "IDENT_TOKEN_ISSUER")]
    pub token_issuer: String,

    /// Base64 of an unencrypted OpenSSH ed25519 private key.
    #[arg(long, env = "IDENT_SIGNING_KEY", hide_env_values = true)]
    pub signing_key: String,

    #[arg(long, env = "IDENT_PASSWORD_SALT_LENGTH", default_value_t = DEFAULT_SALT_LENGTH)]
    pub password_salt_length: usize,

    #[arg(long, env = "IDENT_PASSWORD_ITERATIONS", default_value_t = DEFAULT_ITERATIONS)]
    pub password_iterations: u32,

    #[arg(long, env = "IDENT_PASSWORD_KEY_LENGTH", default_value_t = DEFAULT_KEY_LENGTH)]
    pub password_key_length: usize,

    /// Allowed session overflow strategies.
    #[arg(
        long,
        env = "IDENT_SESSION_STRATEGIES",
        value_delimiter = ',',
        default_value = "revoke_old"
    )]
    pub session_strategies: Vec<String>,

    /// Deadline for every request.
    #[arg(long, env = "IDENT_REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    pub request_timeout_secs: u64,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Args {
    /// Validate and convert into the core settings.
    pub fn settings(&self) -> ident_core::Result<Settings> {
        let password = PasswordPolicy {
            salt_length: self.password_salt_length,
            iterations: self.password_iterations,
            key_length: self.password_key_length,
        };
        password.validate()?;

        let queues = match &self.queues {
            Some(spec) => spec.parse()?,
            None => QueueMap::default(),
        };

        Ok(Settings {
            password,
            tokens: TokenSettings {
                audience: self.token_audience.clone(),
                issuer: self.token_issuer.clone(),
            },
            signing_key: load_signing_key(&self.signing_key)?,
            strategies: StrategyRegistry::with_builtin().restrict(&self.session_strategies)?,
            queues,
        })
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig::new(&self.admin_user, &self.admin_password)
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
    }

    pub fn bus_url(&self) -> &str {
        self.bus_url.as_deref().unwrap_or(&self.redis_url)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.db_query_timeout_secs)
    }

    pub fn client_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.client_cache_ttl_secs)
    }
}
