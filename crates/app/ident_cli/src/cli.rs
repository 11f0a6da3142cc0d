use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ident-cli", version, about = "Ident administration")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the version.
    Version,

    /// Generate an ed25519 signing key for IDENT_SIGNING_KEY.
    ///
    /// Prints the base64 of an unencrypted OpenSSH private key.
    Keygen {
        /// Comment stored in the key.
        #[arg(long, default_value = "ident")]
        comment: String,
    },

    /// Apply the embedded database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,

        /// Seconds to wait for a database connection.
        #[arg(long, default_value_t = 10)]
        connect_timeout_secs: u64,
    },
}
