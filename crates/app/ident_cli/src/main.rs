// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use std::time::Duration;

use clap::Parser;
use cli::{Cli, Commands};
use sqlx::postgres::PgPoolOptions;

mod cli;
mod logging;

fn main() -> Result<()> {
    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<()> {
    logging::init()?;

    let args = Cli::parse();

    match &args.command {
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        }
        Commands::Keygen { comment } => {
            println!("{}", ident_core::token::generate_encoded_signing_key(comment)?);
        }
        Commands::Migrate {
            database_url,
            connect_timeout_secs,
        } => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(migrate(database_url, Duration::from_secs(*connect_timeout_secs)))?;
        }
    }

    Ok(())
}

async fn migrate(database_url: &str, connect_timeout: Duration) -> Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(connect_timeout)
        .connect(database_url)
        .await?;
    ident_core::migrate::migrate(&pool).await?;
    pool.close().await;
    log::info!("migrations applied");
    Ok(())
}
