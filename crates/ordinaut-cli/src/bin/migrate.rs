//! Standalone migration runner, mirroring the teacher's `migrate_cli`
//! binary. Not a spec-named process — an operational convenience for
//! running `ordinaut-store`'s embedded migrations ahead of deploying the
//! daemons. Exit codes: 0 normal, 2 configuration error, 3 database
//! unreachable or migration failure.

use std::process::ExitCode;

use clap::Parser;
use ordinaut_cli::Config;

#[derive(Parser, Debug)]
struct Args {
    /// Overrides DATABASE_URL from the environment/.env file.
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    ordinaut_cli::init_tracing("info,sqlx=warn");

    let args = Args::parse();

    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::from(2);
        }
    };
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }

    let pool = match ordinaut_cli::connect(&config.database_url).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to database");
            return ExitCode::from(3);
        }
    };

    tracing::info!("running migrations");
    if let Err(e) = ordinaut_store::migrate(&pool).await {
        tracing::error!(error = %e, "migration failed");
        return ExitCode::from(3);
    }
    tracing::info!("migrations complete");
    ExitCode::SUCCESS
}
