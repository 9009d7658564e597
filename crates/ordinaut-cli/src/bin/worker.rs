//! Worker runtime entry point. Exit codes: 0 normal, 2 configuration error,
//! 3 database unreachable at startup.

use std::process::ExitCode;
use std::sync::Arc;

use ordinaut_cli::Config;
use ordinaut_core::SimulatingInvoker;
use ordinaut_runtime::{run_service, Worker};
use ordinaut_store::PostgresStore;

#[tokio::main]
async fn main() -> ExitCode {
    ordinaut_cli::init_tracing("info,ordinaut_runtime=debug,sqlx=warn");

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "configuration error");
            return ExitCode::from(2);
        }
    };

    let pool = match ordinaut_cli::connect(&config.database_url).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to database");
            return ExitCode::from(3);
        }
    };

    let store = Arc::new(PostgresStore::new(pool));
    let invoker = Arc::new(SimulatingInvoker::default());
    let worker = Worker::new(store, invoker, config.worker_config());

    if let Err(e) = run_service(Box::new(worker)).await {
        tracing::error!(error = %e, "worker exited with an error");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}
