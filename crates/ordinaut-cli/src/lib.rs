pub mod config;

pub use config::Config;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes `tracing_subscriber` the way the teacher's `main.rs` does:
/// an `EnvFilter` seeded from `RUST_LOG`, falling back to `default_filter`.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Connects to Postgres with the same pool shape the teacher's binaries
/// use. Callers exit(3) on error per the documented process contract.
pub async fn connect(database_url: &str) -> Result<sqlx::PgPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
}
