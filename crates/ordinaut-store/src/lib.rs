//! Durable persistence for Ordinaut: typed ids, row models, and the
//! PostgreSQL-backed `DurableStore`.

pub mod error;
pub mod id;
pub mod model;
pub mod store;

pub use error::{Result, StoreError};
pub use id::{Agent as AgentMarker, AgentId, Id, Task as TaskMarker, TaskId, TaskRun as TaskRunMarker, TaskRunId, V4, V7};
pub use model::{Agent, Backoff, DueWork, DueWorkId, Task, TaskRun, TaskStatus, WorkerHeartbeat};
pub use store::{ClaimedWork, ConcurrencyGuard, DurableStore, NewTask, PostgresStore, QueueStats};

/// Runs embedded migrations against `pool`. Thin wrapper so callers in
/// `ordinaut-cli` don't need to know the migrations path.
pub async fn migrate(pool: &sqlx::PgPool) -> std::result::Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
