//! Scheduler Daemon (spec §4.4): materializes task schedules into
//! `due_work` rows. Single active leader via a Postgres advisory lock;
//! other scheduler processes stay alive and keep retrying the lock for HA.
//!
//! Misfire coalescing is grounded in the `missed_window_count`/
//! `cooldown_minutes` pattern from `sblanchard-SerialAgent`'s schedule
//! runner: rather than enqueueing one row per missed tick during an
//! outage, a task whose computed next occurrence is older than
//! `misfire_grace` just gets a single catch-up row at `now`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use ordinaut_core::trigger;
use ordinaut_store::DurableStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::service::Service;

/// Fixed key for the single-leader advisory lock. Arbitrary but constant
/// across the fleet.
const LEADER_LOCK_KEY: i64 = 0x4f5264_6e74; // "Ordnt" in hex, just a stable constant

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub misfire_grace: chrono::Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            misfire_grace: chrono::Duration::seconds(30),
        }
    }
}

pub struct Scheduler {
    store: Arc<dyn DurableStore>,
    pool: sqlx::PgPool,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(store: Arc<dyn DurableStore>, pool: sqlx::PgPool, config: SchedulerConfig) -> Self {
        Self { store, pool, config }
    }

    /// Both of these must run on the same physical connection: the lock is
    /// session-scoped, not transaction-scoped, so acquiring on one pooled
    /// connection and releasing via another silently unlocks nothing and
    /// leaks the lock until that connection closes.
    async fn try_acquire_leadership(conn: &mut sqlx::pool::PoolConnection<sqlx::Postgres>) -> Result<bool> {
        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(LEADER_LOCK_KEY)
            .fetch_one(&mut **conn)
            .await?;
        Ok(acquired)
    }

    async fn release_leadership(conn: &mut sqlx::pool::PoolConnection<sqlx::Postgres>) {
        let _ = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(LEADER_LOCK_KEY)
            .execute(&mut **conn)
            .await;
    }

    async fn tick(&self) -> Result<()> {
        let now = Utc::now();
        let tasks = self.store.list_active_tasks().await?;
        for task in tasks {
            if task.schedule_kind == ordinaut_core::ScheduleKind::Event {
                continue; // driven by Event Ingress, not the tick loop
            }
            if self.store.has_scheduled_due_work(task.id).await? {
                continue;
            }

            let next = match trigger::next_occurrence(
                task.schedule_kind,
                &task.schedule_expr,
                &task.timezone,
                now,
                task.created_at,
            ) {
                Ok(next) => next,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "failed to evaluate trigger, skipping tick");
                    continue;
                }
            };

            let Some(next) = next else {
                continue;
            };

            let lag = now.signed_duration_since(next);
            let run_at = if lag > self.config.misfire_grace {
                debug!(task_id = %task.id, lag_seconds = lag.num_seconds(), "coalescing missed occurrence into a single catch-up run");
                now
            } else {
                next
            };

            self.store.enqueue_due_work(task.id, run_at).await?;
        }
        Ok(())
    }

    /// Manual "run now": bypasses the schedule entirely.
    pub async fn run_now(&self, task_id: ordinaut_store::TaskId) -> Result<()> {
        self.store.enqueue_due_work(task_id, Utc::now()).await?;
        Ok(())
    }

    /// Called when a task is edited or paused: drop any not-yet-claimed
    /// scheduled occurrence so the next tick recomputes from scratch.
    pub async fn cancel_scheduled(&self, task_id: ordinaut_store::TaskId) -> Result<()> {
        self.store.cancel_unlocked_due_work(task_id).await?;
        Ok(())
    }
}

impl Service for Scheduler {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    fn run(
        self: Box<Self>,
        shutdown: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            loop {
                if shutdown.is_cancelled() {
                    break;
                }

                let mut conn = match self.pool.acquire().await {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "failed to acquire a connection for leadership attempt");
                        tokio::time::sleep(self.config.tick_interval).await;
                        continue;
                    }
                };

                match Self::try_acquire_leadership(&mut conn).await {
                    Ok(true) => {
                        info!("acquired scheduler leadership");
                        loop {
                            if shutdown.is_cancelled() {
                                break;
                            }
                            if let Err(e) = self.tick().await {
                                warn!(error = %e, "scheduler tick failed");
                            }
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = tokio::time::sleep(self.config.tick_interval) => {}
                            }
                        }
                        Self::release_leadership(&mut conn).await;
                        break;
                    }
                    Ok(false) => {
                        debug!("standby: another scheduler holds leadership");
                        drop(conn);
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(self.config.tick_interval) => {}
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to attempt leadership acquisition");
                        drop(conn);
                        tokio::time::sleep(self.config.tick_interval).await;
                    }
                }
            }
            Ok(())
        })
    }
}
