//! Process configuration, loaded from the environment exactly as the
//! teacher's `Config::from_env()` does: `dotenvy::dotenv()` first, then
//! required variables validated with `anyhow::Context` and optional ones
//! defaulted.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    pub worker_id: Option<String>,
    pub worker_batch_size: i64,
    pub worker_poll_interval_ms: u64,
    pub worker_lease_seconds: i64,
    pub worker_heartbeat_seconds: u64,

    pub scheduler_tick_seconds: u64,
    pub scheduler_misfire_grace_seconds: i64,

    pub coordinator_interval_seconds: u64,
    pub coordinator_stale_lease_grace_seconds: i64,
    pub coordinator_dead_heartbeat_seconds: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,

            worker_id: env::var("WORKER_ID").ok(),
            worker_batch_size: env_or("WORKER_BATCH_SIZE", 10)?,
            worker_poll_interval_ms: env_or("WORKER_POLL_INTERVAL_MS", 500)?,
            worker_lease_seconds: env_or("WORKER_LEASE_SECONDS", 60)?,
            worker_heartbeat_seconds: env_or("WORKER_HEARTBEAT_SECONDS", 30)?,

            scheduler_tick_seconds: env_or("SCHEDULER_TICK_SECONDS", 5)?,
            scheduler_misfire_grace_seconds: env_or("SCHEDULER_MISFIRE_GRACE_SECONDS", 30)?,

            coordinator_interval_seconds: env_or("COORDINATOR_INTERVAL_SECONDS", 60)?,
            coordinator_stale_lease_grace_seconds: env_or("COORDINATOR_STALE_LEASE_GRACE_SECONDS", 60)?,
            coordinator_dead_heartbeat_seconds: env_or("COORDINATOR_DEAD_HEARTBEAT_SECONDS", 600)?,
        })
    }

    pub fn worker_config(&self) -> ordinaut_runtime::WorkerConfig {
        let mut config = ordinaut_runtime::WorkerConfig {
            batch_size: self.worker_batch_size,
            poll_interval: Duration::from_millis(self.worker_poll_interval_ms),
            lease_seconds: self.worker_lease_seconds,
            heartbeat_interval: Duration::from_secs(self.worker_heartbeat_seconds),
            ..Default::default()
        };
        if let Some(id) = &self.worker_id {
            config = config.with_worker_id(id.clone());
        }
        config
    }

    pub fn scheduler_config(&self) -> ordinaut_runtime::SchedulerConfig {
        ordinaut_runtime::SchedulerConfig {
            tick_interval: Duration::from_secs(self.scheduler_tick_seconds),
            misfire_grace: chrono::Duration::seconds(self.scheduler_misfire_grace_seconds),
        }
    }

    pub fn coordinator_config(&self) -> ordinaut_runtime::CoordinatorConfig {
        ordinaut_runtime::CoordinatorConfig {
            interval: Duration::from_secs(self.coordinator_interval_seconds),
            stale_lease_grace_seconds: self.coordinator_stale_lease_grace_seconds,
            dead_heartbeat_seconds: self.coordinator_dead_heartbeat_seconds,
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("{key} must be a valid value: {e}")),
        Err(_) => Ok(default),
    }
}
