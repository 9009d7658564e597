//! Coordinator (spec §4.6): periodic maintenance so every claimable row is
//! eventually processed even if workers crash. Grounded on the reclaim
//! branch of the teacher's `Job::claim_jobs` (`status = 'running' AND
//! lease_expires_at < NOW()`), generalized here into its own sweep rather
//! than folded into the claim query, since the spec keeps reclaim and
//! claim as separate responsibilities (Worker vs. Coordinator).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ordinaut_store::DurableStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::service::Service;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub interval: Duration,
    pub stale_lease_grace_seconds: i64,
    pub dead_heartbeat_seconds: i64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stale_lease_grace_seconds: 60,
            dead_heartbeat_seconds: 600,
        }
    }
}

pub struct Coordinator {
    store: Arc<dyn DurableStore>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(store: Arc<dyn DurableStore>, config: CoordinatorConfig) -> Self {
        Self { store, config }
    }

    async fn sweep(&self) -> Result<()> {
        let reclaimed = self
            .store
            .reclaim_expired_leases(self.config.stale_lease_grace_seconds, self.config.dead_heartbeat_seconds)
            .await?;
        if reclaimed > 0 {
            info!(reclaimed, "reclaimed expired leases");
        }

        let pruned = self
            .store
            .prune_dead_heartbeats(self.config.dead_heartbeat_seconds)
            .await?;
        if pruned > 0 {
            info!(pruned, "pruned dead worker heartbeats");
        }

        let stats = self.store.queue_stats().await?;
        info!(
            pending = stats.pending,
            ready = stats.ready,
            leased = stats.leased,
            oldest_age_seconds = stats.oldest_age_seconds,
            "queue statistics"
        );
        Ok(())
    }
}

impl Service for Coordinator {
    fn name(&self) -> &'static str {
        "coordinator"
    }

    fn run(
        self: Box<Self>,
        shutdown: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            loop {
                if let Err(e) = self.sweep().await {
                    warn!(error = %e, "coordinator sweep failed");
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.interval) => {}
                }
            }
            Ok(())
        })
    }
}
