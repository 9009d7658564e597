//! Worker Runtime (spec §4.5): leases one `due_work` row at a time, runs
//! its pipeline, and applies the retry/terminal-write discipline. Grounded
//! on the teacher's `kernel/jobs/worker.rs::JobWorker` (`process_job`,
//! `execute_with_heartbeat`, the `Service` impl's poll loop).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use ordinaut_core::error::ErrorClass;
use ordinaut_core::{Invoker, Pipeline};
use ordinaut_store::{ClaimedWork, DurableStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::service::Service;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub batch_size: i64,
    pub poll_interval: Duration,
    pub lease_seconds: i64,
    pub heartbeat_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            batch_size: 10,
            poll_interval: Duration::from_millis(500),
            lease_seconds: 60,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }
}

pub struct Worker {
    store: Arc<dyn DurableStore>,
    invoker: Arc<dyn Invoker>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(store: Arc<dyn DurableStore>, invoker: Arc<dyn Invoker>, config: WorkerConfig) -> Self {
        Self { store, invoker, config }
    }

    async fn run_heartbeat_loop(store: Arc<dyn DurableStore>, worker_id: String, interval: Duration, shutdown: CancellationToken) {
        let pid = std::process::id() as i32;
        let hostname = hostname();
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = store.heartbeat(&worker_id, pid, &hostname).await {
                        warn!(worker_id = %worker_id, error = %e, "heartbeat upsert failed");
                    }
                }
            }
        }
    }

    /// Outcome of racing pipeline execution against lease loss and a
    /// shutdown deadline. Only `Ran` may produce a terminal store write.
    async fn process_claim(&self, claimed: ClaimedWork, shutdown: CancellationToken) {
        let ClaimedWork { due_work, task, concurrency_guard } = claimed;
        let claim_start = Instant::now();

        let run_id = match self
            .store
            .create_task_run(task.id, &self.config.worker_id, due_work.attempt)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "failed to create task_run, leaving row for reclaim");
                Self::release_concurrency_guard(concurrency_guard).await;
                return;
            }
        };

        let pipeline: Pipeline = match serde_json::from_value(task.payload.clone().into_json()) {
            Ok(p) => p,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "malformed pipeline payload, terminal failure");
                let _ = self
                    .store
                    .complete_due_work_failure(due_work.id, run_id, &format!("malformed payload: {e}"))
                    .await;
                Self::release_concurrency_guard(concurrency_guard).await;
                return;
            }
        };

        // Cancelled by the renewal task below the moment it observes that
        // another worker now owns this row (spec §7 LeaseLost): any write
        // already in flight must be discarded, never committed.
        let lease_lost = CancellationToken::new();
        let renewal_shutdown = CancellationToken::new();
        let renewal_handle = tokio::spawn({
            let store = Arc::clone(&self.store);
            let worker_id = self.config.worker_id.clone();
            let lease_seconds = self.config.lease_seconds;
            let due_work_id = due_work.id;
            let shutdown = renewal_shutdown.clone();
            let lease_lost = lease_lost.clone();
            async move {
                let half = Duration::from_secs((lease_seconds / 2).max(1) as u64);
                let mut ticker = tokio::time::interval(half);
                ticker.tick().await; // first tick fires immediately; skip it
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = store.extend_lease(due_work_id, &worker_id, lease_seconds).await {
                                warn!(due_work_id, error = %e, "lease renewal failed, another worker likely owns this row");
                                lease_lost.cancel();
                                break;
                            }
                        }
                    }
                }
            }
        });

        // Graceful shutdown (spec §4.5): finish if under half the lease
        // duration has elapsed since claiming, otherwise abort and hand the
        // row back immediately instead of riding out the full pipeline.
        let half_lease = Duration::from_secs((self.config.lease_seconds / 2).max(1) as u64);
        let abort_on_shutdown = async {
            shutdown.cancelled().await;
            let elapsed = claim_start.elapsed();
            if elapsed < half_lease {
                tokio::time::sleep(half_lease - elapsed).await;
            }
        };

        enum Outcome {
            Ran(ordinaut_core::pipeline::PipelineResult),
            LeaseLost,
            ShutdownDeadline,
        }

        let outcome = tokio::select! {
            result = ordinaut_core::pipeline::run(&pipeline, Arc::clone(&self.invoker), Utc::now()) => Outcome::Ran(result),
            _ = lease_lost.cancelled() => Outcome::LeaseLost,
            _ = abort_on_shutdown => Outcome::ShutdownDeadline,
        };

        renewal_shutdown.cancel();
        let _ = renewal_handle.await;

        let result = match outcome {
            Outcome::Ran(result) if !lease_lost.is_cancelled() => result,
            Outcome::Ran(_) | Outcome::LeaseLost => {
                warn!(task_id = %task.id, due_work_id = due_work.id, "lease lost mid-run, discarding result");
                Self::release_concurrency_guard(concurrency_guard).await;
                return;
            }
            Outcome::ShutdownDeadline => {
                info!(task_id = %task.id, due_work_id = due_work.id, "shutdown deadline reached mid-run, aborting and releasing lease");
                if let Err(e) = self.store.release_lease(due_work.id, &self.config.worker_id).await {
                    error!(task_id = %task.id, error = %e, "failed to release lease on shutdown abort");
                }
                Self::release_concurrency_guard(concurrency_guard).await;
                return;
            }
        };

        if result.success {
            if let Err(e) = self
                .store
                .complete_due_work_success(due_work.id, run_id, result.ctx)
                .await
            {
                error!(task_id = %task.id, error = %e, "failed to commit successful run");
            }
            let _ = self.store.record_processed(&self.config.worker_id).await;
            Self::release_concurrency_guard(concurrency_guard).await;
            return;
        }

        let class = result.error.as_ref().map(|e| e.class()).unwrap_or(ErrorClass::Permanent);
        let error_message = result
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown pipeline failure".to_string());

        let attempt = due_work.attempt;
        if class == ErrorClass::Retryable && (attempt as i32) < task.max_retries + 1 {
            let delay = task.backoff.delay_seconds(attempt as u32);
            let next_run_at = Utc::now() + chrono::Duration::milliseconds((delay * 1000.0) as i64);
            if let Err(e) = self
                .store
                .retry_due_work(due_work.id, run_id, &error_message, next_run_at)
                .await
            {
                error!(task_id = %task.id, error = %e, "failed to schedule retry");
            }
        } else if let Err(e) = self
            .store
            .complete_due_work_failure(due_work.id, run_id, &error_message)
            .await
        {
            error!(task_id = %task.id, error = %e, "failed to commit terminal failure");
        }

        Self::release_concurrency_guard(concurrency_guard).await;
    }

    async fn release_concurrency_guard(guard: Option<ordinaut_store::ConcurrencyGuard>) {
        if let Some(guard) = guard {
            if let Err(e) = guard.release().await {
                warn!(error = %e, "failed to release concurrency lock");
            }
        }
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

impl Service for Worker {
    fn name(&self) -> &'static str {
        "worker"
    }

    fn run(
        self: Box<Self>,
        shutdown: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            let heartbeat_shutdown = shutdown.clone();
            let heartbeat_store = Arc::clone(&self.store);
            let worker_id = self.config.worker_id.clone();
            let heartbeat_interval = self.config.heartbeat_interval;
            let heartbeat_handle = tokio::spawn(async move {
                Worker::run_heartbeat_loop(heartbeat_store, worker_id, heartbeat_interval, heartbeat_shutdown).await;
            });

            info!(worker_id = %self.config.worker_id, "worker ready");

            loop {
                if shutdown.is_cancelled() {
                    break;
                }

                let claimed = match self
                    .store
                    .claim_due_work(&self.config.worker_id, self.config.lease_seconds, self.config.batch_size)
                    .await
                {
                    Ok(rows) => rows,
                    Err(e) => {
                        error!(error = %e, "claim failed, backing off");
                        tokio::time::sleep(self.config.poll_interval).await;
                        continue;
                    }
                };

                if claimed.is_empty() {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                    continue;
                }

                let futures = claimed.into_iter().map(|c| self.process_claim(c, shutdown.clone()));
                futures::future::join_all(futures).await;
            }

            heartbeat_shutdown_and_wait(heartbeat_handle).await;
            info!(worker_id = %self.config.worker_id, "worker stopped");
            Ok(())
        })
    }
}

async fn heartbeat_shutdown_and_wait(handle: tokio::task::JoinHandle<()>) {
    let _ = handle.await;
}
