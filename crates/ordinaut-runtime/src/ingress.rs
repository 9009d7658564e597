//! Event Ingress (spec §4.7). The wire transport for external event
//! notifications is explicitly out of scope (spec §1); this reads
//! newline-delimited JSON `{"topic": "...", "payload": {...}}` records from
//! any async byte stream — by default the process's stdin — and hands each
//! one to the store's idempotent `ingest_event`, which owns topic matching
//! and the `(task_id, event_id)` dedupe.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::{Context, Result};
use ordinaut_core::Value;
use ordinaut_store::DurableStore;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::service::Service;

#[derive(Debug, Deserialize)]
struct IncomingEvent {
    topic: String,
    #[serde(default)]
    payload: serde_json::Value,
}

pub struct EventIngress {
    store: Arc<dyn DurableStore>,
    source: Pin<Box<dyn AsyncBufRead + Send>>,
}

impl EventIngress {
    pub fn new(store: Arc<dyn DurableStore>, source: impl AsyncBufRead + Send + 'static) -> Self {
        Self {
            store,
            source: Box::pin(source),
        }
    }

    pub fn from_stdin(store: Arc<dyn DurableStore>) -> Self {
        Self::new(store, BufReader::new(tokio::io::stdin()))
    }

    async fn handle_line(store: &Arc<dyn DurableStore>, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let event: IncomingEvent = match serde_json::from_str(line) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, line, "ignoring malformed event record");
                return;
            }
        };
        match store
            .ingest_event(&event.topic, Value::from_json(event.payload))
            .await
        {
            Ok(event_id) => info!(topic = %event.topic, event_id, "event ingested"),
            Err(e) => warn!(topic = %event.topic, error = %e, "failed to ingest event"),
        }
    }
}

impl Service for EventIngress {
    fn name(&self) -> &'static str {
        "ingress"
    }

    fn run(
        self: Box<Self>,
        shutdown: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
        Box::pin(async move {
            let this = *self;
            let mut lines = this.source.lines();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    line = lines.next_line() => {
                        match line.context("reading event stream")? {
                            Some(line) => Self::handle_line(&this.store, &line).await,
                            None => break, // stream closed
                        }
                    }
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use ordinaut_store::{ClaimedWork, NewTask, QueueStats, TaskId, TaskRunId, TaskStatus};
    use std::sync::Mutex;
    use tokio::io::BufReader;

    #[derive(Default)]
    struct RecordingStore {
        ingested: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl DurableStore for RecordingStore {
        async fn create_agent(&self, _: &str, _: Vec<String>) -> ordinaut_store::Result<ordinaut_store::AgentId> {
            unimplemented!()
        }
        async fn create_task(&self, _: NewTask) -> ordinaut_store::Result<TaskId> {
            unimplemented!()
        }
        async fn get_task(&self, _: TaskId) -> ordinaut_store::Result<ordinaut_store::Task> {
            unimplemented!()
        }
        async fn list_active_tasks(&self) -> ordinaut_store::Result<Vec<ordinaut_store::Task>> {
            unimplemented!()
        }
        async fn set_task_status(&self, _: TaskId, _: TaskStatus) -> ordinaut_store::Result<()> {
            unimplemented!()
        }
        async fn delete_task(&self, _: TaskId) -> ordinaut_store::Result<()> {
            unimplemented!()
        }
        async fn enqueue_due_work(&self, _: TaskId, _: DateTime<Utc>) -> ordinaut_store::Result<()> {
            unimplemented!()
        }
        async fn cancel_unlocked_due_work(&self, _: TaskId) -> ordinaut_store::Result<()> {
            unimplemented!()
        }
        async fn has_scheduled_due_work(&self, _: TaskId) -> ordinaut_store::Result<bool> {
            unimplemented!()
        }
        async fn claim_due_work(&self, _: &str, _: i64, _: i64) -> ordinaut_store::Result<Vec<ClaimedWork>> {
            unimplemented!()
        }
        async fn extend_lease(&self, _: ordinaut_store::DueWorkId, _: &str, _: i64) -> ordinaut_store::Result<()> {
            unimplemented!()
        }
        async fn release_lease(&self, _: ordinaut_store::DueWorkId, _: &str) -> ordinaut_store::Result<()> {
            unimplemented!()
        }
        async fn complete_due_work_success(&self, _: ordinaut_store::DueWorkId, _: TaskRunId, _: Value) -> ordinaut_store::Result<()> {
            unimplemented!()
        }
        async fn complete_due_work_failure(&self, _: ordinaut_store::DueWorkId, _: TaskRunId, _: &str) -> ordinaut_store::Result<()> {
            unimplemented!()
        }
        async fn retry_due_work(&self, _: ordinaut_store::DueWorkId, _: TaskRunId, _: &str, _: DateTime<Utc>) -> ordinaut_store::Result<()> {
            unimplemented!()
        }
        async fn create_task_run(&self, _: TaskId, _: &str, _: i32) -> ordinaut_store::Result<TaskRunId> {
            unimplemented!()
        }
        async fn heartbeat(&self, _: &str, _: i32, _: &str) -> ordinaut_store::Result<()> {
            unimplemented!()
        }
        async fn record_processed(&self, _: &str) -> ordinaut_store::Result<()> {
            unimplemented!()
        }
        async fn reclaim_expired_leases(&self, _: i64, _: i64) -> ordinaut_store::Result<u64> {
            unimplemented!()
        }
        async fn prune_dead_heartbeats(&self, _: i64) -> ordinaut_store::Result<u64> {
            unimplemented!()
        }
        async fn queue_stats(&self) -> ordinaut_store::Result<QueueStats> {
            unimplemented!()
        }
        async fn ingest_event(&self, topic: &str, payload: Value) -> ordinaut_store::Result<i64> {
            self.ingested.lock().unwrap().push((topic.to_string(), payload));
            Ok(1)
        }
    }

    #[tokio::test]
    async fn malformed_line_is_skipped_without_stopping_the_stream() {
        let recording = Arc::new(RecordingStore::default());
        let input = "not json\n{\"topic\":\"alerts.high_cpu\",\"payload\":{\"host\":\"h1\"}}\n";
        let ingress = EventIngress::new(
            Arc::clone(&recording) as Arc<dyn DurableStore>,
            BufReader::new(input.as_bytes()),
        );
        let shutdown = CancellationToken::new();
        Box::new(ingress).run(shutdown).await.unwrap();

        let ingested = recording.ingested.lock().unwrap();
        assert_eq!(ingested.len(), 1);
        assert_eq!(ingested[0].0, "alerts.high_cpu");
    }
}
