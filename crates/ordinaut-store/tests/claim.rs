//! Integration tests against a real Postgres container, grounded on the
//! teacher's shared-container test harness — trimmed here to Postgres only
//! since nothing in this crate needs Redis/pgvector.

use std::sync::Arc;

use chrono::Utc;
use ordinaut_core::{ScheduleKind, Value};
use ordinaut_store::{Backoff, DurableStore, NewTask, PostgresStore, TaskStatus};
use sqlx::PgPool;
use testcontainers::core::WaitFor;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tokio::sync::OnceCell;

struct SharedInfra {
    db_url: String,
    _postgres: ContainerAsync<GenericImage>,
}

static SHARED_INFRA: OnceCell<SharedInfra> = OnceCell::const_new();

async fn infra() -> &'static SharedInfra {
    SHARED_INFRA
        .get_or_init(|| async {
            let postgres = GenericImage::new("postgres", "16")
                .with_wait_for(WaitFor::message_on_stderr(
                    "database system is ready to accept connections",
                ))
                .with_exposed_port(testcontainers::core::ContainerPort::Tcp(5432))
                .with_env_var("POSTGRES_PASSWORD", "postgres")
                .with_env_var("POSTGRES_USER", "postgres")
                .with_env_var("POSTGRES_DB", "postgres")
                .start()
                .await
                .expect("failed to start postgres container");

            let host = postgres.get_host().await.unwrap();
            let port = postgres.get_host_port_ipv4(5432).await.unwrap();
            let db_url = format!("postgresql://postgres:postgres@{host}:{port}/postgres");

            let pool = PgPool::connect(&db_url).await.expect("connect for migrations");
            ordinaut_store::migrate(&pool).await.expect("run migrations");

            SharedInfra {
                db_url,
                _postgres: postgres,
            }
        })
        .await
}

async fn store() -> PostgresStore {
    let infra = infra().await;
    let pool = PgPool::connect(&infra.db_url).await.expect("connect");
    PostgresStore::new(pool)
}

fn default_backoff() -> Backoff {
    Backoff {
        base_seconds: 1.0,
        max_seconds: 60.0,
        jitter: false,
    }
}

async fn make_task(store: &PostgresStore) -> ordinaut_store::TaskId {
    let agent = store
        .create_agent("test-agent", vec!["tasks:write".to_string()])
        .await
        .unwrap();
    store
        .create_task(NewTask {
            title: "say hi".to_string(),
            description: None,
            created_by: agent,
            schedule_kind: ScheduleKind::Once,
            schedule_expr: "2030-01-01T00:00:00Z".to_string(),
            timezone: "UTC".to_string(),
            payload: Value::object(),
            priority: 5,
            max_retries: 3,
            backoff: default_backoff(),
            concurrency_key: None,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn idempotent_enqueue_yields_one_row() {
    let store = store().await;
    let task_id = make_task(&store).await;
    let run_at = Utc::now();

    store.enqueue_due_work(task_id, run_at).await.unwrap();
    store.enqueue_due_work(task_id, run_at).await.unwrap();

    let stats = store.queue_stats().await.unwrap();
    assert_eq!(stats.pending, 1);
}

#[tokio::test]
async fn claim_marks_row_leased_and_returns_it_once() {
    let store = store().await;
    let task_id = make_task(&store).await;
    store
        .enqueue_due_work(task_id, Utc::now() - chrono::Duration::seconds(1))
        .await
        .unwrap();

    let claimed = store.claim_due_work("worker-a", 60, 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].due_work.locked_by.as_deref(), Some("worker-a"));

    // A second claim attempt finds nothing else ready — no double hand-off.
    let second = store.claim_due_work("worker-b", 60, 10).await.unwrap();
    assert!(second.is_empty());
}

#[tokio::test]
async fn concurrent_claims_never_double_assign() {
    let store = Arc::new(store().await);
    let task_id = make_task(&store).await;
    for _ in 0..5 {
        store
            .enqueue_due_work(task_id, Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();
        // distinct run_at values to avoid the uniqueness constraint colliding
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let mut handles = Vec::new();
    for i in 0..3 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .claim_due_work(&format!("worker-{i}"), 60, 2)
                .await
                .unwrap()
        }));
    }

    let mut total_claimed = 0;
    let mut seen_ids = std::collections::HashSet::new();
    for handle in handles {
        let claimed = handle.await.unwrap();
        for c in &claimed {
            assert!(seen_ids.insert(c.due_work.id), "row claimed twice");
        }
        total_claimed += claimed.len();
    }
    assert!(total_claimed <= 5);
}

#[tokio::test]
async fn reclaim_expired_lease_makes_row_claimable_again() {
    let store = store().await;
    let task_id = make_task(&store).await;
    store
        .enqueue_due_work(task_id, Utc::now() - chrono::Duration::seconds(1))
        .await
        .unwrap();

    // Claim with a lease that's already "expired" relative to the grace
    // window we'll reclaim with.
    store.claim_due_work("worker-a", 0, 10).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let reclaimed = store.reclaim_expired_leases(0, 600).await.unwrap();
    assert_eq!(reclaimed, 1);

    let claimed = store.claim_due_work("worker-b", 60, 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].due_work.attempt, 2);
}

#[tokio::test]
async fn deleting_task_cascades_to_due_work() {
    let store = store().await;
    let task_id = make_task(&store).await;
    store.enqueue_due_work(task_id, Utc::now()).await.unwrap();

    store.delete_task(task_id).await.unwrap();

    let stats = store.queue_stats().await.unwrap();
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn event_ingress_matches_glob_topic_once_per_event() {
    let store = store().await;
    let agent = store
        .create_agent("ingress-agent", vec!["tasks:write".to_string()])
        .await
        .unwrap();
    let task_id = store
        .create_task(NewTask {
            title: "on alert".to_string(),
            description: None,
            created_by: agent,
            schedule_kind: ScheduleKind::Event,
            schedule_expr: "alerts.*".to_string(),
            timezone: "UTC".to_string(),
            payload: Value::object(),
            priority: 5,
            max_retries: 0,
            backoff: default_backoff(),
            concurrency_key: None,
        })
        .await
        .unwrap();

    store
        .ingest_event("alerts.high_cpu", Value::object())
        .await
        .unwrap();

    let stats = store.queue_stats().await.unwrap();
    assert_eq!(stats.pending, 1);

    assert!(store.has_scheduled_due_work(task_id).await.unwrap());
}

#[tokio::test]
async fn pausing_task_is_reflected_in_status() {
    let store = store().await;
    let task_id = make_task(&store).await;
    store.set_task_status(task_id, TaskStatus::Paused).await.unwrap();
    let task = store.get_task(task_id).await.unwrap();
    assert!(!task.is_active());
}
