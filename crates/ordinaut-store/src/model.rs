//! Row models for the Durable Store (spec §3). Field order mirrors the
//! spec's table; derives follow the teacher's convention of `FromRow` +
//! `sqlx::Type` enums with snake_case DB-side names.

use chrono::{DateTime, Utc};
use ordinaut_core::{ScheduleKind, Value};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::id::{AgentId, TaskId, TaskRunId};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
}

/// Stored as a JSONB column; there is no dedicated Postgres composite type
/// for it, so (de)serialization goes through `serde_json` rather than
/// `sqlx::Type`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    pub base_seconds: f64,
    pub max_seconds: f64,
    pub jitter: bool,
}

impl Backoff {
    /// `delay = min(base * 2^(attempt-1), max)`, optionally scaled by a
    /// random factor in `[0.5, 1.0]` when `jitter` is set. `attempt` is
    /// 1-based (spec §4.5).
    pub fn delay_seconds(&self, attempt: u32) -> f64 {
        let exp = attempt.saturating_sub(1);
        let raw = self.base_seconds * 2f64.powi(exp as i32);
        let capped = raw.min(self.max_seconds);
        if self.jitter {
            capped * fastrand_range(0.5, 1.0)
        } else {
            capped
        }
    }
}

fn fastrand_range(lo: f64, hi: f64) -> f64 {
    lo + fastrand::f64() * (hi - lo)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: Option<String>,
    pub created_by: AgentId,
    pub schedule_kind: ScheduleKind,
    pub schedule_expr: String,
    pub timezone: String,
    pub payload: Value,
    pub status: TaskStatus,
    pub priority: i16,
    pub max_retries: i32,
    pub backoff: Backoff,
    pub concurrency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_active(&self) -> bool {
        self.status == TaskStatus::Active
    }
}

/// `DueWork.id` is a plain monotonic `BIGSERIAL`, not a typed UUID wrapper
/// — see `DESIGN.md` Open Question 1.
pub type DueWorkId = i64;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DueWork {
    pub id: DueWorkId,
    pub task_id: TaskId,
    pub run_at: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
}

impl DueWork {
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.run_at <= now && self.locked_until.map(|l| l < now).unwrap_or(true)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: TaskRunId,
    pub task_id: TaskId,
    pub lease_owner: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub success: Option<bool>,
    pub attempt: i32,
    pub output: Value,
    pub error: Option<String>,
}

impl TaskRun {
    pub fn is_terminal(&self) -> bool {
        self.finished_at.is_some()
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    pub last_seen: DateTime<Utc>,
    pub processed_count: i64,
    pub pid: i32,
    pub hostname: String,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditLog {
    pub at: DateTime<Utc>,
    pub actor_agent_id: Option<AgentId>,
    pub action: String,
    pub subject_id: Option<String>,
    pub details: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_work_claimable_when_unlocked_and_due() {
        let now = Utc::now();
        let row = DueWork {
            id: 1,
            task_id: TaskId::new(),
            run_at: now - chrono::Duration::seconds(1),
            locked_until: None,
            locked_by: None,
            attempt: 1,
            created_at: now,
        };
        assert!(row.is_claimable(now));
    }

    #[test]
    fn due_work_not_claimable_while_leased() {
        let now = Utc::now();
        let row = DueWork {
            id: 1,
            task_id: TaskId::new(),
            run_at: now - chrono::Duration::seconds(1),
            locked_until: Some(now + chrono::Duration::seconds(60)),
            locked_by: Some("worker-a".into()),
            attempt: 1,
            created_at: now,
        };
        assert!(!row.is_claimable(now));
    }

    #[test]
    fn backoff_without_jitter_is_exponential_capped() {
        let backoff = Backoff {
            base_seconds: 1.0,
            max_seconds: 100.0,
            jitter: false,
        };
        assert_eq!(backoff.delay_seconds(1), 1.0);
        assert_eq!(backoff.delay_seconds(2), 2.0);
        assert_eq!(backoff.delay_seconds(3), 4.0);
        assert_eq!(backoff.delay_seconds(10), 100.0);
    }

    #[test]
    fn backoff_with_jitter_stays_in_range() {
        let backoff = Backoff {
            base_seconds: 10.0,
            max_seconds: 100.0,
            jitter: true,
        };
        let delay = backoff.delay_seconds(2);
        assert!(delay >= 10.0 && delay <= 20.0);
    }
}
