use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::ValidationError;

/// Task queue used for all periodic maintenance jobs
pub const MAINTENANCE_TASK_QUEUE: &str = "queue-maintenance";

/// Task type of finished task cleanup jobs
pub const RETENTION_TASK: &str = "retention";

/// Table holding queued tasks, targeted by retention statements
pub const TASKS_TABLE: &str = "tasks";

// ============================================================================
// Task Models
// ============================================================================

/// TaskStatus is the lifecycle state of a queued task
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Waiting,
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::Running => "running",
            TaskStatus::Finished => "finished",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(TaskStatus::Waiting),
            "running" => Ok(TaskStatus::Running),
            "finished" => Ok(TaskStatus::Finished),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "" => Err(ValidationError::MissingField("status".to_string())),
            _ => Err(ValidationError::UnknownStatus(s.to_string())),
        }
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

// ============================================================================
// Retention Models
// ============================================================================

/// RetentionPolicy describes which finished tasks a maintenance schedule removes.
///
/// An empty `queue_name` or `task_type` matches every queue or type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub queue_name: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub age: Duration,
}

impl RetentionPolicy {
    pub fn new(
        queue_name: impl Into<String>,
        task_type: impl Into<String>,
        status: TaskStatus,
        age: Duration,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            task_type: task_type.into(),
            status,
            age,
        }
    }

    /// Composite identity of the schedule enforcing this policy
    pub fn identity(&self) -> ScheduleIdentity {
        ScheduleIdentity {
            task_queue: MAINTENANCE_TASK_QUEUE.to_string(),
            task_type: RETENTION_TASK.to_string(),
            queue_name: self.queue_name.clone(),
            spec_task_type: self.task_type.clone(),
            status: self.status,
        }
    }
}

/// ScheduleIdentity is the semantic key of a retention schedule.
///
/// No single column carries it: `task_queue` and `task_type` are columns, the
/// rest are fields nested in the JSON task spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScheduleIdentity {
    pub task_queue: String,
    pub task_type: String,
    pub queue_name: String,
    pub spec_task_type: String,
    pub status: TaskStatus,
}

impl ScheduleIdentity {
    /// Check a stored row against this identity, comparing nested spec fields as text
    pub fn matches(&self, task_queue: &str, task_type: &str, task_spec: &serde_json::Value) -> bool {
        let field = |name: &str| task_spec.get(name).and_then(|v| v.as_str());

        task_queue == self.task_queue
            && task_type == self.task_type
            && field("queueName") == Some(self.queue_name.as_str())
            && field("taskType") == Some(self.spec_task_type.as_str())
            && field("status") == Some(self.status.as_str())
    }
}

// ============================================================================
// Schedule Models
// ============================================================================

/// TaskScheduleRequest is handed to the scheduler to create a recurring task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskScheduleRequest {
    pub queue: String,
    pub task_type: String,
    /// Serialized task spec, stored as-is
    pub spec: String,
    pub cron_schedule: String,
}

/// NewSchedule is a fully resolved schedule row ready for insertion
#[derive(Debug, Clone)]
pub struct NewSchedule {
    pub schedule_id: Uuid,
    pub task_queue: String,
    pub task_type: String,
    pub task_spec: String,
    pub cron_schedule: String,
    pub next_execution_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// ScheduleUpdate refreshes an existing schedule in place
#[derive(Debug, Clone)]
pub struct ScheduleUpdate {
    pub task_spec: String,
    /// `None` keeps the stored cron expression
    pub cron_schedule: Option<String>,
    /// Written to both `updated_at` and `next_execution_time`
    pub now: DateTime<Utc>,
}

/// ScheduleRecord is a persisted recurring task definition
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct ScheduleRecord {
    pub schedule_id: Uuid,
    pub task_queue: String,
    pub task_type: String,
    pub task_spec: serde_json::Value,
    pub cron_schedule: String,
    pub next_execution_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// AssertOutcome reports which branch a registration took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertOutcome {
    Created { schedule_id: Uuid },
    Updated { rows_affected: u64 },
}

impl AssertOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AssertOutcome::Created { .. } => "created",
            AssertOutcome::Updated { .. } => "updated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_status_round_trips_through_str() {
        for status in [
            TaskStatus::Waiting,
            TaskStatus::Running,
            TaskStatus::Finished,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_empty_status_is_missing() {
        let err = "".parse::<TaskStatus>().unwrap_err();
        assert!(matches!(err, ValidationError::MissingField(_)));
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let err = "done".parse::<TaskStatus>().unwrap_err();
        assert!(matches!(err, ValidationError::UnknownStatus(s) if s == "done"));
    }

    #[test]
    fn test_identity_matches_nested_fields() {
        let policy = RetentionPolicy::new("jobs", "export", TaskStatus::Finished, Duration::ZERO);
        let identity = policy.identity();
        let spec = json!({"queueName": "jobs", "taskType": "export", "status": "finished"});

        assert!(identity.matches(MAINTENANCE_TASK_QUEUE, RETENTION_TASK, &spec));
        assert!(!identity.matches("other", RETENTION_TASK, &spec));
        assert!(!identity.matches(MAINTENANCE_TASK_QUEUE, "other", &spec));
    }

    #[test]
    fn test_identity_distinguishes_wildcards() {
        let wildcard = RetentionPolicy::new("", "", TaskStatus::Failed, Duration::ZERO).identity();
        let scoped = json!({"queueName": "jobs", "taskType": "", "status": "failed"});
        let unscoped = json!({"queueName": "", "taskType": "", "status": "failed"});

        assert!(!wildcard.matches(MAINTENANCE_TASK_QUEUE, RETENTION_TASK, &scoped));
        assert!(wildcard.matches(MAINTENANCE_TASK_QUEUE, RETENTION_TASK, &unscoped));
    }

    #[test]
    fn test_identity_rejects_missing_fields() {
        let identity = RetentionPolicy::new("", "", TaskStatus::Failed, Duration::ZERO).identity();
        assert!(!identity.matches(MAINTENANCE_TASK_QUEUE, RETENTION_TASK, &json!({})));
    }
}
