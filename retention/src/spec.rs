// Retention task spec construction
//
// Builds the deletion statement a retention schedule runs and the descriptor
// used to find that schedule again. Everything here is pure.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ValidationError;
use crate::models::{RetentionPolicy, TaskStatus, TASKS_TABLE};

/// RetentionTaskSpec is the payload of a retention schedule: a SQL statement
/// removing finished tasks plus the filter values it was built from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetentionTaskSpec {
    sql: String,
    queue_name: String,
    task_type: String,
    status: TaskStatus,
    #[serde(with = "duration_nanos")]
    age: Duration,
}

impl RetentionTaskSpec {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn task_type(&self) -> &str {
        &self.task_type
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn age(&self) -> Duration {
        self.age
    }

    /// Serialize into the opaque payload stored on the schedule
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a stored payload
    pub fn from_payload(payload: &str) -> Result<Self, ValidationError> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Build the retention spec for a policy.
///
/// Clauses are appended in a fixed order (status, age, queue, type) so equal
/// inputs always produce identical statement text.
pub fn create_retention_spec(policy: &RetentionPolicy) -> RetentionTaskSpec {
    // Comparing the bare column keeps the finished_at index usable;
    // age(now(), finished_at) would not.
    let mut statement = DeleteStatement::new(TASKS_TABLE)
        .where_eq("status", policy.status.as_str())
        .where_expr(format!(
            "finished_at <= now() - interval '{} minutes'",
            interval_minutes(policy.age)
        ));

    if !policy.queue_name.is_empty() {
        statement = statement.where_eq("queue", &policy.queue_name);
    }

    if !policy.task_type.is_empty() {
        statement = statement.where_eq("type", &policy.task_type);
    }

    RetentionTaskSpec {
        sql: statement.to_sql(),
        queue_name: policy.queue_name.clone(),
        task_type: policy.task_type.clone(),
        status: policy.status,
        age: policy.age,
    }
}

/// Minutes rendered with six fractional digits, e.g. `2880.000000`
fn interval_minutes(age: Duration) -> String {
    format!("{:.6}", age.as_secs_f64() / 60.0)
}

/// Single-quoted SQL literal
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Minimal DELETE builder with literal values inlined
struct DeleteStatement {
    table: &'static str,
    predicates: Vec<String>,
}

impl DeleteStatement {
    fn new(table: &'static str) -> Self {
        Self {
            table,
            predicates: Vec::new(),
        }
    }

    fn where_eq(mut self, column: &str, value: &str) -> Self {
        self.predicates
            .push(format!("{} = {}", column, quote_literal(value)));
        self
    }

    fn where_expr(mut self, expr: String) -> Self {
        self.predicates.push(expr);
        self
    }

    fn to_sql(&self) -> String {
        if self.predicates.is_empty() {
            return format!("DELETE FROM {}", self.table);
        }
        format!(
            "DELETE FROM {} WHERE {}",
            self.table,
            self.predicates.join(" AND ")
        )
    }
}

/// Durations encoded as integer nanoseconds
mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hours(h: u64) -> Duration {
        Duration::from_secs(h * 3600)
    }

    #[test]
    fn test_full_statement_text() {
        let policy = RetentionPolicy::new("jobs", "export", TaskStatus::Finished, hours(48));
        let spec = create_retention_spec(&policy);

        assert_eq!(
            spec.sql(),
            "DELETE FROM tasks WHERE status = 'finished' \
             AND finished_at <= now() - interval '2880.000000 minutes' \
             AND queue = 'jobs' AND type = 'export'"
        );
    }

    #[test]
    fn test_wildcards_omit_filters() {
        let policy = RetentionPolicy::new("", "", TaskStatus::Failed, hours(1));
        let spec = create_retention_spec(&policy);

        assert_eq!(
            spec.sql(),
            "DELETE FROM tasks WHERE status = 'failed' \
             AND finished_at <= now() - interval '60.000000 minutes'"
        );
    }

    #[test]
    fn test_only_queue_filter() {
        let policy = RetentionPolicy::new("jobs", "", TaskStatus::Finished, hours(1));
        let sql = create_retention_spec(&policy).sql().to_string();

        assert!(sql.ends_with("AND queue = 'jobs'"));
        assert!(!sql.contains("type ="));
    }

    #[test]
    fn test_only_type_filter() {
        let policy = RetentionPolicy::new("", "export", TaskStatus::Finished, hours(1));
        let sql = create_retention_spec(&policy).sql().to_string();

        assert!(sql.ends_with("AND type = 'export'"));
        assert!(!sql.contains("queue ="));
    }

    #[test]
    fn test_fractional_minutes() {
        let policy =
            RetentionPolicy::new("", "", TaskStatus::Finished, Duration::from_secs(90));
        let sql = create_retention_spec(&policy).sql().to_string();
        assert!(sql.contains("interval '1.500000 minutes'"));
    }

    #[test]
    fn test_zero_age() {
        let policy = RetentionPolicy::new("", "", TaskStatus::Finished, Duration::ZERO);
        let sql = create_retention_spec(&policy).sql().to_string();
        assert!(sql.contains("interval '0.000000 minutes'"));
    }

    #[test]
    fn test_literals_are_escaped() {
        let policy = RetentionPolicy::new("o'brien", "", TaskStatus::Finished, hours(1));
        let sql = create_retention_spec(&policy).sql().to_string();
        assert!(sql.contains("queue = 'o''brien'"));
    }

    #[test]
    fn test_payload_field_names() {
        let policy = RetentionPolicy::new("jobs", "export", TaskStatus::Finished, hours(48));
        let payload = create_retention_spec(&policy).to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(value["queueName"], "jobs");
        assert_eq!(value["taskType"], "export");
        assert_eq!(value["status"], "finished");
        assert_eq!(value["age"], 172_800_000_000_000u64);
        assert!(value["sql"].as_str().unwrap().starts_with("DELETE FROM tasks"));
    }

    #[test]
    fn test_payload_decodes_back() {
        let policy = RetentionPolicy::new("jobs", "", TaskStatus::Cancelled, hours(2));
        let spec = create_retention_spec(&policy);
        let decoded = RetentionTaskSpec::from_payload(&spec.to_payload().unwrap()).unwrap();
        assert_eq!(decoded, spec);
    }

    #[test]
    fn test_from_payload_rejects_garbage() {
        assert!(RetentionTaskSpec::from_payload("{\"sql\": 1}").is_err());
    }
}
