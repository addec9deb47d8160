// Idempotent retention schedule registration
//
// A retention schedule has no natural key, only the composite identity
// (maintenance queue, retention type, queueName, taskType, status). Callers
// take the collection-wide lock before the existence check so two
// registrants can never both see "not found" and insert twice.

use crate::config::RetentionConfig;
use crate::errors::RegistrationError;
use crate::models::{
    AssertOutcome, RetentionPolicy, ScheduleUpdate, TaskScheduleRequest, MAINTENANCE_TASK_QUEUE,
    RETENTION_TASK,
};
use crate::schedule::random_hourly_cron_expression;
use crate::spec::create_retention_spec;
use crate::store::{ScheduleStore, ScheduleTransaction, TaskScheduler};
use crate::telemetry;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Behaviour switches for schedule registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrarOptions {
    /// Replace the stored cron minute when re-asserting an existing schedule
    pub reassign_jitter_on_update: bool,
}

impl Default for RegistrarOptions {
    fn default() -> Self {
        Self {
            reassign_jitter_on_update: true,
        }
    }
}

impl From<&RetentionConfig> for RegistrarOptions {
    fn from(config: &RetentionConfig) -> Self {
        Self {
            reassign_jitter_on_update: config.reassign_jitter_on_update,
        }
    }
}

/// Ensure exactly one retention schedule exists for `policy`.
///
/// Creates the schedule when missing, otherwise refreshes its spec, cron
/// expression and timestamps in place, with `next_execution_time` reset to
/// now. Any failure rolls the whole transaction back.
#[instrument(
    skip(store, scheduler, policy, options),
    fields(
        queue_name = %policy.queue_name,
        task_type = %policy.task_type,
        status = %policy.status,
    )
)]
pub async fn assert_retention_schedule<S, K>(
    store: &S,
    scheduler: &K,
    policy: &RetentionPolicy,
    options: &RegistrarOptions,
) -> Result<AssertOutcome, RegistrationError>
where
    S: ScheduleStore,
    K: TaskScheduler<S::Transaction>,
{
    let result = register(store, scheduler, policy, options).await;

    match &result {
        Ok(AssertOutcome::Created { schedule_id }) => {
            telemetry::record_schedule_created();
            info!(%schedule_id, outcome = "created", "Retention schedule created");
        }
        Ok(AssertOutcome::Updated { rows_affected }) => {
            telemetry::record_schedule_updated();
            info!(rows_affected, outcome = "updated", "Retention schedule updated");
        }
        Err(e) => {
            telemetry::record_schedule_failure(e.reason());
            warn!(error = %e, reason = e.reason(), "Retention schedule registration failed");
        }
    }

    result
}

/// [`assert_retention_schedule`] bounded by a deadline.
///
/// On timeout the in-flight transaction is dropped, which rolls it back and
/// releases the lock.
pub async fn assert_retention_schedule_within<S, K>(
    store: &S,
    scheduler: &K,
    policy: &RetentionPolicy,
    options: &RegistrarOptions,
    timeout: Duration,
) -> Result<AssertOutcome, RegistrationError>
where
    S: ScheduleStore,
    K: TaskScheduler<S::Transaction>,
{
    match tokio::time::timeout(
        timeout,
        assert_retention_schedule(store, scheduler, policy, options),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            telemetry::record_schedule_failure("timeout");
            warn!(
                queue_name = %policy.queue_name,
                task_type = %policy.task_type,
                status = %policy.status,
                timeout_ms = timeout.as_millis() as u64,
                "Retention schedule registration timed out"
            );
            Err(RegistrationError::Timeout(timeout))
        }
    }
}

async fn register<S, K>(
    store: &S,
    scheduler: &K,
    policy: &RetentionPolicy,
    options: &RegistrarOptions,
) -> Result<AssertOutcome, RegistrationError>
where
    S: ScheduleStore,
    K: TaskScheduler<S::Transaction>,
{
    let spec = create_retention_spec(policy);
    let payload = spec
        .to_payload()
        .map_err(RegistrationError::Serialization)?;

    let request = TaskScheduleRequest {
        queue: MAINTENANCE_TASK_QUEUE.to_string(),
        task_type: RETENTION_TASK.to_string(),
        spec: payload,
        cron_schedule: random_hourly_cron_expression(),
    };

    let mut tx = store.begin().await.map_err(RegistrationError::Transaction)?;

    match create_or_update(&mut tx, scheduler, policy, &request, options).await {
        Ok(outcome) => {
            tx.commit().await.map_err(RegistrationError::Transaction)?;
            Ok(outcome)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Failed to roll back schedule registration");
            }
            Err(e)
        }
    }
}

async fn create_or_update<Tx, K>(
    tx: &mut Tx,
    scheduler: &K,
    policy: &RetentionPolicy,
    request: &TaskScheduleRequest,
    options: &RegistrarOptions,
) -> Result<AssertOutcome, RegistrationError>
where
    Tx: ScheduleTransaction,
    K: TaskScheduler<Tx>,
{
    tx.lock_schedules().await.map_err(RegistrationError::Lock)?;

    let identity = policy.identity();
    let existing = tx
        .find_schedule(&identity)
        .await
        .map_err(RegistrationError::Lookup)?;

    let Some(schedule_id) = existing else {
        debug!(cron_schedule = %request.cron_schedule, "No existing schedule, creating");
        let schedule_id = scheduler
            .schedule(tx, request)
            .await
            .map_err(RegistrationError::Create)?;
        return Ok(AssertOutcome::Created { schedule_id });
    };

    debug!(%schedule_id, "Existing schedule found, updating");
    let update = ScheduleUpdate {
        task_spec: request.spec.clone(),
        cron_schedule: options
            .reassign_jitter_on_update
            .then(|| request.cron_schedule.clone()),
        now: Utc::now(),
    };

    let rows_affected = tx
        .update_schedule(&identity, &update)
        .await
        .map_err(RegistrationError::Update)?;

    match rows_affected {
        None => Err(RegistrationError::RowCount(
            "store did not report affected rows".to_string(),
        )),
        Some(0) => Err(RegistrationError::RowCount(format!(
            "schedule {} was found but no rows were updated",
            schedule_id
        ))),
        Some(rows_affected) => {
            if rows_affected > 1 {
                warn!(rows_affected, "Several schedules share one retention identity");
            }
            Ok(AssertOutcome::Updated { rows_affected })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StoreError;
    use crate::models::TaskStatus;
    use crate::store::{CronTaskScheduler, InMemoryScheduleStore, StoreFaults};

    fn policy() -> RetentionPolicy {
        RetentionPolicy::new(
            "jobs",
            "export",
            TaskStatus::Finished,
            Duration::from_secs(48 * 3600),
        )
    }

    #[test]
    fn test_options_default_reassigns_jitter() {
        assert!(RegistrarOptions::default().reassign_jitter_on_update);
    }

    #[test]
    fn test_options_from_config() {
        let config = RetentionConfig {
            reassign_jitter_on_update: false,
            ..RetentionConfig::default()
        };
        assert!(!RegistrarOptions::from(&config).reassign_jitter_on_update);
    }

    #[tokio::test]
    async fn test_create_then_update() {
        let store = InMemoryScheduleStore::new();
        let options = RegistrarOptions::default();

        let first = assert_retention_schedule(&store, &CronTaskScheduler, &policy(), &options)
            .await
            .unwrap();
        assert!(matches!(first, AssertOutcome::Created { .. }));

        let second = assert_retention_schedule(&store, &CronTaskScheduler, &policy(), &options)
            .await
            .unwrap();
        assert_eq!(second, AssertOutcome::Updated { rows_affected: 1 });
        assert_eq!(store.records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_row_count_unavailable_rolls_back() {
        let store = InMemoryScheduleStore::new();
        let options = RegistrarOptions::default();
        assert_retention_schedule(&store, &CronTaskScheduler, &policy(), &options)
            .await
            .unwrap();
        let before = store.records().await;

        let faulty = store.sharing_with_faults(StoreFaults {
            row_count: true,
            ..StoreFaults::default()
        });
        let err = assert_retention_schedule(&faulty, &CronTaskScheduler, &policy(), &options)
            .await
            .unwrap_err();

        assert!(matches!(err, RegistrationError::RowCount(_)));
        assert_eq!(store.records().await, before);
        assert!(store.is_unlocked());
    }

    #[tokio::test]
    async fn test_timeout_variant() {
        struct StallingScheduler;

        #[async_trait::async_trait]
        impl<Tx: ScheduleTransaction> TaskScheduler<Tx> for StallingScheduler {
            async fn schedule(
                &self,
                _tx: &mut Tx,
                _request: &TaskScheduleRequest,
            ) -> Result<uuid::Uuid, StoreError> {
                std::future::pending().await
            }
        }

        let store = InMemoryScheduleStore::new();
        let err = assert_retention_schedule_within(
            &store,
            &StallingScheduler,
            &policy(),
            &RegistrarOptions::default(),
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RegistrationError::Timeout(_)));
        assert_eq!(err.reason(), "timeout");
        assert!(store.records().await.is_empty());
        assert!(store.is_unlocked());
    }
}
