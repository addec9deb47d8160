// PostgreSQL schedule store
//
// Uniqueness of a retention schedule spans columns and JSONB fields, which no
// table constraint expresses here, so writers serialize on an ACCESS EXCLUSIVE
// table lock for the length of their transaction.

use super::{ScheduleStore, ScheduleTransaction};
use crate::db::DbPool;
use crate::errors::StoreError;
use crate::models::{NewSchedule, ScheduleIdentity, ScheduleRecord, ScheduleUpdate};
use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

/// SQL used by the PostgreSQL schedule store
pub mod schedule_queries {
    pub const LOCK_SCHEDULES: &str = "LOCK TABLE schedules IN ACCESS EXCLUSIVE MODE";

    /// Composite identity predicate, parameters $1..$5
    pub const IDENTITY_PREDICATE: &str = r#"task_queue = $1
        AND task_type = $2
        AND task_spec->>'queueName' = $3
        AND task_spec->>'taskType' = $4
        AND task_spec->>'status' = $5"#;

    pub const SELECT_ALL_COLUMNS: &str = r#"schedule_id, task_queue, task_type, task_spec,
        cron_schedule, next_execution_time, created_at, updated_at"#;

    pub const INSERT_SCHEDULE: &str = r#"
        INSERT INTO schedules (
            schedule_id, task_queue, task_type, task_spec,
            cron_schedule, next_execution_time, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4::jsonb, $5, $6, $7, $7)
        "#;
}

use schedule_queries::*;

/// Schedule store backed by the `schedules` table
#[derive(Debug, Clone)]
pub struct PgScheduleStore {
    pool: DbPool,
}

impl PgScheduleStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Committed schedules matching an identity, oldest first
    #[instrument(skip(self))]
    pub async fn find_records(
        &self,
        identity: &ScheduleIdentity,
    ) -> Result<Vec<ScheduleRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM schedules WHERE {} ORDER BY created_at",
            SELECT_ALL_COLUMNS, IDENTITY_PREDICATE
        );

        let records = sqlx::query_as::<_, ScheduleRecord>(&sql)
            .bind(&identity.task_queue)
            .bind(&identity.task_type)
            .bind(&identity.queue_name)
            .bind(&identity.spec_task_type)
            .bind(identity.status.as_str())
            .fetch_all(self.pool.pool())
            .await?;

        Ok(records)
    }
}

#[async_trait]
impl ScheduleStore for PgScheduleStore {
    type Transaction = PgScheduleTransaction;

    async fn begin(&self) -> Result<PgScheduleTransaction, StoreError> {
        let tx = self.pool.pool().begin().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to begin transaction");
            StoreError::TransactionFailed(e.to_string())
        })?;
        Ok(PgScheduleTransaction { tx })
    }
}

/// Open PostgreSQL transaction; rolled back by sqlx when dropped
pub struct PgScheduleTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl ScheduleTransaction for PgScheduleTransaction {
    #[instrument(skip(self))]
    async fn lock_schedules(&mut self) -> Result<(), StoreError> {
        sqlx::query(LOCK_SCHEDULES).execute(&mut *self.tx).await?;
        debug!("Schedules table locked");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_schedule(
        &mut self,
        identity: &ScheduleIdentity,
    ) -> Result<Option<Uuid>, StoreError> {
        let sql = format!(
            "SELECT schedule_id FROM schedules WHERE {} LIMIT 1",
            IDENTITY_PREDICATE
        );

        let schedule_id = sqlx::query_scalar::<_, Uuid>(&sql)
            .bind(&identity.task_queue)
            .bind(&identity.task_type)
            .bind(&identity.queue_name)
            .bind(&identity.spec_task_type)
            .bind(identity.status.as_str())
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(schedule_id)
    }

    #[instrument(skip(self, schedule), fields(schedule_id = %schedule.schedule_id))]
    async fn insert_schedule(&mut self, schedule: NewSchedule) -> Result<Uuid, StoreError> {
        sqlx::query(INSERT_SCHEDULE)
            .bind(schedule.schedule_id)
            .bind(&schedule.task_queue)
            .bind(&schedule.task_type)
            .bind(&schedule.task_spec)
            .bind(&schedule.cron_schedule)
            .bind(schedule.next_execution_time)
            .bind(schedule.created_at)
            .execute(&mut *self.tx)
            .await?;

        Ok(schedule.schedule_id)
    }

    #[instrument(skip(self, update))]
    async fn update_schedule(
        &mut self,
        identity: &ScheduleIdentity,
        update: &ScheduleUpdate,
    ) -> Result<Option<u64>, StoreError> {
        let sql = format!(
            r#"UPDATE schedules
            SET updated_at = $6,
                task_spec = $7::jsonb,
                cron_schedule = COALESCE($8::text, cron_schedule),
                next_execution_time = $6
            WHERE {}"#,
            IDENTITY_PREDICATE
        );

        let result = sqlx::query(&sql)
            .bind(&identity.task_queue)
            .bind(&identity.task_type)
            .bind(&identity.queue_name)
            .bind(&identity.spec_task_type)
            .bind(identity.status.as_str())
            .bind(update.now)
            .bind(&update.task_spec)
            .bind(update.cron_schedule.as_deref())
            .execute(&mut *self.tx)
            .await?;

        Ok(Some(result.rows_affected()))
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))
    }
}
