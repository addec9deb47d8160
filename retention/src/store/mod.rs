// Schedule store contracts
//
// The registrar only talks to storage through these traits so the same
// locking protocol runs against PostgreSQL and the in-memory store.

pub mod memory;
pub mod postgres;

use crate::errors::StoreError;
use crate::models::{NewSchedule, ScheduleIdentity, ScheduleUpdate, TaskScheduleRequest};
use crate::schedule::next_execution_time;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, instrument};
use uuid::Uuid;

pub use memory::{InMemoryScheduleStore, InMemoryTransaction, StoreFaults};
pub use postgres::{PgScheduleStore, PgScheduleTransaction};

/// Durable store holding schedule rows
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    type Transaction: ScheduleTransaction;

    /// Open an atomic transaction
    async fn begin(&self) -> Result<Self::Transaction, StoreError>;
}

/// Transaction over the schedule collection.
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait ScheduleTransaction: Send + Sized {
    /// Take the collection-wide exclusive lock, held until commit or rollback
    async fn lock_schedules(&mut self) -> Result<(), StoreError>;

    /// Find the schedule with the given composite identity
    async fn find_schedule(
        &mut self,
        identity: &ScheduleIdentity,
    ) -> Result<Option<Uuid>, StoreError>;

    /// Insert a new schedule row
    async fn insert_schedule(&mut self, schedule: NewSchedule) -> Result<Uuid, StoreError>;

    /// Update schedules matching the identity in place.
    ///
    /// Returns the affected row count, or `None` when the store cannot report it.
    async fn update_schedule(
        &mut self,
        identity: &ScheduleIdentity,
        update: &ScheduleUpdate,
    ) -> Result<Option<u64>, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Scheduler contract: creates a recurring task inside the caller's transaction
#[async_trait]
pub trait TaskScheduler<Tx: ScheduleTransaction>: Send + Sync {
    async fn schedule(&self, tx: &mut Tx, request: &TaskScheduleRequest)
        -> Result<Uuid, StoreError>;
}

/// Default scheduler: validates the cron expression and inserts the row with
/// its first execution time computed in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct CronTaskScheduler;

#[async_trait]
impl<Tx: ScheduleTransaction> TaskScheduler<Tx> for CronTaskScheduler {
    #[instrument(skip(self, tx, request), fields(queue = %request.queue, task_type = %request.task_type))]
    async fn schedule(
        &self,
        tx: &mut Tx,
        request: &TaskScheduleRequest,
    ) -> Result<Uuid, StoreError> {
        let now = Utc::now();
        let next = next_execution_time(&request.cron_schedule, now)?;

        let schedule = NewSchedule {
            schedule_id: Uuid::new_v4(),
            task_queue: request.queue.clone(),
            task_type: request.task_type.clone(),
            task_spec: request.spec.clone(),
            cron_schedule: request.cron_schedule.clone(),
            next_execution_time: next,
            created_at: now,
        };

        let schedule_id = tx.insert_schedule(schedule).await?;
        debug!(%schedule_id, next_execution_time = %next, "Schedule inserted");
        Ok(schedule_id)
    }
}
