// In-memory schedule store
//
// Mirrors the PostgreSQL locking protocol. A transaction must take the
// collection lock before writing. Writes are recorded in the transaction and
// replayed onto the committed rows at commit, so they only become visible
// then. Dropping a transaction discards its writes and releases the lock.

use super::{ScheduleStore, ScheduleTransaction};
use crate::errors::StoreError;
use crate::models::{NewSchedule, ScheduleIdentity, ScheduleRecord, ScheduleUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Storage steps that can be forced to fail
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreFaults {
    pub begin: bool,
    pub lock: bool,
    pub lookup: bool,
    pub insert: bool,
    pub update: bool,
    /// Updates succeed but report no row count
    pub row_count: bool,
    pub commit: bool,
}

/// Schedule store kept in process memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryScheduleStore {
    rows: Arc<Mutex<Vec<ScheduleRecord>>>,
    table_lock: Arc<Mutex<()>>,
    faults: StoreFaults,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose operations fail as described by `faults`
    pub fn with_faults(faults: StoreFaults) -> Self {
        Self {
            faults,
            ..Self::default()
        }
    }

    /// Same rows and lock, different fault settings
    pub fn sharing_with_faults(&self, faults: StoreFaults) -> Self {
        Self {
            rows: self.rows.clone(),
            table_lock: self.table_lock.clone(),
            faults,
        }
    }

    /// Snapshot of committed rows
    pub async fn records(&self) -> Vec<ScheduleRecord> {
        self.rows.lock().await.clone()
    }

    /// Committed rows matching an identity
    pub async fn records_matching(&self, identity: &ScheduleIdentity) -> Vec<ScheduleRecord> {
        self.rows
            .lock()
            .await
            .iter()
            .filter(|r| identity.matches(&r.task_queue, &r.task_type, &r.task_spec))
            .cloned()
            .collect()
    }

    /// Whether no transaction currently holds the collection lock
    pub fn is_unlocked(&self) -> bool {
        self.table_lock.try_lock().is_ok()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction, StoreError> {
        if self.faults.begin {
            return Err(StoreError::ConnectionFailed(
                "in-memory store unavailable".to_string(),
            ));
        }

        Ok(InMemoryTransaction {
            rows: self.rows.clone(),
            table_lock: self.table_lock.clone(),
            guard: None,
            view: None,
            writes: Vec::new(),
            faults: self.faults,
        })
    }
}

/// Transaction against an [`InMemoryScheduleStore`]
#[derive(Debug)]
pub struct InMemoryTransaction {
    rows: Arc<Mutex<Vec<ScheduleRecord>>>,
    table_lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    /// Committed rows plus this transaction's writes, for its own reads
    view: Option<Vec<ScheduleRecord>>,
    /// Writes replayed onto the committed rows at commit
    writes: Vec<StagedWrite>,
    faults: StoreFaults,
}

#[derive(Debug, Clone)]
enum StagedWrite {
    Insert(ScheduleRecord),
    Update {
        identity: ScheduleIdentity,
        task_spec: serde_json::Value,
        cron_schedule: Option<String>,
        now: DateTime<Utc>,
    },
}

impl StagedWrite {
    /// Apply to `rows`, returning the number of rows touched
    fn apply(&self, rows: &mut Vec<ScheduleRecord>) -> u64 {
        match self {
            StagedWrite::Insert(record) => {
                rows.push(record.clone());
                1
            }
            StagedWrite::Update {
                identity,
                task_spec,
                cron_schedule,
                now,
            } => {
                let mut affected = 0u64;
                for record in rows.iter_mut() {
                    if !identity.matches(&record.task_queue, &record.task_type, &record.task_spec) {
                        continue;
                    }
                    record.task_spec = task_spec.clone();
                    if let Some(cron) = cron_schedule {
                        record.cron_schedule = cron.clone();
                    }
                    record.updated_at = *now;
                    record.next_execution_time = *now;
                    affected += 1;
                }
                affected
            }
        }
    }
}

impl InMemoryTransaction {
    fn require_lock(&self, operation: &str) -> Result<(), StoreError> {
        if self.guard.is_none() {
            return Err(StoreError::LockNotHeld(format!(
                "{} requires the schedules lock",
                operation
            )));
        }
        Ok(())
    }

    async fn stage(&mut self, write: StagedWrite) -> u64 {
        if self.view.is_none() {
            let committed = self.rows.lock().await.clone();
            self.view = Some(committed);
        }
        let affected = write.apply(self.view.get_or_insert_with(Vec::new));
        self.writes.push(write);
        affected
    }
}

fn parse_task_spec(task_spec: &str) -> Result<serde_json::Value, StoreError> {
    serde_json::from_str(task_spec)
        .map_err(|e| StoreError::QueryFailed(format!("invalid json task spec: {}", e)))
}

#[async_trait]
impl ScheduleTransaction for InMemoryTransaction {
    #[instrument(skip(self))]
    async fn lock_schedules(&mut self) -> Result<(), StoreError> {
        if self.faults.lock {
            return Err(StoreError::QueryFailed("lock timeout".to_string()));
        }
        if self.guard.is_none() {
            self.guard = Some(self.table_lock.clone().lock_owned().await);
            debug!("Schedules lock acquired");
        }
        Ok(())
    }

    async fn find_schedule(
        &mut self,
        identity: &ScheduleIdentity,
    ) -> Result<Option<Uuid>, StoreError> {
        if self.faults.lookup {
            return Err(StoreError::QueryFailed("lookup failed".to_string()));
        }

        // Give concurrent registrants a chance to interleave here.
        tokio::task::yield_now().await;

        let found = match &self.view {
            Some(view) => find_in(view, identity),
            None => find_in(&self.rows.lock().await, identity),
        };
        Ok(found)
    }

    async fn insert_schedule(&mut self, schedule: NewSchedule) -> Result<Uuid, StoreError> {
        self.require_lock("insert")?;
        if self.faults.insert {
            return Err(StoreError::QueryFailed("insert failed".to_string()));
        }

        let record = ScheduleRecord {
            schedule_id: schedule.schedule_id,
            task_queue: schedule.task_queue,
            task_type: schedule.task_type,
            task_spec: parse_task_spec(&schedule.task_spec)?,
            cron_schedule: schedule.cron_schedule,
            next_execution_time: schedule.next_execution_time,
            created_at: schedule.created_at,
            updated_at: schedule.created_at,
        };

        let schedule_id = record.schedule_id;
        self.stage(StagedWrite::Insert(record)).await;
        Ok(schedule_id)
    }

    async fn update_schedule(
        &mut self,
        identity: &ScheduleIdentity,
        update: &ScheduleUpdate,
    ) -> Result<Option<u64>, StoreError> {
        self.require_lock("update")?;
        if self.faults.update {
            return Err(StoreError::QueryFailed("update failed".to_string()));
        }

        let affected = self
            .stage(StagedWrite::Update {
                identity: identity.clone(),
                task_spec: parse_task_spec(&update.task_spec)?,
                cron_schedule: update.cron_schedule.clone(),
                now: update.now,
            })
            .await;

        if self.faults.row_count {
            return Ok(None);
        }
        Ok(Some(affected))
    }

    async fn commit(self) -> Result<(), StoreError> {
        if self.faults.commit {
            return Err(StoreError::TransactionFailed("commit failed".to_string()));
        }
        let mut rows = self.rows.lock().await;
        for write in &self.writes {
            write.apply(&mut rows);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn find_in(rows: &[ScheduleRecord], identity: &ScheduleIdentity) -> Option<Uuid> {
    rows.iter()
        .find(|r| identity.matches(&r.task_queue, &r.task_type, &r.task_spec))
        .map(|r| r.schedule_id)
}
