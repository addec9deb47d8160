// Retention task handler
//
// Runs the deletion statement embedded in a retention schedule's payload.
// Registration never calls this; the queue engine invokes it when the
// schedule fires.

use crate::db::DbPool;
use crate::errors::{HandlerError, StoreError};
use crate::spec::RetentionTaskSpec;
use crate::telemetry;
use tracing::{info, instrument};

/// Executes retention statements against the task table
#[derive(Debug, Clone)]
pub struct RetentionHandler {
    pool: DbPool,
}

impl RetentionHandler {
    pub const NAME: &'static str = "RetentionHandler";

    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Decode a stored retention payload and run its statement.
    ///
    /// Returns the number of deleted tasks.
    #[instrument(skip(self, task_spec), fields(handler = Self::NAME))]
    pub async fn process(&self, task_spec: &str) -> Result<u64, HandlerError> {
        let spec = RetentionTaskSpec::from_payload(task_spec)?;
        self.execute(&spec).await
    }

    /// Run the statement of an already decoded spec in its own transaction
    #[instrument(
        skip(self, spec),
        fields(queue_name = %spec.queue_name(), task_type = %spec.task_type(), status = %spec.status())
    )]
    pub async fn execute(&self, spec: &RetentionTaskSpec) -> Result<u64, HandlerError> {
        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;

        let result = sqlx::query(spec.sql())
            .execute(&mut *tx)
            .await
            .map_err(StoreError::from)?;

        tx.commit()
            .await
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;

        let deleted = result.rows_affected();
        telemetry::record_tasks_deleted(deleted);
        info!(deleted, "Retention statement executed");

        Ok(deleted)
    }
}
