// Error handling framework for retention scheduling

use thiserror::Error;

/// Schedule store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Store health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Lock not held: {0}")]
    LockNotHeld(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Schedule computation failed: {0}")]
    Schedule(#[from] ScheduleError),
}

/// Cron and schedule computation errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("No next execution time available for '{0}'")]
    NoNextExecution(String),
}

/// Validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Unknown task status: '{0}'")]
    UnknownStatus(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

/// Failures of a single retention schedule registration.
///
/// Every variant aborts the enclosing transaction. The wrapped source is the
/// first error encountered; rollback failures are only logged.
#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("Can not build retention task spec: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("Can not start transaction for scheduling: {0}")]
    Transaction(#[source] StoreError),

    #[error("Failed to lock schedules: {0}")]
    Lock(#[source] StoreError),

    #[error("Can not verify existing schedule: {0}")]
    Lookup(#[source] StoreError),

    #[error("Can not create retention schedule: {0}")]
    Create(#[source] StoreError),

    #[error("Can not update existing schedule: {0}")]
    Update(#[source] StoreError),

    #[error("Can not determine the number of rows affected: {0}")]
    RowCount(String),

    #[error("Schedule registration timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl RegistrationError {
    /// Short label used for metrics and structured logs
    pub fn reason(&self) -> &'static str {
        match self {
            RegistrationError::Serialization(_) => "serialization",
            RegistrationError::Transaction(_) => "transaction",
            RegistrationError::Lock(_) => "lock",
            RegistrationError::Lookup(_) => "lookup",
            RegistrationError::Create(_) => "create",
            RegistrationError::Update(_) => "update",
            RegistrationError::RowCount(_) => "row_count",
            RegistrationError::Timeout(_) => "timeout",
        }
    }
}

/// Retention handler errors
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Invalid retention task spec: {0}")]
    InvalidSpec(#[from] ValidationError),

    #[error("Retention statement failed: {0}")]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("Record not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::ConnectionFailed(err.to_string())
            }
            sqlx::Error::Database(db_err) => {
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => StoreError::DuplicateKey(db_err.message().to_string()),
                        _ => StoreError::QueryFailed(db_err.message().to_string()),
                    }
                } else {
                    StoreError::QueryFailed(db_err.message().to_string())
                }
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        ValidationError::InvalidJson(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_error_display() {
        let err = ScheduleError::InvalidCronExpression {
            expression: "* * * *".to_string(),
            reason: "invalid format".to_string(),
        };
        assert!(err.to_string().contains("Invalid cron expression"));
    }

    #[test]
    fn test_registration_error_wraps_context() {
        let err = RegistrationError::Lock(StoreError::QueryFailed("timeout".to_string()));
        let message = err.to_string();
        assert!(message.contains("Failed to lock schedules"));
        assert!(message.contains("timeout"));
        assert_eq!(err.reason(), "lock");
    }

    #[test]
    fn test_registration_error_exposes_source() {
        use std::error::Error as _;

        let err = RegistrationError::Update(StoreError::QueryFailed("boom".to_string()));
        assert!(err.source().is_some());

        let err = RegistrationError::RowCount("no rows".to_string());
        assert!(err.source().is_none());
    }

    #[test]
    fn test_schedule_error_is_kept_as_store_error_source() {
        use std::error::Error as _;

        let err: StoreError = ScheduleError::NoNextExecution("0 0 30 2 *".to_string()).into();
        assert!(matches!(err, StoreError::Schedule(ScheduleError::NoNextExecution(_))));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_handler_error_from_validation() {
        let err: HandlerError = ValidationError::InvalidJson("eof".to_string()).into();
        assert!(err.to_string().contains("Invalid retention task spec"));
    }
}
