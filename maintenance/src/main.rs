// Maintenance binary entry point: asserts the configured retention schedules

use retention::config::Settings;
use retention::db::DbPool;
use retention::store::{CronTaskScheduler, PgScheduleStore};
use retention::{assert_retention_schedule_within, telemetry, RegistrarOptions};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;

    info!("Starting queue retention maintenance");

    settings.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    let db_pool = DbPool::new(&settings.database).await.map_err(|e| {
        error!(error = %e, "Failed to initialize database pool");
        e
    })?;

    if settings.database.run_migrations {
        db_pool.migrate().await.map_err(|e| {
            error!(error = %e, "Failed to apply migrations");
            e
        })?;
    }

    let store = PgScheduleStore::new(db_pool.clone());
    let options = RegistrarOptions::from(&settings.retention);
    let timeout = settings.retention.registration_timeout();
    let policies = settings.policies()?;

    info!(
        policies = policies.len(),
        reassign_jitter_on_update = options.reassign_jitter_on_update,
        "Asserting retention schedules"
    );

    // Every policy is attempted; the first failure decides the exit status.
    let mut first_failure = None;
    for policy in &policies {
        match assert_retention_schedule_within(&store, &CronTaskScheduler, policy, &options, timeout)
            .await
        {
            Ok(outcome) => info!(
                queue_name = %policy.queue_name,
                task_type = %policy.task_type,
                status = %policy.status,
                outcome = outcome.label(),
                "Retention schedule asserted"
            ),
            Err(e) => {
                error!(
                    queue_name = %policy.queue_name,
                    task_type = %policy.task_type,
                    status = %policy.status,
                    error = %e,
                    "Failed to assert retention schedule"
                );
                first_failure.get_or_insert(e);
            }
        }
    }

    db_pool.close().await;
    telemetry::shutdown_tracer();

    match first_failure {
        Some(e) => Err(e.into()),
        None => {
            info!("Retention schedules are up to date");
            Ok(())
        }
    }
}
