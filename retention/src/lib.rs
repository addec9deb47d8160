// Retention schedules for the task queue: builds the cleanup statements for
// finished tasks and keeps exactly one maintenance schedule per policy.

pub mod config;
pub mod db;
pub mod errors;
pub mod handler;
pub mod models;
pub mod registrar;
pub mod schedule;
pub mod spec;
pub mod store;
pub mod telemetry;

pub use registrar::{assert_retention_schedule, assert_retention_schedule_within, RegistrarOptions};
