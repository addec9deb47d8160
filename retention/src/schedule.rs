// Cron expression helpers for maintenance schedules
//
// Schedules are stored with standard 5-field cron expressions
// ("minute hour day month weekday"). The cron crate expects a leading seconds
// field, so 5-field expressions are evaluated at second zero.

use crate::errors::ScheduleError;
use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use rand::Rng;
use std::str::FromStr;

/// Pick the minute of the hour a new retention schedule fires at.
///
/// Spreads maintenance load across the hour.
pub fn random_minute() -> u32 {
    rand::thread_rng().gen_range(0..60)
}

/// Cron expression firing every hour at a random minute
pub fn random_hourly_cron_expression() -> String {
    format!("{} * * * *", random_minute())
}

/// Parse and validate a cron expression with 5, 6 or 7 fields
pub fn parse_cron_expression(expression: &str) -> Result<CronSchedule, ScheduleError> {
    let normalized = match expression.split_whitespace().count() {
        5 => format!("0 {}", expression.trim()),
        _ => expression.trim().to_string(),
    };

    CronSchedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCronExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// First firing of `expression` strictly after `after`
pub fn next_execution_time(
    expression: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let schedule = parse_cron_expression(expression)?;

    schedule
        .after(&after)
        .next()
        .ok_or_else(|| ScheduleError::NoNextExecution(expression.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Timelike};

    #[test]
    fn test_random_minute_in_range() {
        for _ in 0..500 {
            assert!(random_minute() < 60);
        }
    }

    #[test]
    fn test_random_hourly_cron_expression_parses() {
        let expression = random_hourly_cron_expression();
        let minute: u32 = expression.split(' ').next().unwrap().parse().unwrap();
        assert!(minute < 60);
        assert!(expression.ends_with(" * * * *"));
        assert!(parse_cron_expression(&expression).is_ok());
    }

    #[test]
    fn test_parse_five_field_expression() {
        assert!(parse_cron_expression("17 * * * *").is_ok());
    }

    #[test]
    fn test_parse_seconds_expression() {
        assert!(parse_cron_expression("0 0 12 * * * *").is_ok());
    }

    #[test]
    fn test_parse_invalid_cron_expression() {
        assert!(parse_cron_expression("invalid").is_err());
    }

    #[test]
    fn test_next_execution_within_the_hour() {
        let after = Utc.with_ymd_and_hms(2024, 5, 1, 10, 5, 0).unwrap();
        let next = next_execution_time("17 * * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 1, 10, 17, 0).unwrap());
    }

    #[test]
    fn test_next_execution_rolls_to_next_hour() {
        let after = Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap();
        let next = next_execution_time("17 * * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 1, 11, 17, 0).unwrap());
    }

    #[test]
    fn test_next_execution_is_within_an_hour_of_now() {
        let now = Utc::now();
        let expression = random_hourly_cron_expression();
        let next = next_execution_time(&expression, now).unwrap();

        assert!(next > now);
        assert!(next - now <= Duration::hours(1));
        assert_eq!(next.second(), 0);
    }
}
