//! Schedule triggers to timer specifications.
//!
//! Calendar schedules (`cron`, `daily`, `weekly`, `monthly`) become cron
//! expressions for the cron runtime; `interval` schedules run on a plain
//! tokio interval, independent of wall-clock alignment.
//!
//! Derived expressions use the 5-field form (`M H DoM Mon DoW`). The cron
//! runtime expects a leading seconds field, added by [`normalize_cron`].

use std::time::Duration;

use pawflow_types::flow::ScheduleSpec;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during scheduling operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Failed to create or manipulate a timer.
    #[error("scheduler error: {0}")]
    JobError(String),

    /// Invalid cron expression or schedule fields.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The cron runtime has not been started.
    #[error("scheduler not started")]
    NotStarted,

    #[error("repository error: {0}")]
    Repository(#[from] pawflow_types::error::RepositoryError),
}

// ---------------------------------------------------------------------------
// TimerSpec
// ---------------------------------------------------------------------------

/// A validated timer for one flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerSpec {
    /// 6-field cron expression (with seconds).
    Cron(String),
    /// Fixed period.
    Interval(Duration),
}

impl TimerSpec {
    /// Build and validate the timer for a schedule.
    pub fn from_schedule(spec: &ScheduleSpec) -> Result<Self, SchedulerError> {
        match spec {
            ScheduleSpec::Interval { minutes } => {
                if *minutes == 0 {
                    return Err(SchedulerError::InvalidSchedule(
                        "interval must be > 0 minutes".to_string(),
                    ));
                }
                Ok(TimerSpec::Interval(Duration::from_secs(u64::from(*minutes) * 60)))
            }
            other => {
                let expr = normalize_cron(&cron_expression_for(other)?)?;
                expr.parse::<croner::Cron>()
                    .map_err(|e| SchedulerError::InvalidSchedule(format!("'{expr}': {e}")))?;
                Ok(TimerSpec::Cron(expr))
            }
        }
    }
}

/// The 5-field cron expression for a calendar schedule.
///
/// - `daily 09:00` → `0 9 * * *`
/// - `weekly [1,3] 14:30` → `30 14 * * 1,3`
/// - `monthly 15 08:00` → `0 8 15 * *`
///
/// Raw `cron` expressions pass through trimmed. `interval` schedules have no
/// cron form.
pub fn cron_expression_for(spec: &ScheduleSpec) -> Result<String, SchedulerError> {
    match spec {
        ScheduleSpec::Cron { expression } => {
            let trimmed = expression.trim();
            if trimmed.is_empty() {
                return Err(SchedulerError::InvalidSchedule(
                    "empty cron expression".to_string(),
                ));
            }
            Ok(trimmed.to_string())
        }
        ScheduleSpec::Daily { time } => {
            let (hour, minute) = parse_time(time)?;
            Ok(format!("{minute} {hour} * * *"))
        }
        ScheduleSpec::Weekly { time, weekdays } => {
            let (hour, minute) = parse_time(time)?;
            if weekdays.is_empty() {
                return Err(SchedulerError::InvalidSchedule(
                    "weekly schedule needs at least one weekday".to_string(),
                ));
            }
            if let Some(bad) = weekdays.iter().find(|d| **d > 6) {
                return Err(SchedulerError::InvalidSchedule(format!(
                    "weekday {bad} out of range 0-6"
                )));
            }
            let mut days = weekdays.clone();
            days.sort_unstable();
            days.dedup();
            let days: Vec<String> = days.iter().map(u8::to_string).collect();
            Ok(format!("{minute} {hour} * * {}", days.join(",")))
        }
        ScheduleSpec::Monthly { time, day_of_month } => {
            let (hour, minute) = parse_time(time)?;
            if !(1..=31).contains(day_of_month) {
                return Err(SchedulerError::InvalidSchedule(format!(
                    "day of month {day_of_month} out of range 1-31"
                )));
            }
            Ok(format!("{minute} {hour} {day_of_month} * *"))
        }
        ScheduleSpec::Interval { .. } => Err(SchedulerError::InvalidSchedule(
            "interval schedules have no cron expression".to_string(),
        )),
    }
}

/// Prepend a seconds field to 5-field expressions; 6-field pass through.
pub fn normalize_cron(expr: &str) -> Result<String, SchedulerError> {
    let trimmed = expr.trim();
    match trimmed.split_whitespace().count() {
        5 => Ok(format!("0 {trimmed}")),
        6 => Ok(trimmed.to_string()),
        n => Err(SchedulerError::InvalidSchedule(format!(
            "'{trimmed}' has {n} fields, expected 5 or 6"
        ))),
    }
}

/// Parse `HH:MM` (24-hour).
fn parse_time(time: &str) -> Result<(u32, u32), SchedulerError> {
    let invalid = || SchedulerError::InvalidSchedule(format!("invalid time '{time}', expected HH:MM"));
    let (h, m) = time.trim().split_once(':').ok_or_else(invalid)?;
    let hour: u32 = h.trim().parse().map_err(|_| invalid())?;
    let minute: u32 = m.trim().parse().map_err(|_| invalid())?;
    if hour >= 24 || minute >= 60 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily() {
        let spec = ScheduleSpec::Daily { time: "09:00".into() };
        assert_eq!(cron_expression_for(&spec).unwrap(), "0 9 * * *");
    }

    #[test]
    fn test_weekly() {
        let spec = ScheduleSpec::Weekly {
            time: "14:30".into(),
            weekdays: vec![1, 3],
        };
        assert_eq!(cron_expression_for(&spec).unwrap(), "30 14 * * 1,3");
    }

    #[test]
    fn test_weekly_sorts_and_dedups_days() {
        let spec = ScheduleSpec::Weekly {
            time: "7:05".into(),
            weekdays: vec![5, 0, 5],
        };
        assert_eq!(cron_expression_for(&spec).unwrap(), "5 7 * * 0,5");
    }

    #[test]
    fn test_monthly() {
        let spec = ScheduleSpec::Monthly {
            time: "08:15".into(),
            day_of_month: 15,
        };
        assert_eq!(cron_expression_for(&spec).unwrap(), "15 8 15 * *");
    }

    #[test]
    fn test_invalid_calendar_fields() {
        for spec in [
            ScheduleSpec::Daily { time: "24:00".into() },
            ScheduleSpec::Daily { time: "9am".into() },
            ScheduleSpec::Weekly { time: "10:00".into(), weekdays: vec![] },
            ScheduleSpec::Weekly { time: "10:00".into(), weekdays: vec![7] },
            ScheduleSpec::Monthly { time: "10:00".into(), day_of_month: 0 },
            ScheduleSpec::Monthly { time: "10:00".into(), day_of_month: 32 },
            ScheduleSpec::Cron { expression: "  ".into() },
        ] {
            assert!(cron_expression_for(&spec).is_err(), "{spec:?} should be invalid");
        }
    }

    #[test]
    fn test_normalize_cron() {
        assert_eq!(normalize_cron("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize_cron("30 */5 * * * *").unwrap(), "30 */5 * * * *");
        assert!(normalize_cron("* * *").is_err());
    }

    #[test]
    fn test_timer_spec_from_schedule() {
        assert_eq!(
            TimerSpec::from_schedule(&ScheduleSpec::Daily { time: "09:00".into() }).unwrap(),
            TimerSpec::Cron("0 0 9 * * *".into())
        );
        assert_eq!(
            TimerSpec::from_schedule(&ScheduleSpec::Interval { minutes: 15 }).unwrap(),
            TimerSpec::Interval(Duration::from_secs(900))
        );
        assert!(TimerSpec::from_schedule(&ScheduleSpec::Interval { minutes: 0 }).is_err());
    }

    #[test]
    fn test_timer_spec_rejects_bad_cron() {
        let spec = ScheduleSpec::Cron {
            expression: "61 * * * *".into(),
        };
        assert!(matches!(
            TimerSpec::from_schedule(&spec),
            Err(SchedulerError::InvalidSchedule(_))
        ));
    }
}
