//! Cron expressions with timezone-aware next-fire computation.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::SchedulerError;

/// Validate a cron expression.
///
/// Accepts the 6/7-field format (second minute hour day-of-month month
/// day-of-week [year]) and the classic 5-field format, which runs at
/// second zero.
///
/// Day-of-week numbers follow the format: classic 5-field expressions use
/// 0-7 with Sunday as 0 or 7, the 6/7-field format uses 1-7 with Sunday
/// as 1. Day names work in both.
///
/// # Example
///
/// ```
/// use backup_scheduler::validate_cron_expression;
///
/// assert!(validate_cron_expression("0 2 * * *").is_ok());    // 02:00 daily
/// assert!(validate_cron_expression("0 2 * * 0").is_ok());    // 02:00 Sundays
/// assert!(validate_cron_expression("0 30 4 * * *").is_ok()); // 04:30 daily
///
/// assert!(validate_cron_expression("invalid").is_err());
/// assert!(validate_cron_expression("").is_err());
/// ```
pub fn validate_cron_expression(expr: &str) -> Result<(), SchedulerError> {
    parse_expression(expr).map(|_| ())
}

fn parse_expression(expr: &str) -> Result<Schedule, SchedulerError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let normalized = match fields.as_slice() {
        [] => return Err(SchedulerError::InvalidCron("empty expression".to_string())),
        [minute, hour, day, month, weekday] => format!(
            "0 {} {} {} {} {}",
            minute,
            hour,
            day,
            month,
            classic_day_of_week(weekday)
                .map_err(|e| SchedulerError::InvalidCron(format!("'{}': {}", expr, e)))?
        ),
        _ => fields.join(" "),
    };
    Schedule::from_str(&normalized)
        .map_err(|e| SchedulerError::InvalidCron(format!("'{}': {}", expr, e)))
}

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Rewrite a classic day-of-week field (Sunday = 0 or 7) into the
/// `cron` crate's numbering (Sunday = 1).
fn classic_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| format!("invalid day-of-week step '{}'", step))?;
                if step == 0 {
                    return Err("day-of-week step must be >= 1".to_string());
                }
                (range, step)
            }
            None => (item, 1),
        };

        let (start, end) = if range == "*" {
            (0, 6)
        } else if let Some((start, end)) = range.split_once('-') {
            let start = classic_day(start)?;
            let end = match classic_day(end)? {
                // FRI-SUN
                0 if start > 0 => 7,
                end => end,
            };
            (start, end)
        } else {
            let day = classic_day(range)?;
            // "1/2" steps from Monday through Saturday
            (day, if item.contains('/') { 6 } else { day })
        };
        if start > end {
            return Err(format!("invalid day-of-week range '{}'", range));
        }

        for day in (start..=end).step_by(step) {
            days.insert(day % 7);
        }
    }

    Ok(days
        .iter()
        .map(|day| (day + 1).to_string())
        .collect::<Vec<_>>()
        .join(","))
}

/// Day number 0-7 (Sunday = 0 or 7) from a number or three-letter name.
fn classic_day(token: &str) -> Result<u32, String> {
    if let Ok(day) = token.parse::<u32>() {
        return if day <= 7 {
            Ok(day)
        } else {
            Err(format!("day-of-week {} out of range 0-7", day))
        };
    }
    DAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(token))
        .map(|day| day as u32)
        .ok_or_else(|| format!("invalid day-of-week '{}'", token))
}

/// Parse a timezone string into a `chrono_tz::Tz`.
pub fn parse_timezone(tz_str: &str) -> Result<Tz, SchedulerError> {
    tz_str
        .parse()
        .map_err(|_| SchedulerError::InvalidTimezone(tz_str.to_string()))
}

/// A parsed cron expression evaluated in a fixed timezone.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expr: String,
    schedule: Schedule,
    tz: Tz,
}

impl CronSchedule {
    pub fn parse(expr: &str, timezone: &str) -> Result<Self, SchedulerError> {
        let schedule = parse_expression(expr)?;
        let tz = parse_timezone(timezone)?;
        Ok(Self {
            expr: expr.split_whitespace().collect::<Vec<_>>().join(" "),
            schedule,
            tz,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// First occurrence strictly after `after`, or `None` if the
    /// expression never fires again.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&self.tz))
            .map(|fire| fire.with_timezone(&Utc))
            .find(|fire| *fire > after)
    }
}
