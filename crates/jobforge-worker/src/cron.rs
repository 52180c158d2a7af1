//! Five-field Unix cron expressions.
//!
//! Fields are minute, hour, day-of-month, month and day-of-week, with `*`,
//! lists, ranges, steps and names. Day-of-week accepts 0-7 where both 0 and
//! 7 mean Sunday. Expressions are evaluated in UTC by the `cron` crate.
//!
//! Day matching follows Vixie cron. When both day-of-month and day-of-week
//! are restricted a day matches if either one does, so `0 0 1 * 1` fires on
//! the 1st and on every Monday. A day field starting with `*` counts as
//! unrestricted, and then both fields must match.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use jobforge_core::error::{AppError, ErrorKind};
use jobforge_core::result::AppResult;

const DAY_NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// A parsed cron expression.
#[derive(Clone)]
pub struct CronExpr {
    source: String,
    /// One schedule, or two when the day fields are OR-ed.
    schedules: Vec<cron::Schedule>,
}

impl CronExpr {
    /// Parse a five-field expression such as `"*/15 * * * *"`.
    pub fn parse(expr: &str) -> AppResult<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(AppError::validation(format!(
                "cron expression '{expr}' must have 5 fields, found {}",
                fields.len()
            )));
        }

        let (minute, hour, day_of_month, month) = (fields[0], fields[1], fields[2], fields[3]);
        let day_of_week = normalize_day_of_week(fields[4])
            .map_err(|reason| AppError::validation(format!("cron expression '{expr}': {reason}")))?;

        let build = |day_of_month: &str, day_of_week: &str| {
            let with_seconds = format!("0 {minute} {hour} {day_of_month} {month} {day_of_week}");
            cron::Schedule::from_str(&with_seconds).map_err(|e| {
                AppError::with_source(
                    ErrorKind::Validation,
                    format!("invalid cron expression '{expr}': {e}"),
                    e,
                )
            })
        };

        let schedules = if is_unrestricted(day_of_month) || is_unrestricted(fields[4]) {
            vec![build(day_of_month, &day_of_week)?]
        } else {
            vec![build(day_of_month, "*")?, build("*", &day_of_week)?]
        };

        Ok(Self {
            source: expr.trim().to_string(),
            schedules,
        })
    }

    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&after).next())
            .min()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpr").field(&self.source).finish()
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn is_unrestricted(day_field: &str) -> bool {
    day_field.starts_with('*') || day_field == "?"
}

/// Rewrite numeric day-of-week values as names, since the `cron` crate
/// numbers days from 1 (Sunday) where Unix cron numbers them from 0.
fn normalize_day_of_week(field: &str) -> Result<String, String> {
    let parts = field
        .split(',')
        .map(normalize_day_of_week_part)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join(","))
}

fn normalize_day_of_week_part(part: &str) -> Result<String, String> {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => (range, Some(step)),
        None => (part, None),
    };
    let with_step = |range: String| match step {
        Some(step) => format!("{range}/{step}"),
        None => range,
    };

    if range == "*" || range == "?" {
        return Ok(with_step(range.to_string()));
    }

    match range.split_once('-') {
        Some((start, end)) => {
            let start_day = day_number(start)?;
            let end_day = day_number(end)?;
            if end_day == Some(7) {
                let first = day_index(start, start_day)?;
                return match step {
                    None if first == 0 => Ok("*".to_string()),
                    None if first == 7 => Ok("SUN".to_string()),
                    None => Ok(format!("{}-SAT,SUN", DAY_NAMES[first])),
                    Some(step) => expand_to_sunday(first, step),
                };
            }
            match (start_day, end_day) {
                (Some(s), Some(e)) if s > e => {
                    Err(format!("day-of-week range '{part}' is reversed"))
                }
                _ => Ok(with_step(format!(
                    "{}-{}",
                    day_name(start, start_day),
                    day_name(end, end_day)
                ))),
            }
        }
        None => {
            let day = day_number(range)?;
            Ok(with_step(day_name(range, day)))
        }
    }
}

/// Spell out a stepped range ending in 7, e.g. `1-7/2` as `MON,WED,FRI,SUN`.
fn expand_to_sunday(first: usize, step: &str) -> Result<String, String> {
    let step: usize = step
        .parse()
        .ok()
        .filter(|step| *step > 0)
        .ok_or_else(|| format!("invalid day-of-week step '{step}'"))?;

    let mut days: Vec<&str> = Vec::new();
    for day in (first..=7).step_by(step) {
        if !days.contains(&DAY_NAMES[day]) {
            days.push(DAY_NAMES[day]);
        }
    }
    Ok(days.join(","))
}

/// Numeric value of a day token, or `None` for a name.
fn day_number(token: &str) -> Result<Option<u32>, String> {
    if token.chars().all(|c| c.is_ascii_digit()) && !token.is_empty() {
        let day: u32 = token
            .parse()
            .map_err(|_| format!("invalid day-of-week '{token}'"))?;
        if day > 7 {
            return Err(format!("day-of-week '{token}' is out of range 0-7"));
        }
        Ok(Some(day))
    } else {
        Ok(None)
    }
}

/// Position of a day token in the week, Sunday first.
fn day_index(token: &str, day: Option<u32>) -> Result<usize, String> {
    match day {
        Some(day) => Ok(day as usize),
        None => DAY_NAMES[..7]
            .iter()
            .position(|name| name.eq_ignore_ascii_case(token))
            .ok_or_else(|| format!("invalid day-of-week '{token}'")),
    }
}

fn day_name(token: &str, day: Option<u32>) -> String {
    match day {
        Some(day) => DAY_NAMES[day as usize].to_string(),
        None => token.to_ascii_uppercase(),
    }
}
