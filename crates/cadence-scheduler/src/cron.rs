//! Cron field parsing and calendar search.
//!
//! Six fields are supported, each matched against local wall-clock time:
//! ```text
//! second (0-59)  minute (0-59)  hour (0-23)
//! day (1-31)     month (1-12 | jan-dec)
//! day_of_week (0-6 | mon-sun, 0 = Monday)
//! ```
//! Each field accepts `*`, `N`, `A-B`, `*/S`, `A-B/S` and comma lists of those.
//! All fields must match for an instant to fire; restricting both `day` and
//! `day_of_week` therefore requires both to hold.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: &[&str] = &["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

/// One parsed cron field: the expression it came from plus the expanded value set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronField {
    pub expr: String,
    pub values: BTreeSet<u32>,
}

impl CronField {
    fn parse(name: &str, expr: &str, min: u32, max: u32, names: &[&str], name_base: u32) -> Result<Self> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(invalid(name, expr, "empty expression"));
        }

        let mut values = BTreeSet::new();
        for part in expr.split(',') {
            let part = part.trim();
            let (range_part, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step: u32 = step
                        .parse()
                        .map_err(|_| invalid(name, part, "step is not a number"))?;
                    if step == 0 {
                        return Err(invalid(name, part, "step must be positive"));
                    }
                    (range, step)
                }
                None => (part, 1),
            };

            let (start, end) = if range_part == "*" {
                (min, max)
            } else if let Some((a, b)) = range_part.split_once('-') {
                let a = parse_atom(name, a, names, name_base)?;
                let b = parse_atom(name, b, names, name_base)?;
                if a > b {
                    return Err(invalid(name, part, "range start is after range end"));
                }
                (a, b)
            } else {
                let v = parse_atom(name, range_part, names, name_base)?;
                // `N/S` means "from N to the field maximum every S".
                if step > 1 {
                    (v, max)
                } else {
                    (v, v)
                }
            };

            if start < min || end > max {
                return Err(invalid(
                    name,
                    part,
                    &format!("values must lie within {min}-{max}"),
                ));
            }

            values.extend((start..=end).step_by(step as usize));
        }

        Ok(Self {
            expr: expr.to_string(),
            values,
        })
    }

    pub fn matches(&self, value: u32) -> bool {
        self.values.contains(&value)
    }

    /// Smallest allowed value `>= value`.
    pub fn next(&self, value: u32) -> Option<u32> {
        self.values.range(value..).next().copied()
    }
}

fn parse_atom(field: &str, atom: &str, names: &[&str], name_base: u32) -> Result<u32> {
    let atom = atom.trim();
    if let Ok(v) = atom.parse::<u32>() {
        return Ok(v);
    }
    let lower = atom.to_ascii_lowercase();
    names
        .iter()
        .position(|n| *n == lower)
        .map(|i| i as u32 + name_base)
        .ok_or_else(|| invalid(field, atom, "not a number or known name"))
}

fn invalid(field: &str, expr: &str, reason: &str) -> SchedulerError {
    SchedulerError::InvalidTrigger(format!("cron field {field}='{expr}': {reason}"))
}

/// Raw field expressions, as accepted from configuration.
#[derive(Debug, Clone)]
pub struct CronFields<'a> {
    pub second: &'a str,
    pub minute: &'a str,
    pub hour: &'a str,
    pub day: &'a str,
    pub month: &'a str,
    pub day_of_week: &'a str,
}

impl Default for CronFields<'_> {
    fn default() -> Self {
        Self {
            second: "0",
            minute: "*",
            hour: "*",
            day: "*",
            month: "*",
            day_of_week: "*",
        }
    }
}

/// A fully parsed cron schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSchedule {
    pub second: CronField,
    pub minute: CronField,
    pub hour: CronField,
    pub day: CronField,
    pub month: CronField,
    pub day_of_week: CronField,
}

impl CronSchedule {
    pub fn parse(fields: &CronFields<'_>) -> Result<Self> {
        Ok(Self {
            second: CronField::parse("second", fields.second, 0, 59, &[], 0)?,
            minute: CronField::parse("minute", fields.minute, 0, 59, &[], 0)?,
            hour: CronField::parse("hour", fields.hour, 0, 23, &[], 0)?,
            day: CronField::parse("day", fields.day, 1, 31, &[], 0)?,
            month: CronField::parse("month", fields.month, 1, 12, MONTH_NAMES, 1)?,
            day_of_week: CronField::parse("day_of_week", fields.day_of_week, 0, 6, WEEKDAY_NAMES, 0)?,
        })
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        self.day.matches(date.day()) && self.day_of_week.matches(date.weekday().num_days_from_monday())
    }

    /// First local time `>= start` matching every field, or `None` once the
    /// search passes the end of `last_year`.
    ///
    /// Walks coarse-to-fine: a mismatching field jumps straight to the next
    /// candidate value and resets every finer field to its minimum.
    pub fn next_local(&self, start: NaiveDateTime, last_year: i32) -> Option<NaiveDateTime> {
        let mut t = start.with_nanosecond(0)?;
        loop {
            if t.year() > last_year {
                return None;
            }

            match self.month.next(t.month()) {
                Some(m) if m == t.month() => {}
                Some(m) => {
                    t = midnight(NaiveDate::from_ymd_opt(t.year(), m, 1)?)?;
                    continue;
                }
                None => {
                    t = midnight(NaiveDate::from_ymd_opt(t.year() + 1, 1, 1)?)?;
                    continue;
                }
            }

            if !self.day_matches(t.date()) {
                t = midnight(t.date().succ_opt()?)?;
                continue;
            }

            match self.hour.next(t.hour()) {
                Some(h) if h == t.hour() => {}
                Some(h) => {
                    t = t.date().and_hms_opt(h, 0, 0)?;
                    continue;
                }
                None => {
                    t = midnight(t.date().succ_opt()?)?;
                    continue;
                }
            }

            match self.minute.next(t.minute()) {
                Some(m) if m == t.minute() => {}
                Some(m) => {
                    t = t.date().and_hms_opt(t.hour(), m, 0)?;
                    continue;
                }
                None => {
                    t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                    continue;
                }
            }

            match self.second.next(t.second()) {
                Some(s) if s == t.second() => return Some(t),
                Some(s) => return t.date().and_hms_opt(t.hour(), t.minute(), s),
                None => {
                    t = t.date().and_hms_opt(t.hour(), t.minute(), 0)? + Duration::minutes(1);
                }
            }
        }
    }
}

fn midnight(date: NaiveDate) -> Option<NaiveDateTime> {
    date.and_hms_opt(0, 0, 0)
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            ("month", &self.month),
            ("day", &self.day),
            ("day_of_week", &self.day_of_week),
            ("hour", &self.hour),
            ("minute", &self.minute),
            ("second", &self.second),
        ];
        let parts: Vec<String> = fields
            .iter()
            .filter(|(name, field)| field.expr != "*" || *name == "second")
            .map(|(name, field)| format!("{name}='{}'", field.expr))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}
