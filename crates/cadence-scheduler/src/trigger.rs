use std::fmt;

use chrono::{DateTime, Datelike, Duration, LocalResult, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::cron::{CronFields, CronSchedule};
use crate::error::{Result, SchedulerError};

/// How many years past the reference instant a cron search may look before
/// the trigger is reported exhausted.
pub const CRON_SEARCH_HORIZON_YEARS: i32 = 5;

/// Defines when a job fires. Pure: evaluating a trigger never touches the
/// clock or any shared state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Fire exactly once at the given UTC instant.
    Date { run_at: DateTime<Utc> },

    /// Fire at `start + k * period` for k >= 0, until `end` (inclusive) if set.
    Interval {
        period_ms: i64,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    },

    /// Fire whenever local time in `timezone` satisfies every cron field.
    Cron {
        schedule: CronSchedule,
        timezone: Tz,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
}

impl Trigger {
    pub fn date(run_at: DateTime<Utc>) -> Self {
        Trigger::Date { run_at }
    }

    /// Build an interval trigger. Sub-second periods are allowed here even
    /// though [`IntervalConfig`] only speaks whole seconds.
    pub fn interval(
        period: std::time::Duration,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let period_ms = i64::try_from(period.as_millis())
            .map_err(|_| SchedulerError::InvalidTrigger("interval period too large".to_string()))?;
        if period_ms <= 0 {
            return Err(SchedulerError::InvalidTrigger(
                "interval period must be at least 1ms".to_string(),
            ));
        }
        if end.is_some_and(|e| e < start) {
            return Err(SchedulerError::InvalidTrigger(
                "interval end_date is before start_date".to_string(),
            ));
        }
        Ok(Trigger::Interval {
            period_ms,
            start,
            end,
        })
    }

    pub fn cron(
        fields: &CronFields<'_>,
        timezone: Tz,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if e < s {
                return Err(SchedulerError::InvalidTrigger(
                    "cron end_date is before start_date".to_string(),
                ));
            }
        }
        Ok(Trigger::Cron {
            schedule: CronSchedule::parse(fields)?,
            timezone,
            start,
            end,
        })
    }

    /// Next fire instant strictly after `after`.
    ///
    /// `Ok(None)` means the trigger is exhausted. `Err` is reserved for
    /// triggers whose arithmetic leaves the representable date range.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        match self {
            Trigger::Date { run_at } => Ok((*run_at > after).then_some(*run_at)),

            Trigger::Interval {
                period_ms,
                start,
                end,
            } => {
                if *period_ms <= 0 {
                    return Err(SchedulerError::InvalidTrigger(format!(
                        "non-positive interval period {period_ms}ms"
                    )));
                }
                let next = if after < *start {
                    *start
                } else {
                    let elapsed_ms = (after - *start).num_milliseconds();
                    let k = elapsed_ms / period_ms + 1;
                    k.checked_mul(*period_ms)
                        .and_then(Duration::try_milliseconds)
                        .and_then(|offset| start.checked_add_signed(offset))
                        .ok_or_else(|| overflow(self))?
                };
                Ok(match end {
                    Some(end) if next > *end => None,
                    _ => Some(next),
                })
            }

            Trigger::Cron {
                schedule,
                timezone,
                start,
                end,
            } => {
                let mut from = ceil_to_second(after + Duration::seconds(1));
                if let Some(start) = start {
                    from = from.max(ceil_to_second(*start));
                }
                let last_year = from.with_timezone(timezone).year() + CRON_SEARCH_HORIZON_YEARS;
                let mut local = from.with_timezone(timezone).naive_local();

                loop {
                    let Some(candidate) = schedule.next_local(local, last_year) else {
                        return Ok(None);
                    };
                    // Gaps (spring-forward) have no instant; folds take the earliest.
                    let resolved = match timezone.from_local_datetime(&candidate) {
                        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                            Some(dt.with_timezone(&Utc))
                        }
                        LocalResult::None => None,
                    };
                    match resolved {
                        Some(utc) if utc >= from => {
                            return Ok(match end {
                                Some(end) if utc > *end => None,
                                _ => Some(utc),
                            });
                        }
                        _ => local = candidate + Duration::seconds(1),
                    }
                }
            }
        }
    }
}

fn ceil_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
    let floor = DateTime::from_timestamp(t.timestamp(), 0).unwrap_or(t);
    if floor == t {
        t
    } else {
        floor + Duration::seconds(1)
    }
}

fn overflow(trigger: &Trigger) -> SchedulerError {
    SchedulerError::InvalidTrigger(format!("{trigger} overflowed the supported date range"))
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Date { run_at } => write!(f, "date[{}]", run_at.format("%Y-%m-%d %H:%M:%S UTC")),
            Trigger::Interval { period_ms, .. } => write!(f, "interval[{}]", format_period(*period_ms)),
            Trigger::Cron {
                schedule, timezone, ..
            } => write!(f, "cron[{schedule}, timezone='{timezone}']"),
        }
    }
}

/// `H:MM:SS`, prefixed with a day count when the period spans days.
fn format_period(period_ms: i64) -> String {
    let total_secs = period_ms / 1000;
    let ms = period_ms % 1000;
    let days = total_secs / 86_400;
    let rem = total_secs % 86_400;
    let mut out = format!("{}:{:02}:{:02}", rem / 3600, (rem % 3600) / 60, rem % 60);
    if ms != 0 {
        out.push_str(&format!(".{ms:03}"));
    }
    match days {
        0 => out,
        1 => format!("1 day, {out}"),
        d => format!("{d} days, {out}"),
    }
}

// ---------------------------------------------------------------------------
// Configuration-facing construction
// ---------------------------------------------------------------------------

/// Trigger definition as accepted from the management layer or config files:
/// `{ "type": "interval", "config": { "minutes": 5 } }`.
///
/// Each variant's config rejects keys it does not know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum TriggerConfig {
    Date(DateConfig),
    Interval(IntervalConfig),
    Cron(CronConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DateConfig {
    pub run_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntervalConfig {
    #[serde(default)]
    pub weeks: u64,
    #[serde(default)]
    pub days: u64,
    #[serde(default)]
    pub hours: u64,
    #[serde(default)]
    pub minutes: u64,
    #[serde(default)]
    pub seconds: u64,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// A cron field given either as a bare number or as an expression string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CronValue {
    Number(u32),
    Expr(String),
}

impl CronValue {
    fn to_expr(&self) -> String {
        match self {
            CronValue::Number(n) => n.to_string(),
            CronValue::Expr(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CronConfig {
    pub second: Option<CronValue>,
    pub minute: Option<CronValue>,
    pub hour: Option<CronValue>,
    pub day: Option<CronValue>,
    pub month: Option<CronValue>,
    pub day_of_week: Option<CronValue>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// IANA name; falls back to the scheduler's timezone.
    pub timezone: Option<String>,
}

impl TriggerConfig {
    /// Validate and build a [`Trigger`].
    ///
    /// `now` anchors interval triggers without an explicit `start_date`;
    /// `default_tz` applies to cron triggers without their own timezone.
    pub fn build(&self, now: DateTime<Utc>, default_tz: Tz) -> Result<Trigger> {
        match self {
            TriggerConfig::Date(c) => Ok(Trigger::date(c.run_date)),

            TriggerConfig::Interval(c) => {
                let total_secs = [
                    (c.weeks, 604_800u64),
                    (c.days, 86_400),
                    (c.hours, 3_600),
                    (c.minutes, 60),
                    (c.seconds, 1),
                ]
                .iter()
                .try_fold(0u64, |acc, (n, unit)| {
                    n.checked_mul(*unit).and_then(|v| acc.checked_add(v))
                })
                .ok_or_else(|| SchedulerError::InvalidTrigger("interval period too large".to_string()))?;
                if total_secs == 0 {
                    return Err(SchedulerError::InvalidTrigger(
                        "interval needs at least one of weeks/days/hours/minutes/seconds".to_string(),
                    ));
                }
                Trigger::interval(
                    std::time::Duration::from_secs(total_secs),
                    c.start_date.unwrap_or(now),
                    c.end_date,
                )
            }

            TriggerConfig::Cron(c) => {
                let timezone = match &c.timezone {
                    Some(name) => name.parse::<Tz>().map_err(|_| {
                        SchedulerError::InvalidTrigger(format!("unknown timezone '{name}'"))
                    })?,
                    None => default_tz,
                };
                let expr = |v: &Option<CronValue>, default: &str| {
                    v.as_ref().map(CronValue::to_expr).unwrap_or_else(|| default.to_string())
                };
                let (second, minute, hour) = (expr(&c.second, "0"), expr(&c.minute, "*"), expr(&c.hour, "*"));
                let (day, month, day_of_week) = (expr(&c.day, "*"), expr(&c.month, "*"), expr(&c.day_of_week, "*"));
                let fields = CronFields {
                    second: &second,
                    minute: &minute,
                    hour: &hour,
                    day: &day,
                    month: &month,
                    day_of_week: &day_of_week,
                };
                Trigger::cron(&fields, timezone, c.start_date, c.end_date)
            }
        }
    }
}
