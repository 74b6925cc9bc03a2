//! Cron schedule parsing and next-run computation
//!
//! Standard five-field cron (`minute hour day-of-month month day-of-week`)
//! plus the `@hourly`-style descriptors, evaluated in UTC.
//!
//! Each field is a comma-separated list of `*`, `?`, `N`, `N-M` or any of
//! those followed by `/step`. `N/step` means `N-max/step`. Months and
//! weekdays also accept three-letter names, and weekday `7` is Sunday.
//!
//! When both day-of-month and day-of-week are restricted a day matches if
//! *either* matches (`0 0 1 * MON` fires on the 1st and on every Monday).

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use thiserror::Error;

/// How far ahead `next_after` searches before concluding a schedule never fires
const SEARCH_LIMIT_YEARS: i32 = 5;

const MONTH_NAMES: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Errors from parsing a cron expression
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// Nothing but whitespace
    #[error("empty schedule")]
    Empty,

    /// Not exactly five fields
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),

    /// `@` prefix with an unsupported name
    #[error("unrecognized descriptor: {0}")]
    UnknownDescriptor(String),

    /// A field that does not parse or is out of range
    #[error("invalid {field} field {value:?}: {reason}")]
    InvalidField {
        /// Which field
        field: &'static str,
        /// The offending text
        value: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Bounds and names of one cron field
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Offset of `names[0]`
    name_base: u32,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    name_base: 0,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    name_base: 0,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    name_base: 0,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: MONTH_NAMES,
    name_base: 1,
};
// 7 is accepted and folded onto Sunday after expansion
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: WEEKDAY_NAMES,
    name_base: 0,
};

/// One parsed field: the set of allowed values as a bitmask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet {
    bits: u64,
    /// `*` or `?` with no step (or step 1), i.e. the field does not narrow anything
    wildcard: bool,
}

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        self.bits & (1 << value) != 0
    }

    /// Smallest allowed value >= `from`
    fn next_from(&self, from: u32) -> Option<u32> {
        if from >= 64 {
            return None;
        }
        let remaining = self.bits >> from;
        if remaining == 0 {
            None
        } else {
            Some(from + remaining.trailing_zeros())
        }
    }
}

/// A parsed cron schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
}

impl CronSchedule {
    /// Parse a five-field expression or an `@` descriptor
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(ScheduleError::Empty);
        }

        let expr = match expr.strip_prefix('@') {
            Some(descriptor) => expand_descriptor(descriptor)?,
            None => expr,
        };

        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::FieldCount(fields.len()));
        }

        let mut days_of_week = parse_field(fields[4], &DAY_OF_WEEK)?;
        if days_of_week.contains(7) {
            days_of_week.bits = (days_of_week.bits & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes: parse_field(fields[0], &MINUTE)?,
            hours: parse_field(fields[1], &HOUR)?,
            days_of_month: parse_field(fields[2], &DAY_OF_MONTH)?,
            months: parse_field(fields[3], &MONTH)?,
            days_of_week,
        })
    }

    /// The first matching instant strictly after `after`, truncated to the minute.
    ///
    /// Returns `None` when nothing matches within five years, which happens
    /// only for impossible dates such as February 30th.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.naive_utc().with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit_year = start.year() + SEARCH_LIMIT_YEARS;

        let mut t = start;
        while t.year() <= limit_year {
            if !self.months.contains(t.month()) {
                t = first_of_next_month(t.date())?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            let Some(hour) = self.hours.next_from(t.hour()) else {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            };
            if hour != t.hour() {
                t = t.date().and_hms_opt(hour, 0, 0)?;
            }
            match self.minutes.next_from(t.minute()) {
                Some(minute) => return Some(t.with_minute(minute)?.and_utc()),
                None => t = next_hour(t)?,
            }
        }
        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        if self.days_of_month.wildcard || self.days_of_week.wildcard {
            dom && dow
        } else {
            dom || dow
        }
    }
}

impl std::str::FromStr for CronSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn expand_descriptor(descriptor: &str) -> Result<&'static str, ScheduleError> {
    match descriptor.to_ascii_lowercase().as_str() {
        "yearly" | "annually" => Ok("0 0 1 1 *"),
        "monthly" => Ok("0 0 1 * *"),
        "weekly" => Ok("0 0 * * 0"),
        "daily" | "midnight" => Ok("0 0 * * *"),
        "hourly" => Ok("0 * * * *"),
        _ => Err(ScheduleError::UnknownDescriptor(format!("@{}", descriptor))),
    }
}

fn parse_field(text: &str, spec: &FieldSpec) -> Result<FieldSet, ScheduleError> {
    let invalid = |reason: String| ScheduleError::InvalidField {
        field: spec.name,
        value: text.to_string(),
        reason,
    };

    let mut bits = 0u64;
    let mut wildcard = false;
    for part in text.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("bad step {:?}", step)))?;
                if step == 0 {
                    return Err(invalid("step must be positive".to_string()));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (low, high) = if range == "*" || range == "?" {
            (spec.min, spec.max)
        } else if let Some((low, high)) = range.split_once('-') {
            (
                parse_value(low, spec).map_err(&invalid)?,
                parse_value(high, spec).map_err(&invalid)?,
            )
        } else {
            let value = parse_value(range, spec).map_err(&invalid)?;
            match step {
                Some(_) => (value, spec.max),
                None => (value, value),
            }
        };

        if low > high {
            return Err(invalid(format!("range {}-{} is backwards", low, high)));
        }

        let step = step.unwrap_or(1);
        // `*/1` still counts as a wildcard for day matching
        wildcard |= (range == "*" || range == "?") && step == 1;
        bits |= (low..=high)
            .step_by(step as usize)
            .fold(0u64, |acc, v| acc | (1 << v));
    }

    Ok(FieldSet {
        bits,
        wildcard,
    })
}

fn parse_value(text: &str, spec: &FieldSpec) -> Result<u32, String> {
    if let Some(index) = spec
        .names
        .iter()
        .position(|name| name.eq_ignore_ascii_case(text))
    {
        return Ok(spec.name_base + index as u32);
    }
    let value: u32 = text
        .parse()
        .map_err(|_| format!("{:?} is not a number", text))?;
    if value < spec.min || value > spec.max {
        return Err(format!(
            "{} out of range {}-{}",
            value, spec.min, spec.max
        ));
    }
    Ok(value)
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

fn next_hour(t: NaiveDateTime) -> Option<NaiveDateTime> {
    if t.hour() == 23 {
        t.date().succ_opt()?.and_hms_opt(0, 0, 0)
    } else {
        t.date().and_hms_opt(t.hour() + 1, 0, 0)
    }
}
