//! Five-field cron expressions.
//!
//! Fields are `minute hour day-of-month month day-of-week`, each accepting
//! `*`, numbers, names (`jan`, `mon`), lists, ranges and `/step`. When both
//! day fields are restricted a day matches if either does, as in Vixie cron.

use crate::errors::CronError;
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

// Searching further than this means the expression can never fire (e.g. `0 0 30 2 *`).
const SEARCH_LIMIT_DAYS: i64 = 366 * 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    restricted: bool,
}

impl Field {
    fn contains(self, value: u32) -> bool {
        value < 64 && self.bits & (1 << value) != 0
    }
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    // Value of names[0].
    name_base: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[], name_base: 0 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[], name_base: 0 };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[], name_base: 0 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12, names: &MONTH_NAMES, name_base: 1 };
// 7 is accepted as Sunday and folded to 0 after parsing.
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7, names: &DAY_NAMES, name_base: 0 };

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronExpression {
    /// Parses an expression or one of the `@hourly`, `@daily`, `@weekly`,
    /// `@monthly`, `@yearly` macros.
    ///
    /// # Errors
    ///
    /// Returns [`CronError`] describing the first invalid field.
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let trimmed = expression.trim();
        let expanded = match trimmed.to_ascii_lowercase().as_str() {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            "@yearly" | "@annually" => "0 0 1 1 *",
            other if other.starts_with('@') => {
                return Err(CronError::new(expression, format!("unknown macro '{trimmed}'")))
            }
            _ => trimmed,
        };

        let parts: Vec<&str> = expanded.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(CronError::new(
                expression,
                format!("expected 5 fields, found {}", parts.len()),
            ));
        }

        let mut day_of_week = parse_field(expression, parts[4], &DAY_OF_WEEK)?;
        if day_of_week.contains(7) {
            day_of_week.bits = (day_of_week.bits & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: trimmed.to_string(),
            minute: parse_field(expression, parts[0], &MINUTE)?,
            hour: parse_field(expression, parts[1], &HOUR)?,
            day_of_month: parse_field(expression, parts[2], &DAY_OF_MONTH)?,
            month: parse_field(expression, parts[3], &MONTH)?,
            day_of_week,
        })
    }

    /// Returns the expression as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if the expression fires at `time` (seconds are ignored).
    #[must_use]
    pub fn matches(&self, time: DateTime<Utc>) -> bool {
        self.month.contains(time.month())
            && self.day_matches(time)
            && self.hour.contains(time.hour())
            && self.minute.contains(time.minute())
    }

    /// Returns the first firing time strictly after `after`, or `None` if the
    /// expression never fires within five years.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let limit = after + Duration::days(SEARCH_LIMIT_DAYS);
        let mut t = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);

        while t <= limit {
            if !self.month.contains(t.month()) {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
                continue;
            }
            if !self.day_matches(t) {
                let next_day = t.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?;
                t = Utc.from_utc_datetime(&next_day);
                continue;
            }
            if !self.hour.contains(t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minute.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }

    fn day_matches(&self, time: DateTime<Utc>) -> bool {
        let dom = self.day_of_month.contains(time.day());
        let dow = self.day_of_week.contains(time.weekday().num_days_from_sunday());
        if self.day_of_month.restricted && self.day_of_week.restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_field(expression: &str, raw: &str, spec: &FieldSpec) -> Result<Field, CronError> {
    let err = |reason: String| CronError::new(expression, format!("{} field: {reason}", spec.name));
    let mut bits = 0u64;

    for item in raw.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| err(format!("invalid step '{step}'")))?;
                if step == 0 {
                    return Err(err("step must be positive".to_string()));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (parse_value(lo, spec).map_err(&err)?, parse_value(hi, spec).map_err(&err)?)
        } else {
            let value = parse_value(range, spec).map_err(&err)?;
            // `5/15` means every 15 starting at 5.
            (value, if step.is_some() { spec.max } else { value })
        };

        if start > end {
            return Err(err(format!("range {start}-{end} is reversed")));
        }

        let step = usize::try_from(step.unwrap_or(1)).unwrap_or(1);
        for value in (start..=end).step_by(step) {
            bits |= 1 << value;
        }
    }

    Ok(Field {
        bits,
        restricted: !raw.starts_with('*'),
    })
}

fn parse_value(raw: &str, spec: &FieldSpec) -> Result<u32, String> {
    let lower = raw.to_ascii_lowercase();
    let value = match spec.names.iter().position(|n| *n == lower) {
        Some(index) => u32::try_from(index).map_err(|e| e.to_string())? + spec.name_base,
        None => raw
            .parse::<u32>()
            .map_err(|_| format!("invalid value '{raw}'"))?,
    };
    if value < spec.min || value > spec.max {
        return Err(format!("{value} is outside {}..={}", spec.min, spec.max));
    }
    Ok(value)
}
