//! CF time encodings and calendar normalization.
//!
//! Modeling centers store time as numeric offsets (`days since 1850-01-01`)
//! in one of several calendars. Everything date-dependent downstream works on
//! [`TimeAxis::Timestamps`], so other representations are converted through
//! [`TimeAxis::normalized`] first.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ClimError;

const SECONDS_PER_DAY: i64 = 86_400;

static UNITS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*([A-Za-z]+)\s+since\s+(-?\d+)-(\d{1,2})-(\d{1,2})(?:[ T](\d{1,2}):(\d{1,2})(?::(\d{1,2})(?:\.\d+)?)?)?\s*(?:Z|UTC|[+-]00(?::?00)?)?\s*$",
    )
    .expect("time units pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Calendar {
    /// Mixed Julian/Gregorian in CF; treated as proleptic Gregorian here.
    Standard,
    ProlepticGregorian,
    NoLeap,
    AllLeap,
    Day360,
    Julian,
}

impl Calendar {
    pub fn is_standard(self) -> bool {
        matches!(self, Calendar::Standard | Calendar::ProlepticGregorian)
    }

    pub fn is_leap(self, year: i64) -> bool {
        match self {
            Calendar::Standard | Calendar::ProlepticGregorian => {
                (year.rem_euclid(4) == 0 && year.rem_euclid(100) != 0) || year.rem_euclid(400) == 0
            }
            Calendar::Julian => year.rem_euclid(4) == 0,
            Calendar::AllLeap => true,
            Calendar::NoLeap | Calendar::Day360 => false,
        }
    }

    pub fn days_in_month(self, year: i64, month: u32) -> u32 {
        if self == Calendar::Day360 {
            return 30;
        }
        match month {
            1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
            4 | 6 | 9 | 11 => 30,
            _ => {
                if self.is_leap(year) {
                    29
                } else {
                    28
                }
            }
        }
    }

    fn days_before_year(self, year: i64) -> i64 {
        // leap years counted over [0, year)
        let div4 = (year + 3).div_euclid(4);
        match self {
            Calendar::NoLeap => 365 * year,
            Calendar::AllLeap => 366 * year,
            Calendar::Day360 => 360 * year,
            Calendar::Julian => 365 * year + div4,
            Calendar::Standard | Calendar::ProlepticGregorian => {
                365 * year + div4 - (year + 99).div_euclid(100) + (year + 399).div_euclid(400)
            }
        }
    }

    /// Days elapsed since 0000-01-01 in this calendar.
    pub fn day_number(self, year: i64, month: u32, day: u32) -> i64 {
        let months = (1..month)
            .map(|m| i64::from(self.days_in_month(year, m)))
            .sum::<i64>();
        self.days_before_year(year) + months + i64::from(day) - 1
    }

    pub fn from_day_number(self, number: i64) -> (i64, u32, u32) {
        let nominal = match self {
            Calendar::Day360 => 360,
            Calendar::NoLeap => 365,
            _ => 366,
        };
        let mut year = number.div_euclid(nominal);
        while self.days_before_year(year) > number {
            year -= 1;
        }
        while self.days_before_year(year + 1) <= number {
            year += 1;
        }
        let mut remaining = number - self.days_before_year(year);
        let mut month = 1;
        loop {
            let length = i64::from(self.days_in_month(year, month));
            if remaining < length || month == 12 {
                break;
            }
            remaining -= length;
            month += 1;
        }
        (year, month, remaining as u32 + 1)
    }
}

impl FromStr for Calendar {
    type Err = ClimError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" | "gregorian" => Ok(Calendar::Standard),
            "proleptic_gregorian" => Ok(Calendar::ProlepticGregorian),
            "noleap" | "365_day" => Ok(Calendar::NoLeap),
            "all_leap" | "366_day" => Ok(Calendar::AllLeap),
            "360_day" => Ok(Calendar::Day360),
            "julian" => Ok(Calendar::Julian),
            _ => Err(ClimError::UnsupportedCalendar(value.to_string())),
        }
    }
}

impl fmt::Display for Calendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Calendar::Standard => "standard",
            Calendar::ProlepticGregorian => "proleptic_gregorian",
            Calendar::NoLeap => "noleap",
            Calendar::AllLeap => "all_leap",
            Calendar::Day360 => "360_day",
            Calendar::Julian => "julian",
        };
        write!(f, "{name}")
    }
}

/// A date in some (possibly non-Gregorian) calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CalendarDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub time: NaiveTime,
}

impl CalendarDate {
    pub fn new(year: i32, month: u32, day: u32) -> Self {
        Self {
            year,
            month,
            day,
            time: NaiveTime::MIN,
        }
    }

    fn seconds_since_origin(&self, calendar: Calendar) -> i64 {
        calendar.day_number(i64::from(self.year), self.month, self.day) * SECONDS_PER_DAY
            + i64::from(self.time.num_seconds_from_midnight())
    }

    fn from_seconds(seconds: i64, calendar: Calendar) -> Result<Self, ClimError> {
        let (year, month, day) = calendar.from_day_number(seconds.div_euclid(SECONDS_PER_DAY));
        let year = i32::try_from(year)
            .map_err(|_| ClimError::TimeDecode(format!("year {year} out of range")))?;
        let second_of_day = seconds.rem_euclid(SECONDS_PER_DAY) as u32;
        let time = NaiveTime::from_num_seconds_from_midnight_opt(second_of_day, 0)
            .ok_or_else(|| ClimError::TimeDecode(format!("invalid time of day {second_of_day}")))?;
        Ok(Self {
            year,
            month,
            day,
            time,
        })
    }

    /// Field-by-field conversion to a Gregorian timestamp. Days that do not
    /// exist in the Gregorian month (30 February of a 360-day calendar, 29
    /// February of a Julian non-Gregorian leap year) clamp to the month end.
    pub fn to_timestamp(&self) -> Result<NaiveDateTime, ClimError> {
        let date = (1..=self.day)
            .rev()
            .take(4)
            .find_map(|day| NaiveDate::from_ymd_opt(self.year, self.month, day))
            .ok_or_else(|| {
                ClimError::TimeDecode(format!(
                    "{:04}-{:02}-{:02} has no Gregorian equivalent",
                    self.year, self.month, self.day
                ))
            })?;
        Ok(date.and_time(self.time))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl TimeUnit {
    fn seconds(self) -> f64 {
        match self {
            TimeUnit::Days => 86_400.0,
            TimeUnit::Hours => 3_600.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Seconds => 1.0,
        }
    }
}

/// Parsed CF `units` attribute, e.g. `days since 1850-01-01 00:00:00`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeUnits {
    pub unit: TimeUnit,
    pub reference: CalendarDate,
}

impl FromStr for TimeUnits {
    type Err = ClimError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ClimError::TimeDecode(format!("unrecognized time units: {value}"));
        let captures = UNITS_RE.captures(value).ok_or_else(invalid)?;
        let unit = match captures[1].to_ascii_lowercase().as_str() {
            "day" | "days" | "d" => TimeUnit::Days,
            "hour" | "hours" | "hr" | "h" => TimeUnit::Hours,
            "minute" | "minutes" | "min" => TimeUnit::Minutes,
            "second" | "seconds" | "sec" | "s" => TimeUnit::Seconds,
            _ => return Err(invalid()),
        };
        let field = |index: usize| -> Result<u32, ClimError> {
            captures
                .get(index)
                .map(|m| m.as_str().parse::<u32>().map_err(|_| invalid()))
                .unwrap_or(Ok(0))
        };
        let year = captures[2].parse::<i32>().map_err(|_| invalid())?;
        let time = NaiveTime::from_hms_opt(field(5)?, field(6)?, field(7)?).ok_or_else(invalid)?;
        Ok(Self {
            unit,
            reference: CalendarDate {
                year,
                month: field(3)?,
                day: field(4)?,
                time,
            },
        })
    }
}

/// Decodes one CF offset into a date of `calendar`.
pub fn decode_offset(
    offset: f64,
    units: &TimeUnits,
    calendar: Calendar,
) -> Result<CalendarDate, ClimError> {
    if !offset.is_finite() {
        return Err(ClimError::TimeDecode(format!("non-finite time value {offset}")));
    }
    let reference = &units.reference;
    if reference.month == 0
        || reference.month > 12
        || reference.day == 0
        || reference.day > calendar.days_in_month(i64::from(reference.year), reference.month)
    {
        return Err(ClimError::TimeDecode(format!(
            "reference date {:04}-{:02}-{:02} is not valid in the {calendar} calendar",
            reference.year, reference.month, reference.day
        )));
    }
    let out_of_range = || ClimError::TimeDecode(format!("time value {offset} is out of range"));
    let delta = (offset * units.unit.seconds()).round();
    if delta.abs() >= i64::MAX as f64 {
        return Err(out_of_range());
    }
    let seconds = reference
        .seconds_since_origin(calendar)
        .checked_add(delta as i64)
        .ok_or_else(out_of_range)?;
    CalendarDate::from_seconds(seconds, calendar)
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimeAxis {
    Timestamps(Vec<NaiveDateTime>),
    Dates {
        calendar: Calendar,
        dates: Vec<CalendarDate>,
    },
    Encoded {
        calendar: Calendar,
        units: TimeUnits,
        offsets: Vec<f64>,
    },
}

impl TimeAxis {
    pub fn len(&self) -> usize {
        match self {
            TimeAxis::Timestamps(values) => values.len(),
            TimeAxis::Dates { dates, .. } => dates.len(),
            TimeAxis::Encoded { offsets, .. } => offsets.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_standard(&self) -> bool {
        matches!(self, TimeAxis::Timestamps(_))
    }

    pub fn calendar(&self) -> Calendar {
        match self {
            TimeAxis::Timestamps(_) => Calendar::ProlepticGregorian,
            TimeAxis::Dates { calendar, .. } | TimeAxis::Encoded { calendar, .. } => *calendar,
        }
    }

    pub fn as_timestamps(&self) -> Option<&[NaiveDateTime]> {
        match self {
            TimeAxis::Timestamps(values) => Some(values),
            _ => None,
        }
    }

    pub fn to_timestamps(&self) -> Result<Vec<NaiveDateTime>, ClimError> {
        match self {
            TimeAxis::Timestamps(values) => Ok(values.clone()),
            TimeAxis::Dates { dates, .. } => dates.iter().map(CalendarDate::to_timestamp).collect(),
            TimeAxis::Encoded {
                calendar,
                units,
                offsets,
            } => offsets
                .iter()
                .map(|offset| decode_offset(*offset, units, *calendar)?.to_timestamp())
                .collect(),
        }
    }

    pub fn normalized(self) -> Result<TimeAxis, ClimError> {
        match self {
            TimeAxis::Timestamps(_) => Ok(self),
            other => Ok(TimeAxis::Timestamps(other.to_timestamps()?)),
        }
    }

    /// Calendar year of every step, read in the axis' own calendar.
    pub fn years(&self) -> Result<Vec<i32>, ClimError> {
        match self {
            TimeAxis::Timestamps(values) => Ok(values.iter().map(|value| value.year()).collect()),
            TimeAxis::Dates { dates, .. } => Ok(dates.iter().map(|date| date.year).collect()),
            TimeAxis::Encoded {
                calendar,
                units,
                offsets,
            } => offsets
                .iter()
                .map(|offset| decode_offset(*offset, units, *calendar).map(|date| date.year))
                .collect(),
        }
    }

    pub fn select(&self, indices: &[usize]) -> TimeAxis {
        match self {
            TimeAxis::Timestamps(values) => {
                TimeAxis::Timestamps(indices.iter().map(|&i| values[i]).collect())
            }
            TimeAxis::Dates { calendar, dates } => TimeAxis::Dates {
                calendar: *calendar,
                dates: indices.iter().map(|&i| dates[i]).collect(),
            },
            TimeAxis::Encoded {
                calendar,
                units,
                offsets,
            } => TimeAxis::Encoded {
                calendar: *calendar,
                units: *units,
                offsets: indices.iter().map(|&i| offsets[i]).collect(),
            },
        }
    }
}

/// Midnight timestamp helper used when building axes by hand.
pub fn timestamp(year: i32, month: u32, day: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, day).map(|date| date.and_time(NaiveTime::MIN))
}
