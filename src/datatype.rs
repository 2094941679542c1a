// SPDX-License-Identifier: MIT
//
// Copyright 2025, sheetlayer contributors.

//! Cell values, field types and the date serial arithmetic shared by the
//! reader and the writer.

use std::fmt;

/// Days between the 1900 and the 1904 date systems.
///
/// https://learn.microsoft.com/en-us/office/troubleshoot/excel/1900-and-1904-date-system
const EXCEL_1900_1904_DIFF: f64 = 1462.;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Serial number of 1970-01-01 in the 1900 date system.
const UNIX_EPOCH_SERIAL: i64 = 25569;

/// The type of a field (column) of a sheet table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// 64-bit signed integer
    Integer,
    /// Floating point number
    Real,
    /// Boolean, stored in cells with `t="b"`
    Boolean,
    /// Text
    String,
    /// Calendar date without time of day
    Date,
    /// Date and time of day
    DateTime,
    /// Time of day
    Time,
}

impl FieldType {
    /// Combines the running type of a column with the type of a newly
    /// observed value.
    ///
    /// `String` absorbs everything, `Real` absorbs `Integer`, and `Boolean`
    /// widens to whichever numeric type it meets. Any other disagreement
    /// (temporal vs numeric, or two different temporal types) has no common
    /// representation and falls back to `String`.
    pub fn merge(self, other: FieldType) -> FieldType {
        use FieldType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (String, _) | (_, String) => String,
            (Integer, Real) | (Real, Integer) => Real,
            (Boolean, Integer) | (Integer, Boolean) => Integer,
            (Boolean, Real) | (Real, Boolean) => Real,
            _ => String,
        }
    }

    /// Is this one of `Date`, `DateTime` or `Time`
    pub fn is_temporal(self) -> bool {
        matches!(self, FieldType::Date | FieldType::DateTime | FieldType::Time)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldType::Integer => "Integer",
            FieldType::Real => "Real",
            FieldType::Boolean => "Boolean",
            FieldType::String => "String",
            FieldType::Date => "Date",
            FieldType::DateTime => "DateTime",
            FieldType::Time => "Time",
        };
        f.write_str(s)
    }
}

/// Merges an observed value type into a running column type that may not be
/// known yet.
pub(crate) fn merge_types(running: Option<FieldType>, observed: FieldType) -> FieldType {
    match running {
        None => observed,
        Some(t) => t.merge(observed),
    }
}

/// A value stored in a record
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Null / empty cell
    #[default]
    Empty,
    /// Signed integer
    Integer(i64),
    /// Float
    Real(f64),
    /// Boolean
    Boolean(bool),
    /// String
    String(String),
    /// Date
    Date(ExcelDateTime),
    /// Date and time
    DateTime(ExcelDateTime),
    /// Time of day
    Time(ExcelDateTime),
}

impl Value {
    /// The field type this value naturally belongs to, `None` for `Empty`
    pub fn field_type(&self) -> Option<FieldType> {
        Some(match self {
            Value::Empty => return None,
            Value::Integer(_) => FieldType::Integer,
            Value::Real(_) => FieldType::Real,
            Value::Boolean(_) => FieldType::Boolean,
            Value::String(_) => FieldType::String,
            Value::Date(_) => FieldType::Date,
            Value::DateTime(_) => FieldType::DateTime,
            Value::Time(_) => FieldType::Time,
        })
    }

    /// Is the value `Empty`
    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Try getting a string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try getting an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try getting a float, integers are widened
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Real(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try getting a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try getting the serial date of a temporal value
    pub fn as_datetime(&self) -> Option<ExcelDateTime> {
        match self {
            Value::Date(d) | Value::DateTime(d) | Value::Time(d) => Some(*d),
            _ => None,
        }
    }

    /// Classifies a numeric cell literal.
    ///
    /// Literals made only of digits (with an optional sign) that fit an
    /// `i64` are integers, anything else that parses as a number is real.
    pub(crate) fn parse_number(raw: &str) -> Option<Value> {
        let t = raw.trim();
        let digits = t.strip_prefix(['-', '+']).unwrap_or(t);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(i) = t.parse::<i64>() {
                return Some(Value::Integer(i));
            }
        }
        fast_float2::parse::<f64, _>(t.as_bytes())
            .ok()
            .map(Value::Real)
    }

    /// Converts the value to the representation of another field type.
    ///
    /// Conversions that cannot produce a meaningful value give `Empty`.
    pub fn convert(self, to: FieldType) -> Value {
        if self.field_type().is_none_or(|t| t == to) {
            return self;
        }
        match to {
            FieldType::String => Value::String(self.to_string()),
            FieldType::Real => match self {
                Value::Integer(i) => Value::Real(i as f64),
                Value::Boolean(b) => Value::Real(if b { 1. } else { 0. }),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Real)
                    .unwrap_or(Value::Empty),
                Value::Date(d) | Value::DateTime(d) | Value::Time(d) => Value::Real(d.as_f64()),
                v => v,
            },
            FieldType::Integer => match self {
                Value::Real(f) if f.is_finite() => Value::Integer(f.trunc() as i64),
                Value::Boolean(b) => Value::Integer(b as i64),
                Value::String(s) => match Value::parse_number(&s) {
                    Some(v @ Value::Integer(_)) => v,
                    Some(Value::Real(f)) if f.is_finite() => Value::Integer(f.trunc() as i64),
                    _ => Value::Empty,
                },
                Value::Date(d) | Value::DateTime(d) | Value::Time(d) => {
                    Value::Integer(d.as_f64().trunc() as i64)
                }
                _ => Value::Empty,
            },
            FieldType::Boolean => match self {
                Value::Integer(i) => Value::Boolean(i != 0),
                Value::Real(f) => Value::Boolean(f != 0.),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" => Value::Boolean(true),
                    "0" | "false" | "no" => Value::Boolean(false),
                    _ => Value::Empty,
                },
                _ => Value::Empty,
            },
            FieldType::Date | FieldType::DateTime | FieldType::Time => {
                let serial = match self {
                    Value::Date(d) | Value::DateTime(d) | Value::Time(d) => d,
                    Value::Integer(i) => ExcelDateTime::new(i as f64),
                    Value::Real(f) => ExcelDateTime::new(f),
                    Value::String(s) => match ExcelDateTime::parse_iso(&s) {
                        Some((d, _)) => d,
                        None => return Value::Empty,
                    },
                    _ => return Value::Empty,
                };
                ExcelDateTime::wrap(serial.restrict(to), to)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => Ok(()),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Boolean(true) => f.write_str("TRUE"),
            Value::Boolean(false) => f.write_str("FALSE"),
            Value::String(s) => f.write_str(s),
            Value::Date(d) => f.write_str(&d.format(FieldType::Date)),
            Value::DateTime(d) => f.write_str(&d.format(FieldType::DateTime)),
            Value::Time(d) => f.write_str(&d.format(FieldType::Time)),
        }
    }
}

macro_rules! define_from {
    ($variant:path, $ty:ty) => {
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                $variant(v)
            }
        }
    };
}

define_from!(Value::Integer, i64);
define_from!(Value::Real, f64);
define_from!(Value::String, String);
define_from!(Value::Boolean, bool);

impl<'a> From<&'a str> for Value {
    fn from(v: &'a str) -> Self {
        Value::String(String::from(v))
    }
}

impl<T> From<Option<T>> for Value
where
    Value: From<T>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => From::from(v),
            None => Value::Empty,
        }
    }
}

/// A date, time or datetime stored as an Excel serial number.
///
/// The serial always uses the 1900 date system (day 1 is 1900-01-01, the
/// fractional part is the time of day), whatever the `date1904` setting of
/// the workbook it was read from.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct ExcelDateTime {
    value: f64,
}

impl ExcelDateTime {
    /// Creates a value from a 1900-system serial number
    pub fn new(value: f64) -> Self {
        ExcelDateTime { value }
    }

    pub(crate) fn from_workbook_serial(value: f64, is_1904: bool) -> Self {
        if is_1904 {
            ExcelDateTime::new(value + EXCEL_1900_1904_DIFF)
        } else {
            ExcelDateTime::new(value)
        }
    }

    pub(crate) fn to_workbook_serial(self, is_1904: bool) -> f64 {
        if is_1904 {
            self.value - EXCEL_1900_1904_DIFF
        } else {
            self.value
        }
    }

    /// The serial number
    pub fn as_f64(&self) -> f64 {
        self.value
    }

    /// Creates a date from its calendar components
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        if !(1..=12).contains(&month) || day == 0 || day > days_in_month(year as i64, month) {
            return None;
        }
        let days = days_from_civil(year as i64, month, day) + UNIX_EPOCH_SERIAL;
        // serials below 61 are shifted by the fictitious 1900-02-29
        let serial = if days < 61 { days - 1 } else { days };
        Some(ExcelDateTime::new(serial as f64))
    }

    /// Creates a time of day
    pub fn from_hms_milli(hour: u32, minute: u32, second: u32, milli: u32) -> Option<Self> {
        if hour > 23 || minute > 59 || second > 59 || milli > 999 {
            return None;
        }
        let ms = ((hour * 60 + minute) * 60 + second) as i64 * 1000 + milli as i64;
        Some(ExcelDateTime::new(ms as f64 / MS_PER_DAY as f64))
    }

    /// Creates a datetime from its calendar and clock components
    pub fn from_ymd_hms_milli(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
        milli: u32,
    ) -> Option<Self> {
        let date = ExcelDateTime::from_ymd(year, month, day)?;
        let time = ExcelDateTime::from_hms_milli(hour, minute, second, milli)?;
        Some(ExcelDateTime::new(date.value + time.value))
    }

    /// Splits the serial into whole days (as if there were no 1900 leap
    /// year bug) and milliseconds within the day.
    fn split(&self) -> (i64, i64) {
        let adjusted = if self.value >= 60. {
            self.value
        } else {
            self.value + 1.
        };
        let total_ms = (adjusted * MS_PER_DAY as f64).round() as i64;
        (
            total_ms.div_euclid(MS_PER_DAY),
            total_ms.rem_euclid(MS_PER_DAY),
        )
    }

    /// Calendar date (year, month, day)
    pub fn date(&self) -> (i32, u32, u32) {
        let (days, _) = self.split();
        let (y, m, d) = civil_from_days(days - UNIX_EPOCH_SERIAL);
        (y as i32, m, d)
    }

    /// Time of day (hour, minute, second, millisecond)
    pub fn time(&self) -> (u32, u32, u32, u32) {
        let (_, ms) = self.split();
        let ms = ms as u32;
        (
            ms / 3_600_000,
            ms / 60_000 % 60,
            ms / 1000 % 60,
            ms % 1000,
        )
    }

    /// Does the time of day carry a non-zero millisecond part
    pub fn has_millis(&self) -> bool {
        self.time().3 != 0
    }

    /// Keeps only the part of the serial meaningful for `kind`.
    fn restrict(self, kind: FieldType) -> Self {
        match kind {
            FieldType::Date => ExcelDateTime::new(self.value.floor()),
            FieldType::Time => ExcelDateTime::new(self.value - self.value.floor()),
            _ => self,
        }
    }

    fn wrap(self, kind: FieldType) -> Value {
        match kind {
            FieldType::Date => Value::Date(self),
            FieldType::Time => Value::Time(self),
            _ => Value::DateTime(self),
        }
    }

    /// Renders the value as ISO 8601 for the given temporal type
    /// (`YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS[.mmm]` or `HH:MM:SS[.mmm]`).
    pub fn format(&self, kind: FieldType) -> String {
        let (y, mo, d) = self.date();
        let (h, mi, s, ms) = self.time();
        let clock = if ms == 0 {
            format!("{h:02}:{mi:02}:{s:02}")
        } else {
            format!("{h:02}:{mi:02}:{s:02}.{ms:03}")
        };
        match kind {
            FieldType::Date => format!("{y:04}-{mo:02}-{d:02}"),
            FieldType::Time => clock,
            _ => format!("{y:04}-{mo:02}-{d:02}T{clock}"),
        }
    }

    /// Parses an ISO 8601 date, time or datetime and reports which of the
    /// three it was.
    pub fn parse_iso(s: &str) -> Option<(ExcelDateTime, FieldType)> {
        let s = s.trim().trim_end_matches('Z');
        if let Some((date, time)) = s.split_once(['T', ' ']) {
            let (y, m, d) = parse_ymd(date)?;
            let (h, mi, sec, ms) = parse_hms(time)?;
            let v = ExcelDateTime::from_ymd_hms_milli(y, m, d, h, mi, sec, ms)?;
            Some((v, FieldType::DateTime))
        } else if s.contains(':') {
            let (h, mi, sec, ms) = parse_hms(s)?;
            Some((ExcelDateTime::from_hms_milli(h, mi, sec, ms)?, FieldType::Time))
        } else {
            let (y, m, d) = parse_ymd(s)?;
            Some((ExcelDateTime::from_ymd(y, m, d)?, FieldType::Date))
        }
    }

    /// Try converting into a chrono datetime
    #[cfg(feature = "chrono")]
    pub fn as_datetime(&self) -> Option<chrono::NaiveDateTime> {
        Some(self.as_date()?.and_time(self.as_time()?))
    }

    /// Try converting the date part into a chrono date
    #[cfg(feature = "chrono")]
    pub fn as_date(&self) -> Option<chrono::NaiveDate> {
        let (y, m, d) = self.date();
        chrono::NaiveDate::from_ymd_opt(y, m, d)
    }

    /// Try converting the time part into a chrono time
    #[cfg(feature = "chrono")]
    pub fn as_time(&self) -> Option<chrono::NaiveTime> {
        let (h, mi, s, ms) = self.time();
        chrono::NaiveTime::from_hms_milli_opt(h, mi, s, ms)
    }
}

fn parse_ymd(s: &str) -> Option<(i32, u32, u32)> {
    let mut it = s.splitn(3, '-');
    let y = it.next()?.parse().ok()?;
    let m = it.next()?.parse().ok()?;
    let d = it.next()?.parse().ok()?;
    Some((y, m, d))
}

fn parse_hms(s: &str) -> Option<(u32, u32, u32, u32)> {
    let mut it = s.splitn(3, ':');
    let h = it.next()?.parse().ok()?;
    let mi = it.next()?.parse().ok()?;
    let (sec, ms) = match it.next() {
        None => (0, 0),
        Some(rest) => match rest.split_once('.') {
            None => (rest.parse().ok()?, 0),
            Some((sec, frac)) => {
                // keep millisecond precision only
                let frac: String = frac.chars().chain("000".chars()).take(3).collect();
                (sec.parse().ok()?, frac.parse().ok()?)
            }
        },
    };
    Some((h, mi, sec, ms))
}

fn is_leap_year(y: i64) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

fn days_in_month(y: i64, m: u32) -> u32 {
    match m {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ if is_leap_year(y) => 29,
        _ => 28,
    }
}

/// Days since 1970-01-01 of a proleptic Gregorian date.
fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = y.div_euclid(400);
    let yoe = y.rem_euclid(400);
    let m = m as i64;
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Inverse of `days_from_civil`.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let y = yoe + era * 400;
    (if m <= 2 { y + 1 } else { y }, m, d)
}
