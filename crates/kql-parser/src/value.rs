//! Dynamically typed values carried by event records.
//!
//! [`Value`] is the closed set of runtime kinds a KQL pipeline can observe:
//! scalars, datetimes and timespans, guids, nested records and lists.
//! A [`Record`] is an insertion-ordered map of field name to value.
//!
//! This module also hosts the literal parsers shared by the grammar and the
//! conversion functions (`totimespan`, `todatetime`):
//! - [`parse_timespan`]: `5m`, `1.5h`, `10sec`, `100ms`, `2.03:04:05.5`
//! - [`parse_datetime`]: RFC 3339 and the common ISO-like layouts, assumed UTC

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeDelta, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use uuid::Uuid;

/// An event record: field name to value, in insertion order.
pub type Record = IndexMap<String, Value>;

/// Number of nanoseconds in one tick (the 100ns unit used by `tick` literals).
const NANOS_PER_TICK: i64 = 100;

// =============================================================================
// Value
// =============================================================================

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Real(f64),
    Decimal(Decimal),
    DateTime(DateTime<Utc>),
    TimeSpan(TimeDelta),
    Guid(Uuid),
    Str(String),
    Record(Record),
    List(Vec<Value>),
}

impl Value {
    /// The KQL type name of this value, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Real(_) => "real",
            Value::Decimal(_) => "decimal",
            Value::DateTime(_) => "datetime",
            Value::TimeSpan(_) => "timespan",
            Value::Guid(_) => "guid",
            Value::Str(_) => "string",
            Value::Record(_) => "record",
            Value::List(_) => "list",
        }
    }

    /// `true` for null and for the empty string.
    ///
    /// A missing field reads as the empty string, so both forms mean "absent".
    pub fn is_empty_like(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Str(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int(_) | Value::Long(_) | Value::Real(_) | Value::Decimal(_)
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view of `int` and `long` values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(i64::from(*i)),
            Value::Long(l) => Some(*l),
            _ => None,
        }
    }

    /// Floating point view of any numeric value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(f64::from(*i)),
            Value::Long(l) => Some(*l as f64),
            Value::Real(r) => Some(*r),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Convert a JSON value. Integers become `long`, other numbers `real`.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Long(i)
                } else if let Some(u) = n.as_u64() {
                    Value::Real(u as f64)
                } else {
                    Value::Real(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Record(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON using the same representation as [`Serialize`].
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Long(l) => serde_json::Value::from(*l),
            Value::Real(r) => serde_json::Number::from_f64(*r)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Decimal(d) => d
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(_) | Value::TimeSpan(_) | Value::Guid(_) => {
                serde_json::Value::String(self.to_string())
            }
            Value::Record(r) => serde_json::Value::Object(
                r.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::List(l) => serde_json::Value::Array(l.iter().map(Value::to_json).collect()),
        }
    }
}

/// Renders the value the way `tostring()` and group keys see it.
///
/// Null renders as the empty string; records and lists render as compact JSON.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Long(l) => write!(f, "{l}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::DateTime(dt) => write!(f, "{}", format_datetime_iso(dt)),
            Value::TimeSpan(ts) => write!(f, "{}", format_timespan(*ts)),
            Value::Guid(g) => write!(f, "{g}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Record(_) | Value::List(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i32(*i),
            Value::Long(l) => serializer.serialize_i64(*l),
            Value::Real(r) => serializer.serialize_f64(*r),
            Value::Decimal(d) => match d.to_f64() {
                Some(f) => serializer.serialize_f64(f),
                None => serializer.serialize_str(&d.to_string()),
            },
            Value::Str(s) => serializer.serialize_str(s),
            Value::DateTime(_) | Value::TimeSpan(_) | Value::Guid(_) => {
                serializer.serialize_str(&self.to_string())
            }
            Value::Record(r) => {
                let mut map = serializer.serialize_map(Some(r.len()))?;
                for (k, v) in r {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::List(l) => {
                let mut seq = serializer.serialize_seq(Some(l.len()))?;
                for v in l {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i)
    }
}

impl From<i64> for Value {
    fn from(l: i64) -> Self {
        Value::Long(l)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}

impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<TimeDelta> for Value {
    fn from(ts: TimeDelta) -> Self {
        Value::TimeSpan(ts)
    }
}

impl From<Uuid> for Value {
    fn from(g: Uuid) -> Self {
        Value::Guid(g)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

// =============================================================================
// Timespans
// =============================================================================

/// Parse a bare timespan literal such as `5m`, `1.5h`, `10sec` or `100ms`.
pub fn parse_timespan_literal(s: &str) -> Option<TimeDelta> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|&i| i > 0)?;
    let (number, unit) = s.split_at(split);
    let number: f64 = number.parse().ok()?;

    let nanos_per_unit: f64 = match unit {
        "d" | "day" | "days" => 86_400e9,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600e9,
        "m" | "min" | "mins" | "minute" | "minutes" => 60e9,
        "s" | "sec" | "secs" | "second" | "seconds" => 1e9,
        "ms" | "milli" | "millis" | "millisecond" | "milliseconds" => 1e6,
        "microsecond" | "microseconds" => 1e3,
        "tick" | "ticks" => NANOS_PER_TICK as f64,
        _ => return None,
    };

    let nanos = number * nanos_per_unit;
    if !nanos.is_finite() || nanos > i64::MAX as f64 {
        return None;
    }
    Some(TimeDelta::nanoseconds(nanos.round() as i64))
}

/// Parse a timespan from either literal form or `[-][d.]hh:mm[:ss[.fffffff]]`.
pub fn parse_timespan(s: &str) -> Option<TimeDelta> {
    let s = s.trim();
    if let Some(ts) = parse_timespan_literal(s) {
        return Some(ts);
    }

    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };

    let mut parts = body.split(':');
    let head = parts.next()?;
    let minutes = parts.next()?;
    let seconds = parts.next();
    if parts.next().is_some() {
        return None;
    }

    let (days, hours) = match head.split_once('.') {
        Some((d, h)) => (d.parse::<i64>().ok()?, h.parse::<i64>().ok()?),
        None => (0, head.parse::<i64>().ok()?),
    };
    let minutes: i64 = minutes.parse().ok()?;
    let (secs, frac_nanos) = match seconds {
        None => (0, 0),
        Some(sec) => match sec.split_once('.') {
            Some((whole, frac)) => (whole.parse::<i64>().ok()?, parse_fraction_nanos(frac)?),
            None => (sec.parse::<i64>().ok()?, 0),
        },
    };
    if hours > 23 || minutes > 59 || secs > 59 {
        return None;
    }

    let total = TimeDelta::try_days(days)?
        .checked_add(&TimeDelta::hours(hours))?
        .checked_add(&TimeDelta::minutes(minutes))?
        .checked_add(&TimeDelta::seconds(secs))?
        .checked_add(&TimeDelta::nanoseconds(frac_nanos))?;
    Some(if negative { -total } else { total })
}

fn parse_fraction_nanos(frac: &str) -> Option<i64> {
    if frac.is_empty() || frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let padded = format!("{frac:0<9}");
    padded.parse().ok()
}

/// Format a timespan as `[-][d.]hh:mm:ss[.fffffff]`.
pub fn format_timespan(ts: TimeDelta) -> String {
    let negative = ts < TimeDelta::zero();
    let ts = ts.abs();
    let days = ts.num_days();
    let hours = ts.num_hours() % 24;
    let minutes = ts.num_minutes() % 60;
    let seconds = ts.num_seconds() % 60;
    let ticks = ts.subsec_nanos() as i64 / NANOS_PER_TICK;

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if days > 0 {
        out.push_str(&format!("{days}."));
    }
    out.push_str(&format!("{hours:02}:{minutes:02}:{seconds:02}"));
    if ticks > 0 {
        out.push_str(&format!(".{ticks:07}"));
    }
    out
}

/// Render a timespan as the shortest exact KQL literal (`5m`, `2d`, `150ms`).
pub fn timespan_literal(ts: TimeDelta) -> String {
    let nanos = match ts.num_nanoseconds() {
        Some(n) => n,
        None => return format!("{}s", ts.num_seconds()),
    };

    const UNITS: [(i64, &str); 6] = [
        (86_400_000_000_000, "d"),
        (3_600_000_000_000, "h"),
        (60_000_000_000, "m"),
        (1_000_000_000, "s"),
        (1_000_000, "ms"),
        (NANOS_PER_TICK, "tick"),
    ];
    for (size, unit) in UNITS {
        if nanos % size == 0 {
            return format!("{}{unit}", nanos / size);
        }
    }
    format!("{}tick", nanos / NANOS_PER_TICK)
}

/// Number of 100ns ticks in a timespan.
pub fn timespan_ticks(ts: TimeDelta) -> i64 {
    ts.num_nanoseconds()
        .map(|n| n / NANOS_PER_TICK)
        .or_else(|| ts.num_microseconds().map(|us| us.saturating_mul(10)))
        .unwrap_or(if ts < TimeDelta::zero() { i64::MIN } else { i64::MAX })
}

/// Build a timespan from a number of 100ns ticks.
pub fn timespan_from_ticks(ticks: i64) -> TimeDelta {
    TimeDelta::microseconds(ticks / 10) + TimeDelta::nanoseconds((ticks % 10) * NANOS_PER_TICK)
}

// =============================================================================
// Datetimes
// =============================================================================

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %I:%M:%S %p",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Parse a datetime string. Values without an offset are taken as UTC.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim().trim_matches(|c| c == '"' || c == '\'');
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let trimmed = s.strip_suffix('Z').unwrap_or(s);
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

/// Format a datetime as RFC 3339 in UTC with the `Z` suffix.
pub fn format_datetime_iso(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse a decimal literal, accepting scientific notation.
pub fn parse_decimal(s: &str) -> Option<Decimal> {
    let s = s.trim();
    s.parse::<Decimal>()
        .ok()
        .or_else(|| Decimal::from_scientific(s).ok())
        .or_else(|| s.parse::<f64>().ok().and_then(Decimal::from_f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timespan_literal_units() {
        assert_eq!(parse_timespan_literal("5m"), Some(TimeDelta::minutes(5)));
        assert_eq!(parse_timespan_literal("1h"), Some(TimeDelta::hours(1)));
        assert_eq!(parse_timespan_literal("2d"), Some(TimeDelta::days(2)));
        assert_eq!(parse_timespan_literal("10sec"), Some(TimeDelta::seconds(10)));
        assert_eq!(parse_timespan_literal("3min"), Some(TimeDelta::minutes(3)));
        assert_eq!(parse_timespan_literal("1day"), Some(TimeDelta::days(1)));
        assert_eq!(
            parse_timespan_literal("100ms"),
            Some(TimeDelta::milliseconds(100))
        );
        assert_eq!(parse_timespan_literal("1.5h"), Some(TimeDelta::minutes(90)));
        assert_eq!(parse_timespan_literal("3tick"), Some(TimeDelta::nanoseconds(300)));
    }

    #[test]
    fn test_timespan_literal_invalid() {
        assert_eq!(parse_timespan_literal(""), None);
        assert_eq!(parse_timespan_literal("m"), None);
        assert_eq!(parse_timespan_literal("5x"), None);
        assert_eq!(parse_timespan_literal("5"), None);
    }

    #[test]
    fn test_timespan_clock_format() {
        assert_eq!(parse_timespan("00:01:00"), Some(TimeDelta::minutes(1)));
        assert_eq!(
            parse_timespan("1.02:03:04"),
            Some(
                TimeDelta::days(1)
                    + TimeDelta::hours(2)
                    + TimeDelta::minutes(3)
                    + TimeDelta::seconds(4)
            )
        );
        assert_eq!(
            parse_timespan("00:00:01.5"),
            Some(TimeDelta::milliseconds(1500))
        );
        assert_eq!(parse_timespan("-01:00:00"), Some(TimeDelta::hours(-1)));
        assert_eq!(parse_timespan("25:00:00"), None);
    }

    #[test]
    fn test_timespan_out_of_range() {
        assert_eq!(
            parse_timespan("100000000.00:00:00"),
            TimeDelta::try_days(100_000_000)
        );
        assert_eq!(parse_timespan("106751991167.23:00:00"), None);
        assert_eq!(parse_timespan("999999999999.00:00:00"), None);
        assert_eq!(parse_timespan_literal("99999999999999999999d"), None);
    }

    #[test]
    fn test_format_timespan() {
        assert_eq!(format_timespan(TimeDelta::minutes(1)), "00:01:00");
        assert_eq!(
            format_timespan(TimeDelta::days(2) + TimeDelta::hours(3)),
            "2.03:00:00"
        );
        assert_eq!(
            format_timespan(TimeDelta::milliseconds(1500)),
            "00:00:01.5000000"
        );
        assert_eq!(format_timespan(TimeDelta::seconds(-30)), "-00:00:30");
    }

    #[test]
    fn test_timespan_literal_rendering() {
        assert_eq!(timespan_literal(TimeDelta::minutes(5)), "5m");
        assert_eq!(timespan_literal(TimeDelta::minutes(90)), "90m");
        assert_eq!(timespan_literal(TimeDelta::days(1)), "1d");
        assert_eq!(timespan_literal(TimeDelta::milliseconds(1500)), "1500ms");
        for ts in [
            TimeDelta::seconds(17),
            TimeDelta::hours(36),
            TimeDelta::nanoseconds(700),
        ] {
            assert_eq!(parse_timespan_literal(&timespan_literal(ts)), Some(ts));
        }
    }

    #[test]
    fn test_ticks() {
        assert_eq!(timespan_ticks(TimeDelta::seconds(1)), 10_000_000);
        assert_eq!(timespan_from_ticks(10_000_000), TimeDelta::seconds(1));
        assert_eq!(timespan_from_ticks(15), TimeDelta::nanoseconds(1500));

        let huge = TimeDelta::try_days(100_000_000_000).unwrap();
        assert_eq!(timespan_ticks(huge), i64::MAX);
        assert_eq!(timespan_ticks(-huge), i64::MIN);
    }

    #[test]
    fn test_parse_datetime_formats() {
        let expected = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(parse_datetime("2021-03-04T05:06:07Z"), Some(expected));
        assert_eq!(parse_datetime("2021-03-04T05:06:07"), Some(expected));
        assert_eq!(parse_datetime("2021-03-04 05:06:07"), Some(expected));
        assert_eq!(parse_datetime("2021-03-04T07:06:07+02:00"), Some(expected));
        assert_eq!(parse_datetime("\"2021-03-04T05:06:07Z\""), Some(expected));
        assert_eq!(
            parse_datetime("2021-03-04"),
            Some(Utc.with_ymd_and_hms(2021, 3, 4, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_datetime("not a date"), None);
        assert_eq!(parse_datetime(""), None);
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Long(42).to_string(), "42");
        let dt = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(Value::DateTime(dt).to_string(), "2021-03-04T05:06:07Z");
        assert_eq!(
            Value::List(vec![Value::Long(1), Value::from("a")]).to_string(),
            r#"[1,"a"]"#
        );
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({"a": 1, "b": [true, 2.5], "c": {"d": null}});
        let value = Value::from_json(json.clone());
        let record = value.as_record().unwrap();
        assert_eq!(record["a"], Value::Long(1));
        assert_eq!(
            record["b"],
            Value::List(vec![Value::Bool(true), Value::Real(2.5)])
        );
        assert_eq!(value.to_json(), json);
        assert_eq!(serde_json::to_value(&value).unwrap(), json);
    }

    #[test]
    fn test_empty_like() {
        assert!(Value::Null.is_empty_like());
        assert!(Value::from("").is_empty_like());
        assert!(!Value::from(" ").is_empty_like());
        assert!(!Value::Long(0).is_empty_like());
    }
}
