//! Date and time functions: `ago`, `now`, `datepart`, `format_datetime`, and
//! `bin` for both numbers and datetimes.

use chrono::{DateTime, Datelike, TimeDelta, Timelike, Utc};

use kql_parser::Value;

use super::{expect_args, int_arg};
use crate::error::{EvalError, Result};
use crate::operators::{Num, overflow, to_datetime, to_timespan};

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// `ago(timespan)`: the current UTC time minus the span.
pub fn ago(args: &[Value]) -> Result<Value> {
    expect_args("ago", args, 1, 1)?;
    let Value::TimeSpan(span) = &args[0] else {
        return Err(EvalError::mismatch(format!(
            "ago expects a timespan, got {} '{}'",
            args[0].type_name(),
            args[0]
        )));
    };
    Utc::now()
        .checked_sub_signed(*span)
        .map(Value::DateTime)
        .ok_or_else(overflow)
}

/// `now([offset])`
pub fn now(args: &[Value]) -> Result<Value> {
    expect_args("now", args, 0, 1)?;
    let offset = match args.first() {
        Some(v) => to_timespan(v).ok_or_else(|| {
            EvalError::mismatch(format!("now expects a timespan offset, got '{v}'"))
        })?,
        None => TimeDelta::zero(),
    };
    Utc::now()
        .checked_add_signed(offset)
        .map(Value::DateTime)
        .ok_or_else(overflow)
}

/// `datepart(part, datetime)`. Part names are case-insensitive and accept
/// the usual short aliases (`yy`, `mm`, `dw`, ...).
pub fn datepart(args: &[Value]) -> Result<Value> {
    expect_args("datepart", args, 2, 2)?;
    let part = args[0].to_string().to_ascii_lowercase();
    if args[1].is_empty_like() {
        return Ok(Value::Null);
    }
    let dt = to_datetime(&args[1]).ok_or_else(|| {
        EvalError::mismatch(format!(
            "datepart expects a datetime, got {} '{}'",
            args[1].type_name(),
            args[1]
        ))
    })?;

    let value = match part.as_str() {
        "year" | "yyyy" | "yy" | "y" => i64::from(dt.year()),
        "quarter" | "qq" | "q" => i64::from((dt.month() - 1) / 3 + 1),
        "month" | "mm" | "m" => i64::from(dt.month()),
        "week_of_year" | "week" | "wk" | "ww" => i64::from(dt.iso_week().week()),
        "day" | "dd" | "d" => i64::from(dt.day()),
        "dayofyear" | "doy" | "dy" => i64::from(dt.ordinal()),
        "dayofweek" | "weekday" | "dw" | "wd" => i64::from(dt.weekday().num_days_from_sunday()),
        "hour" | "hh" | "h" => i64::from(dt.hour()),
        "minute" | "mi" | "n" => i64::from(dt.minute()),
        "second" | "ss" | "s" => i64::from(dt.second()),
        "millisecond" | "ms" => i64::from(dt.nanosecond() % 1_000_000_000 / 1_000_000),
        "microsecond" => i64::from(dt.nanosecond() % 1_000_000_000 / 1_000),
        "nanosecond" => i64::from(dt.nanosecond() % 1_000_000_000),
        other => {
            return Err(EvalError::InvalidArgument(format!(
                "unknown datepart '{other}'"
            )));
        }
    };
    Ok(Value::Long(value))
}

/// `format_datetime(datetime, format)` with .NET-style format tokens.
pub fn format_datetime(args: &[Value]) -> Result<Value> {
    expect_args("format_datetime", args, 2, 2)?;
    if args[0].is_empty_like() {
        return Ok(Value::from(""));
    }
    let dt = to_datetime(&args[0]).ok_or_else(|| {
        EvalError::mismatch(format!(
            "format_datetime expects a datetime, got {} '{}'",
            args[0].type_name(),
            args[0]
        ))
    })?;
    Ok(Value::Str(render_datetime(&dt, &args[1].to_string())))
}

fn render_datetime(dt: &DateTime<Utc>, format: &str) -> String {
    let chars: Vec<char> = format.chars().collect();
    let mut out = String::with_capacity(format.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            if let Some(next) = chars.get(i + 1) {
                out.push(*next);
            }
            i += 2;
            continue;
        }

        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }

        match c {
            'y' if run >= 3 => out.push_str(&format!("{:04}", dt.year())),
            'y' if run == 2 => out.push_str(&format!("{:02}", dt.year().rem_euclid(100))),
            'y' => out.push_str(&dt.year().rem_euclid(100).to_string()),
            'M' if run >= 4 => out.push_str(&dt.format("%B").to_string()),
            'M' if run == 3 => out.push_str(&dt.format("%b").to_string()),
            'M' => push_number(&mut out, dt.month(), run),
            'd' if run >= 4 => out.push_str(&dt.format("%A").to_string()),
            'd' if run == 3 => out.push_str(&dt.format("%a").to_string()),
            'd' => push_number(&mut out, dt.day(), run),
            'H' => push_number(&mut out, dt.hour(), run),
            'h' => push_number(&mut out, dt.hour12().1, run),
            'm' => push_number(&mut out, dt.minute(), run),
            's' => push_number(&mut out, dt.second(), run),
            'f' | 'F' => {
                let digits = run.min(9);
                let nanos = dt.nanosecond() % 1_000_000_000;
                let mut fraction = format!("{nanos:09}");
                fraction.truncate(digits);
                if c == 'F' {
                    let trimmed = fraction.trim_end_matches('0').len();
                    fraction.truncate(trimmed);
                }
                out.push_str(&fraction);
            }
            't' => {
                let designator = if dt.hour12().0 { "PM" } else { "AM" };
                out.push_str(if run >= 2 { designator } else { &designator[..1] });
            }
            _ => {
                for _ in 0..run {
                    out.push(c);
                }
            }
        }
        i += run;
    }
    out
}

fn push_number(out: &mut String, value: u32, run: usize) {
    if run >= 2 {
        out.push_str(&format!("{value:02}"));
    } else {
        out.push_str(&value.to_string());
    }
}

/// `bin(value, size)`: round down to a multiple of `size`.
///
/// Numbers bin numerically; datetimes and timespans bin by a timespan size.
pub fn bin(args: &[Value]) -> Result<Value> {
    expect_args("bin", args, 2, 2)?;
    let (value, size) = (&args[0], &args[1]);
    if value.is_empty_like() {
        return Ok(Value::Null);
    }

    if let Value::TimeSpan(span) = size {
        if *span <= TimeDelta::zero() {
            return Err(EvalError::InvalidArgument(format!(
                "bin size must be positive, got {size}"
            )));
        }
        if let Value::TimeSpan(ts) = value {
            let floored = floor_nanos(i128::from(timedelta_nanos(*ts)), timedelta_nanos(*span));
            return i64::try_from(floored)
                .map(|n| Value::TimeSpan(TimeDelta::nanoseconds(n)))
                .map_err(|_| EvalError::InvalidArgument("bin result out of range".into()));
        }
        let dt = to_datetime(value).ok_or_else(|| {
            EvalError::mismatch(format!(
                "bin by timespan expects a datetime, got {} '{value}'",
                value.type_name()
            ))
        })?;
        return floor_datetime(dt, *span)
            .map(Value::DateTime)
            .ok_or_else(|| EvalError::InvalidArgument("bin result out of range".into()));
    }

    let num = Num::from_value(value).ok_or_else(|| {
        EvalError::mismatch(format!(
            "bin expects a number, got {} '{value}'",
            value.type_name()
        ))
    })?;
    match (num, size) {
        (Num::Int(n), Value::Int(_) | Value::Long(_)) => {
            let step = int_arg("bin", size)?;
            if step <= 0 {
                return Err(EvalError::InvalidArgument(format!(
                    "bin size must be positive, got {step}"
                )));
            }
            n.div_euclid(step)
                .checked_mul(step)
                .map(Value::Long)
                .ok_or_else(overflow)
        }
        _ => {
            let step = size.as_f64().ok_or_else(|| {
                EvalError::InvalidArgument(format!("bin size must be numeric, got '{size}'"))
            })?;
            if step <= 0.0 {
                return Err(EvalError::InvalidArgument(format!(
                    "bin size must be positive, got {step}"
                )));
            }
            let v = match num {
                Num::Int(i) => i as f64,
                Num::Real(r) => r,
                Num::Decimal(_) => value.as_f64().unwrap_or(f64::NAN),
            };
            Ok(Value::Real((v / step).floor() * step))
        }
    }
}

fn timedelta_nanos(span: TimeDelta) -> i64 {
    span.num_nanoseconds().unwrap_or(i64::MAX)
}

fn floor_nanos(value: i128, step: i64) -> i128 {
    let step = i128::from(step);
    value.div_euclid(step) * step
}

/// Nanoseconds since the Unix epoch. Every `DateTime<Utc>` fits in an i128.
pub(crate) fn epoch_nanos(dt: DateTime<Utc>) -> i128 {
    i128::from(dt.timestamp()) * NANOS_PER_SECOND + i128::from(dt.timestamp_subsec_nanos())
}

/// Inverse of [`epoch_nanos`]; `None` outside chrono's datetime range.
pub(crate) fn from_epoch_nanos(nanos: i128) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(nanos.div_euclid(NANOS_PER_SECOND)).ok()?;
    let subsec = u32::try_from(nanos.rem_euclid(NANOS_PER_SECOND)).ok()?;
    DateTime::from_timestamp(secs, subsec)
}

/// Floor a datetime to a multiple of `span` counted from the Unix epoch.
pub(crate) fn floor_datetime(dt: DateTime<Utc>, span: TimeDelta) -> Option<DateTime<Utc>> {
    from_epoch_nanos(floor_nanos(epoch_nanos(dt), timedelta_nanos(span)))
}
