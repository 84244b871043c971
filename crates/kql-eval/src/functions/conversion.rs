//! Conversion functions (`tostring`, `tolong`, `todatetime`, ...) and the
//! named casts used by `extract`.
//!
//! Failed conversions yield null rather than an error, except `tobool`,
//! which reads anything unparseable as `false`.

use uuid::Uuid;

use kql_parser::Value;

use super::expect_args;
use crate::error::{EvalError, Result};
use crate::operators::{parse_bool, to_datetime, to_decimal, to_f64, to_i64, to_timespan};

pub fn tostring(args: &[Value]) -> Result<Value> {
    expect_args("tostring", args, 1, 1)?;
    Ok(Value::Str(args[0].to_string()))
}

pub fn tobool(args: &[Value]) -> Result<Value> {
    expect_args("tobool", args, 1, 1)?;
    Ok(Value::Bool(match &args[0] {
        Value::Bool(b) => *b,
        Value::Str(s) => parse_bool(s).unwrap_or(false),
        v if v.is_numeric() => v.as_f64().is_some_and(|n| n != 0.0),
        _ => false,
    }))
}

pub fn toint(args: &[Value]) -> Result<Value> {
    expect_args("toint", args, 1, 1)?;
    Ok(to_i64(&args[0])
        .and_then(|n| i32::try_from(n).ok())
        .map_or(Value::Null, Value::Int))
}

pub fn tolong(args: &[Value]) -> Result<Value> {
    expect_args("tolong", args, 1, 1)?;
    Ok(to_i64(&args[0]).map_or(Value::Null, Value::Long))
}

pub fn toreal(args: &[Value]) -> Result<Value> {
    expect_args("toreal", args, 1, 1)?;
    Ok(to_f64(&args[0]).map_or(Value::Null, Value::Real))
}

pub fn todecimal(args: &[Value]) -> Result<Value> {
    expect_args("todecimal", args, 1, 1)?;
    Ok(to_decimal(&args[0]).map_or(Value::Null, Value::Decimal))
}

pub fn todatetime(args: &[Value]) -> Result<Value> {
    expect_args("todatetime", args, 1, 1)?;
    Ok(to_datetime(&args[0]).map_or(Value::Null, Value::DateTime))
}

pub fn totimespan(args: &[Value]) -> Result<Value> {
    expect_args("totimespan", args, 1, 1)?;
    Ok(to_timespan(&args[0]).map_or(Value::Null, Value::TimeSpan))
}

pub fn toguid(args: &[Value]) -> Result<Value> {
    expect_args("toguid", args, 1, 1)?;
    Ok(match &args[0] {
        Value::Guid(g) => Value::Guid(*g),
        Value::Str(s) => Uuid::parse_str(s.trim()).map_or(Value::Null, Value::Guid),
        _ => Value::Null,
    })
}

const TYPE_NAMES: &[&str] = &[
    "bool", "boolean", "datetime", "date", "guid", "uniqueid", "int", "long", "real", "double",
    "timespan", "time", "decimal", "string",
];

/// Reject type names `extract` does not know.
pub(crate) fn check_type_name(type_name: &str) -> Result<()> {
    if TYPE_NAMES.contains(&type_name) {
        Ok(())
    } else {
        Err(EvalError::InvalidArgument(format!(
            "unknown type name '{type_name}'"
        )))
    }
}

/// Convert captured text to a named type. A failed conversion yields null.
pub(crate) fn cast_named(type_name: &str, text: &str) -> Result<Value> {
    check_type_name(type_name)?;
    let input = [Value::from(text)];
    match type_name {
        "string" => Ok(Value::from(text)),
        "bool" | "boolean" => Ok(parse_bool(text).map_or(Value::Null, Value::Bool)),
        "datetime" | "date" => todatetime(&input),
        "guid" | "uniqueid" => toguid(&input),
        "int" => Ok(text.trim().parse::<i32>().map_or(Value::Null, Value::Int)),
        "long" => Ok(text.trim().parse::<i64>().map_or(Value::Null, Value::Long)),
        "real" | "double" => toreal(&input),
        "timespan" | "time" => totimespan(&input),
        "decimal" => todecimal(&input),
        _ => unreachable!("type names are checked above"),
    }
}
