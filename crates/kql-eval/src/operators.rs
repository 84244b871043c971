//! Operator semantics over runtime values.
//!
//! Equality is driven by the left operand's type: the right operand is
//! coerced to it (`"4625" == 4625` compares as integers when the left side is
//! a number, and as strings when the left side is a string). Null and the
//! empty string are interchangeable "absent" values:
//! - `absent == absent` is true, `absent == anything else` is false
//! - relational comparisons and `between` against an absent value are false
//! - arithmetic with an absent operand yields null
//!
//! String operators render both sides with `Display` and default to
//! case-insensitive matching; the `_cs` variants are case-sensitive.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use uuid::Uuid;

use kql_parser::{BinaryOp, Value, parse_datetime, parse_decimal, parse_timespan};

use crate::error::{EvalError, Result};

// =============================================================================
// Truthiness
// =============================================================================

/// Interpret a predicate result.
///
/// Bools are themselves, absent values are false, `"true"`/`"false"` strings
/// parse. Anything else is a type mismatch rather than a silent coercion.
pub fn truthy(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        v if v.is_empty_like() => Ok(false),
        Value::Str(s) => parse_bool(s)
            .ok_or_else(|| EvalError::mismatch(format!("expected a bool, got string '{s}'"))),
        other => Err(EvalError::mismatch(format!(
            "expected a bool, got {}",
            other.type_name()
        ))),
    }
}

pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

// =============================================================================
// Equality
// =============================================================================

/// `==` / `=~` with the right operand coerced to the left operand's type.
pub fn equals(left: &Value, right: &Value, case_insensitive: bool) -> Result<bool> {
    if left.is_empty_like() || right.is_empty_like() {
        return Ok(left.is_empty_like() && right.is_empty_like());
    }

    match left {
        Value::Str(s) => {
            let other = right.to_string();
            Ok(if case_insensitive {
                s.to_lowercase() == other.to_lowercase()
            } else {
                *s == other
            })
        }
        Value::Bool(b) => match right {
            Value::Bool(r) => Ok(b == r),
            Value::Str(s) => parse_bool(s)
                .map(|r| *b == r)
                .ok_or_else(|| coerce_error(right, left)),
            _ => Err(coerce_error(right, left)),
        },
        Value::Int(_) | Value::Long(_) | Value::Real(_) | Value::Decimal(_) => {
            let l = Num::from_value(left).ok_or_else(|| coerce_error(right, left))?;
            let r = Num::from_value(right).ok_or_else(|| coerce_error(right, left))?;
            Ok(l.cmp(r) == Some(Ordering::Equal))
        }
        Value::DateTime(l) => to_datetime(right)
            .map(|r| *l == r)
            .ok_or_else(|| coerce_error(right, left)),
        Value::TimeSpan(l) => to_timespan(right)
            .map(|r| *l == r)
            .ok_or_else(|| coerce_error(right, left)),
        Value::Guid(l) => match right {
            Value::Guid(r) => Ok(l == r),
            Value::Str(s) => Uuid::parse_str(s.trim())
                .map(|r| *l == r)
                .map_err(|_| coerce_error(right, left)),
            _ => Err(coerce_error(right, left)),
        },
        Value::Record(_) | Value::List(_) | Value::Null => {
            Err(EvalError::unsupported("equality", left))
        }
    }
}

fn coerce_error(value: &Value, target: &Value) -> EvalError {
    EvalError::mismatch(format!(
        "cannot compare {} '{value}' with {}",
        value.type_name(),
        target.type_name()
    ))
}

// =============================================================================
// Ordering
// =============================================================================

/// Evaluate `<`, `<=`, `>`, `>=`.
pub fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<bool> {
    let Some(ordering) = order(left, right)? else {
        return Ok(false);
    };
    Ok(match op {
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Le => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::Ge => ordering != Ordering::Less,
        other => {
            return Err(EvalError::InvalidArgument(format!(
                "'{other}' is not a relational operator"
            )));
        }
    })
}

/// Order two values. `None` when either side is absent or NaN is involved.
pub fn order(left: &Value, right: &Value) -> Result<Option<Ordering>> {
    if left.is_empty_like() || right.is_empty_like() {
        return Ok(None);
    }

    match (left, right) {
        (Value::Str(l), Value::Str(r)) => Ok(Some(l.cmp(r))),
        (Value::Bool(l), Value::Bool(r)) => Ok(Some(l.cmp(r))),
        (Value::DateTime(l), _) => to_datetime(right)
            .map(|r| Some(l.cmp(&r)))
            .ok_or_else(|| coerce_error(right, left)),
        (_, Value::DateTime(r)) => to_datetime(left)
            .map(|l| Some(l.cmp(r)))
            .ok_or_else(|| coerce_error(left, right)),
        (Value::TimeSpan(l), _) => to_timespan(right)
            .map(|r| Some(l.cmp(&r)))
            .ok_or_else(|| coerce_error(right, left)),
        (_, Value::TimeSpan(r)) => to_timespan(left)
            .map(|l| Some(l.cmp(r)))
            .ok_or_else(|| coerce_error(left, right)),
        _ if left.is_numeric() || right.is_numeric() => {
            let l = Num::from_value(left).ok_or_else(|| coerce_error(left, right))?;
            let r = Num::from_value(right).ok_or_else(|| coerce_error(right, left))?;
            Ok(l.cmp(r))
        }
        _ => Err(EvalError::unsupported("comparison", left)),
    }
}

/// `value between (low .. high)`, inclusive on both ends.
///
/// The bounds decide the domain (numeric, datetime or timespan); a value that
/// cannot be read in that domain is an argument error.
pub fn between(value: &Value, low: &Value, high: &Value) -> Result<bool> {
    if value.is_empty_like() {
        return Ok(false);
    }

    let in_range = |lo: Ordering, hi: Ordering| lo != Ordering::Less && hi != Ordering::Greater;

    if low.is_numeric() && high.is_numeric() {
        let v = Num::from_value(value).ok_or_else(|| between_error(value, "numeric"))?;
        let (Some(lo), Some(hi)) = (Num::from_value(low), Num::from_value(high)) else {
            return Err(between_error(value, "numeric"));
        };
        return Ok(match (v.cmp(lo), v.cmp(hi)) {
            (Some(a), Some(b)) => in_range(a, b),
            _ => false,
        });
    }
    if let (Value::DateTime(lo), Value::DateTime(hi)) = (low, high) {
        let v = to_datetime(value).ok_or_else(|| between_error(value, "datetime"))?;
        return Ok(in_range(v.cmp(lo), v.cmp(hi)));
    }
    if let (Value::DateTime(lo), Value::TimeSpan(span)) = (low, high) {
        let v = to_datetime(value).ok_or_else(|| between_error(value, "datetime"))?;
        let hi = lo.checked_add_signed(*span).ok_or_else(overflow)?;
        return Ok(in_range(v.cmp(lo), v.cmp(&hi)));
    }
    if let (Value::TimeSpan(lo), Value::TimeSpan(hi)) = (low, high) {
        let v = to_timespan(value).ok_or_else(|| between_error(value, "timespan"))?;
        return Ok(in_range(v.cmp(lo), v.cmp(hi)));
    }

    Err(EvalError::InvalidArgument(format!(
        "between bounds must both be numbers, datetimes or timespans, got {} and {}",
        low.type_name(),
        high.type_name()
    )))
}

fn between_error(value: &Value, domain: &str) -> EvalError {
    EvalError::InvalidArgument(format!(
        "between expects a {domain} value, got {} '{value}'",
        value.type_name()
    ))
}

// =============================================================================
// String operators
// =============================================================================

/// Evaluate the `contains` / `has` / `startswith` / `endswith` /
/// `matches regex` family, including negated and `_cs` forms.
pub fn string_match(op: BinaryOp, left: &Value, right: &Value) -> Result<bool> {
    let text = left.to_string();
    let pattern = right.to_string();

    let result = match op {
        BinaryOp::Contains => contains(&text, &pattern, false),
        BinaryOp::NotContains => !contains(&text, &pattern, false),
        BinaryOp::ContainsCs => contains(&text, &pattern, true),
        BinaryOp::NotContainsCs => !contains(&text, &pattern, true),
        BinaryOp::Has => has_term(&text, &pattern, false),
        BinaryOp::NotHas => !has_term(&text, &pattern, false),
        BinaryOp::HasCs => has_term(&text, &pattern, true),
        BinaryOp::NotHasCs => !has_term(&text, &pattern, true),
        BinaryOp::StartsWith => fold(&text, false).starts_with(fold(&pattern, false).as_ref()),
        BinaryOp::NotStartsWith => !fold(&text, false).starts_with(fold(&pattern, false).as_ref()),
        BinaryOp::StartsWithCs => text.starts_with(&pattern),
        BinaryOp::NotStartsWithCs => !text.starts_with(&pattern),
        BinaryOp::EndsWith => fold(&text, false).ends_with(fold(&pattern, false).as_ref()),
        BinaryOp::NotEndsWith => !fold(&text, false).ends_with(fold(&pattern, false).as_ref()),
        BinaryOp::EndsWithCs => text.ends_with(&pattern),
        BinaryOp::NotEndsWithCs => !text.ends_with(&pattern),
        BinaryOp::MatchesRegex => cached_regex(&pattern)?.is_match(&text),
        other => {
            return Err(EvalError::InvalidArgument(format!(
                "'{other}' is not a string operator"
            )));
        }
    };
    Ok(result)
}

fn fold(s: &str, case_sensitive: bool) -> Cow<'_, str> {
    if case_sensitive {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(s.to_lowercase())
    }
}

fn contains(text: &str, needle: &str, case_sensitive: bool) -> bool {
    fold(text, case_sensitive).contains(fold(needle, case_sensitive).as_ref())
}

/// Whole-term match: `term` must appear with non-alphanumeric characters (or
/// the string edges) on both sides.
pub fn has_term(text: &str, term: &str, case_sensitive: bool) -> bool {
    if term.is_empty() {
        return true;
    }
    let text = fold(text, case_sensitive);
    let term = fold(term, case_sensitive);

    let mut start = 0;
    while let Some(pos) = text[start..].find(term.as_ref()) {
        let begin = start + pos;
        let end = begin + term.len();
        let before = text[..begin].chars().next_back();
        let after = text[end..].chars().next();
        if before.is_none_or(|c| !c.is_alphanumeric()) && after.is_none_or(|c| !c.is_alphanumeric())
        {
            return true;
        }
        start = begin + term.chars().next().map_or(1, char::len_utf8);
    }
    false
}

const REGEX_CACHE_LIMIT: usize = 1024;

static REGEX_CACHE: LazyLock<RwLock<HashMap<String, Regex>>> = LazyLock::new(Default::default);

/// Compile a regex, reusing earlier compilations of the same pattern.
pub(crate) fn cached_regex(pattern: &str) -> Result<Regex> {
    if let Some(re) = REGEX_CACHE.read().get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern)?;
    let mut cache = REGEX_CACHE.write();
    if cache.len() >= REGEX_CACHE_LIMIT {
        cache.clear();
    }
    cache.insert(pattern.to_string(), re.clone());
    Ok(re)
}

// =============================================================================
// Arithmetic
// =============================================================================

/// Evaluate `+ - * / %`.
///
/// Integers stay integral (checked, widened to long), reals and decimals
/// promote, and datetime/timespan arithmetic follows the usual calendar rules.
pub fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    if left.is_empty_like() || right.is_empty_like() {
        return Ok(Value::Null);
    }

    match (left, right) {
        (Value::DateTime(l), Value::TimeSpan(r)) => match op {
            BinaryOp::Add => l.checked_add_signed(*r).map(Value::DateTime).ok_or_else(overflow),
            BinaryOp::Sub => l.checked_sub_signed(*r).map(Value::DateTime).ok_or_else(overflow),
            _ => Err(operator_error(op, left, right)),
        },
        (Value::TimeSpan(l), Value::DateTime(r)) if op == BinaryOp::Add => {
            r.checked_add_signed(*l).map(Value::DateTime).ok_or_else(overflow)
        }
        (Value::DateTime(l), Value::DateTime(r)) if op == BinaryOp::Sub => {
            Ok(Value::TimeSpan(l.signed_duration_since(*r)))
        }
        (Value::TimeSpan(l), Value::TimeSpan(r)) => match op {
            BinaryOp::Add => l.checked_add(r).map(Value::TimeSpan).ok_or_else(overflow),
            BinaryOp::Sub => l.checked_sub(r).map(Value::TimeSpan).ok_or_else(overflow),
            BinaryOp::Div => {
                let denominator = nanos_f64(*r);
                if denominator == 0.0 {
                    return Err(division_by_zero());
                }
                Ok(Value::Real(nanos_f64(*l) / denominator))
            }
            _ => Err(operator_error(op, left, right)),
        },
        (Value::TimeSpan(span), other) | (other, Value::TimeSpan(span))
            if other.is_numeric() && matches!(op, BinaryOp::Mul) =>
        {
            scale_timespan(*span, other.as_f64().unwrap_or(1.0))
        }
        (Value::TimeSpan(span), other) if other.is_numeric() && op == BinaryOp::Div => {
            let divisor = other.as_f64().unwrap_or(0.0);
            if divisor == 0.0 {
                return Err(division_by_zero());
            }
            scale_timespan(*span, 1.0 / divisor)
        }
        _ => {
            let l = Num::from_value(left).ok_or_else(|| operator_error(op, left, right))?;
            let r = Num::from_value(right).ok_or_else(|| operator_error(op, left, right))?;
            numeric(op, l, r)
        }
    }
}

fn nanos_f64(span: TimeDelta) -> f64 {
    span.num_nanoseconds()
        .map(|n| n as f64)
        .unwrap_or_else(|| span.num_milliseconds() as f64 * 1e6)
}

fn scale_timespan(span: TimeDelta, factor: f64) -> Result<Value> {
    let nanos = nanos_f64(span) * factor;
    if !nanos.is_finite() || nanos.abs() > i64::MAX as f64 {
        return Err(overflow());
    }
    Ok(Value::TimeSpan(TimeDelta::nanoseconds(nanos.round() as i64)))
}

fn numeric(op: BinaryOp, l: Num, r: Num) -> Result<Value> {
    match (l, r) {
        (Num::Int(a), Num::Int(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div if b == 0 => return Err(division_by_zero()),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Mod if b == 0 => return Err(division_by_zero()),
                BinaryOp::Mod => a.checked_rem(b),
                other => return Err(not_arithmetic(other)),
            };
            result.map(Value::Long).ok_or_else(overflow)
        }
        (Num::Real(_), _) | (_, Num::Real(_)) => {
            let (a, b) = (l.to_f64(), r.to_f64());
            Ok(Value::Real(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Mod => a % b,
                other => return Err(not_arithmetic(other)),
            }))
        }
        _ => {
            let (a, b) = (l.to_decimal().ok_or_else(overflow)?, r.to_decimal().ok_or_else(overflow)?);
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div if b.is_zero() => return Err(division_by_zero()),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Mod if b.is_zero() => return Err(division_by_zero()),
                BinaryOp::Mod => a.checked_rem(b),
                other => return Err(not_arithmetic(other)),
            };
            result.map(Value::Decimal).ok_or_else(overflow)
        }
    }
}

fn operator_error(op: BinaryOp, left: &Value, right: &Value) -> EvalError {
    EvalError::UnsupportedType {
        operation: format!("operator '{op}'"),
        type_name: format!("{} and {}", left.type_name(), right.type_name()),
    }
}

fn not_arithmetic(op: BinaryOp) -> EvalError {
    EvalError::InvalidArgument(format!("'{op}' is not an arithmetic operator"))
}

pub(crate) fn overflow() -> EvalError {
    EvalError::InvalidArgument("arithmetic overflow".to_string())
}

fn division_by_zero() -> EvalError {
    EvalError::InvalidArgument("division by zero".to_string())
}

// =============================================================================
// Coercions
// =============================================================================

/// A numeric operand after coercion.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Num {
    Int(i64),
    Real(f64),
    Decimal(Decimal),
}

impl Num {
    /// Numbers are themselves; strings parse as integer, then real.
    pub(crate) fn from_value(value: &Value) -> Option<Num> {
        match value {
            Value::Int(i) => Some(Num::Int(i64::from(*i))),
            Value::Long(l) => Some(Num::Int(*l)),
            Value::Real(r) => Some(Num::Real(*r)),
            Value::Decimal(d) => Some(Num::Decimal(*d)),
            Value::Str(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .map(Num::Int)
                    .or_else(|_| s.parse::<f64>().map(Num::Real))
                    .ok()
            }
            _ => None,
        }
    }

    fn to_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Real(r) => r,
            Num::Decimal(d) => d.to_f64().unwrap_or(f64::NAN),
        }
    }

    fn to_decimal(self) -> Option<Decimal> {
        match self {
            Num::Int(i) => Some(Decimal::from(i)),
            Num::Real(r) => Decimal::from_f64(r),
            Num::Decimal(d) => Some(d),
        }
    }

    fn cmp(self, other: Num) -> Option<Ordering> {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
            (Num::Real(_), _) | (_, Num::Real(_)) => self.to_f64().partial_cmp(&other.to_f64()),
            _ => Some(self.to_decimal()?.cmp(&other.to_decimal()?)),
        }
    }
}

/// Datetimes are themselves; strings parse with the datetime literal parser.
pub(crate) fn to_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::DateTime(dt) => Some(*dt),
        Value::Str(s) => parse_datetime(s),
        _ => None,
    }
}

/// Timespans are themselves; strings parse as literals or `hh:mm:ss`.
pub(crate) fn to_timespan(value: &Value) -> Option<TimeDelta> {
    match value {
        Value::TimeSpan(ts) => Some(*ts),
        Value::Str(s) => parse_timespan(s),
        _ => None,
    }
}

/// Integer view of a value, truncating reals and parsing strings.
pub(crate) fn to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(i64::from(*i)),
        Value::Long(l) => Some(*l),
        Value::Real(r) if r.is_finite() => Some(r.trunc() as i64),
        Value::Decimal(d) => d.trunc().to_i64(),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Str(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|r| r.is_finite()).map(|r| r.trunc() as i64))
        }
        _ => None,
    }
}

/// Real view of a value, parsing strings.
pub(crate) fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Str(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        other => other.as_f64(),
    }
}

/// Decimal view of a value, parsing strings.
pub(crate) fn to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Decimal(d) => Some(*d),
        Value::Int(i) => Some(Decimal::from(*i)),
        Value::Long(l) => Some(Decimal::from(*l)),
        Value::Real(r) => Decimal::from_f64(*r),
        Value::Str(s) => parse_decimal(s),
        _ => None,
    }
}
