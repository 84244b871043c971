//! Dynamic values and predicates: `pack`, `pack_array`, `bag_unpack`,
//! `array_length`, the `is*` family, `coalesce`, `not` and `throw`.

use kql_parser::{Record, Value};

use super::expect_args;
use crate::error::{EvalError, Result};
use crate::operators::truthy;

/// `pack(name1, value1, name2, value2, ...)`
pub fn pack(args: &[Value]) -> Result<Value> {
    expect_args("pack", args, 2, usize::MAX)?;
    if args.len() % 2 != 0 {
        return Err(EvalError::InvalidArgument(
            "pack expects alternating name/value pairs".to_string(),
        ));
    }
    let record: Record = args
        .chunks_exact(2)
        .map(|pair| (pair[0].to_string(), pair[1].clone()))
        .collect();
    Ok(Value::Record(record))
}

pub fn pack_array(args: &[Value]) -> Result<Value> {
    Ok(Value::List(args.to_vec()))
}

/// `bag_unpack(bag[, prefix])`: the bag's fields, with the prefix prepended
/// to each name. The `evaluate` stage merges the result into the record.
pub fn bag_unpack(args: &[Value]) -> Result<Value> {
    expect_args("bag_unpack", args, 1, 2)?;
    let Value::Record(bag) = &args[0] else {
        return Err(EvalError::mismatch(format!(
            "bag_unpack expects a property bag, got {} '{}'",
            args[0].type_name(),
            args[0]
        )));
    };
    let prefix = args
        .get(1)
        .map(|p| p.to_string().trim_matches(|c| c == '"' || c == '\'').to_string())
        .unwrap_or_default();

    let unpacked: Record = bag
        .iter()
        .map(|(name, value)| (format!("{prefix}{name}"), value.clone()))
        .collect();
    Ok(Value::Record(unpacked))
}

/// Number of elements in a list or keys in a bag; -1 for anything else.
pub fn array_length(args: &[Value]) -> Result<Value> {
    expect_args("array_length", args, 1, 1)?;
    Ok(Value::Long(match &args[0] {
        Value::List(items) => items.len() as i64,
        Value::Record(fields) => fields.len() as i64,
        _ => -1,
    }))
}

pub fn isempty(args: &[Value]) -> Result<Value> {
    expect_args("isempty", args, 1, 1)?;
    Ok(Value::Bool(args[0].is_empty_like()))
}

pub fn isnotempty(args: &[Value]) -> Result<Value> {
    expect_args("isnotempty", args, 1, 1)?;
    Ok(Value::Bool(!args[0].is_empty_like()))
}

/// Null, or a string of only whitespace.
pub fn isnull(args: &[Value]) -> Result<Value> {
    expect_args("isnull", args, 1, 1)?;
    Ok(Value::Bool(is_null(&args[0])))
}

pub fn isnotnull(args: &[Value]) -> Result<Value> {
    expect_args("isnotnull", args, 1, 1)?;
    Ok(Value::Bool(!is_null(&args[0])))
}

fn is_null(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Str(s) => s.trim().is_empty(),
        _ => false,
    }
}

pub fn not(args: &[Value]) -> Result<Value> {
    expect_args("not", args, 1, 1)?;
    Ok(Value::Bool(!truthy(&args[0])?))
}

/// First argument that is neither null nor the empty string.
pub fn coalesce(args: &[Value]) -> Result<Value> {
    expect_args("coalesce", args, 1, 64)?;
    Ok(args
        .iter()
        .find(|v| !v.is_empty_like())
        .cloned()
        .unwrap_or(Value::Null))
}

/// `throw([message])`: always fails with [`EvalError::FunctionThrow`].
pub fn throw(args: &[Value]) -> Result<Value> {
    expect_args("throw", args, 0, 1)?;
    let message = match args.first() {
        Some(v) if !v.is_empty_like() => v.to_string(),
        _ => "exception from throw()".to_string(),
    };
    Err(EvalError::FunctionThrow(message))
}
