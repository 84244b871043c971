//! Built-in scalar functions.
//!
//! Every built-in is a plain `fn(&[Value]) -> Result<Value>` over already
//! evaluated arguments, registered in one static table. Functions that need
//! lazy evaluation (`iif`, `case`) or see the raw argument expressions
//! (`typeof`) are special forms handled by the evaluator instead.

pub mod conversion;
pub mod datetime;
pub mod dynamic;
pub mod network;
pub mod string;

use std::collections::HashMap;
use std::sync::LazyLock;

use kql_parser::Value;

use crate::error::{EvalError, Result};
use crate::operators;

/// Signature shared by all built-in scalar functions.
pub type BuiltinFn = fn(&[Value]) -> Result<Value>;

static BUILTINS: &[(&str, BuiltinFn)] = &[
    // string
    ("strcat", string::strcat),
    ("strcat_delim", string::strcat_delim),
    ("strlen", string::strlen),
    ("substring", string::substring),
    ("split", string::split),
    ("replace", string::replace),
    ("extract", string::extract),
    ("indexof", string::indexof),
    ("indexof_regex", string::indexof_regex),
    ("tolower", string::tolower),
    ("toupper", string::toupper),
    ("reverse", string::reverse),
    ("trim", string::trim),
    ("trim_start", string::trim_start),
    ("trim_end", string::trim_end),
    ("hash_sha256", string::hash_sha256),
    // conversion
    ("tostring", conversion::tostring),
    ("tobool", conversion::tobool),
    ("toboolean", conversion::tobool),
    ("bool", conversion::tobool),
    ("toint", conversion::toint),
    ("int", conversion::toint),
    ("tolong", conversion::tolong),
    ("long", conversion::tolong),
    ("toreal", conversion::toreal),
    ("todouble", conversion::toreal),
    ("real", conversion::toreal),
    ("double", conversion::toreal),
    ("todecimal", conversion::todecimal),
    ("decimal", conversion::todecimal),
    ("todatetime", conversion::todatetime),
    ("datetime", conversion::todatetime),
    ("totimespan", conversion::totimespan),
    ("timespan", conversion::totimespan),
    ("time", conversion::totimespan),
    ("toguid", conversion::toguid),
    ("guid", conversion::toguid),
    // datetime
    ("ago", datetime::ago),
    ("now", datetime::now),
    ("datepart", datetime::datepart),
    ("format_datetime", datetime::format_datetime),
    ("bin", datetime::bin),
    ("floor", datetime::bin),
    // network
    ("parse_ipv4", network::parse_ipv4),
    ("ipv4_fromnumber", network::ipv4_fromnumber),
    ("InSubnet", network::in_subnet),
    ("IpAddressInRange", network::ip_address_in_range),
    // dynamic
    ("pack", dynamic::pack),
    ("pack_array", dynamic::pack_array),
    ("packarray", dynamic::pack_array),
    ("bag_unpack", dynamic::bag_unpack),
    ("array_length", dynamic::array_length),
    ("isempty", dynamic::isempty),
    ("isnotempty", dynamic::isnotempty),
    ("isnull", dynamic::isnull),
    ("isnotnull", dynamic::isnotnull),
    ("not", dynamic::not),
    ("coalesce", dynamic::coalesce),
    ("throw", dynamic::throw),
];

static TABLE: LazyLock<HashMap<&'static str, BuiltinFn>> =
    LazyLock::new(|| BUILTINS.iter().copied().collect());

/// Look up a built-in by its exact name.
pub fn builtin(name: &str) -> Option<BuiltinFn> {
    TABLE.get(name).copied()
}

/// All built-in names, in table order.
pub fn builtin_names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|(name, _)| *name)
}

// =============================================================================
// Argument helpers
// =============================================================================

pub(crate) fn expect_args(function: &str, args: &[Value], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("at least {min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(EvalError::arity(function, expected, args.len()));
    }
    Ok(())
}

/// An argument that must be readable as an integer.
pub(crate) fn int_arg(function: &str, value: &Value) -> Result<i64> {
    operators::to_i64(value).ok_or_else(|| {
        EvalError::InvalidArgument(format!(
            "{function}: expected an integer, got {} '{value}'",
            value.type_name()
        ))
    })
}
