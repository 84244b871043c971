//! String functions. Arguments are rendered with `Display`, so a missing field
//! (the empty string) and null both read as `""`. Positions count characters,
//! not bytes.

use sha2::{Digest, Sha256};

use kql_parser::Value;

use super::{conversion, expect_args, int_arg};
use crate::error::{EvalError, Result};
use crate::operators::cached_regex;

pub fn strcat(args: &[Value]) -> Result<Value> {
    expect_args("strcat", args, 1, 64)?;
    Ok(Value::Str(args.iter().map(Value::to_string).collect()))
}

/// `strcat_delim(delimiter, a, b, ...)`
pub fn strcat_delim(args: &[Value]) -> Result<Value> {
    expect_args("strcat_delim", args, 3, 65)?;
    let delimiter = args[0].to_string();
    let parts: Vec<String> = args[1..].iter().map(Value::to_string).collect();
    Ok(Value::Str(parts.join(&delimiter)))
}

pub fn strlen(args: &[Value]) -> Result<Value> {
    expect_args("strlen", args, 1, 1)?;
    Ok(Value::Long(args[0].to_string().chars().count() as i64))
}

/// `substring(text, start[, length])`. Out-of-range positions yield `""`.
pub fn substring(args: &[Value]) -> Result<Value> {
    expect_args("substring", args, 2, 3)?;
    let chars: Vec<char> = args[0].to_string().chars().collect();
    let start = int_arg("substring", &args[1])?;
    let length = match args.get(2) {
        Some(v) => Some(int_arg("substring", v)?),
        None => None,
    };

    if start < 0 || start as usize >= chars.len() {
        return Ok(Value::from(""));
    }
    let start = start as usize;
    let end = match length {
        Some(len) if len < 0 => return Ok(Value::from("")),
        Some(len) => start.saturating_add(len as usize).min(chars.len()),
        None => chars.len(),
    };
    Ok(Value::Str(chars[start..end].iter().collect()))
}

/// `split(text, delimiter[, index])`. With an index, the result is a list
/// holding that one part, or an empty list when the index is out of range.
pub fn split(args: &[Value]) -> Result<Value> {
    expect_args("split", args, 2, 3)?;
    let text = args[0].to_string();
    let delimiter = args[1].to_string();
    if delimiter.is_empty() {
        return Err(EvalError::InvalidArgument(
            "split: delimiter must not be empty".to_string(),
        ));
    }

    let parts: Vec<Value> = text.split(delimiter.as_str()).map(Value::from).collect();
    let Some(index) = args.get(2) else {
        return Ok(Value::List(parts));
    };
    let index = int_arg("split", index)?;
    let picked = usize::try_from(index)
        .ok()
        .and_then(|i| parts.get(i).cloned())
        .into_iter()
        .collect();
    Ok(Value::List(picked))
}

/// `replace(regex, rewrite, text)`. The rewrite may reference groups as `$1`.
pub fn replace(args: &[Value]) -> Result<Value> {
    expect_args("replace", args, 3, 3)?;
    let re = cached_regex(&args[0].to_string())?;
    let rewrite = args[1].to_string();
    let text = args[2].to_string();
    Ok(Value::Str(re.replace_all(&text, rewrite.as_str()).into_owned()))
}

/// `extract(regex, group, text[, type])`. No match yields `""`; a capture
/// that does not convert to the requested type yields null.
pub fn extract(args: &[Value]) -> Result<Value> {
    expect_args("extract", args, 3, 4)?;
    let re = cached_regex(&args[0].to_string())?;
    let group = int_arg("extract", &args[1])?;
    let text = args[2].to_string();

    let captured = usize::try_from(group)
        .ok()
        .and_then(|g| re.captures(&text)?.get(g).map(|m| m.as_str().to_string()))
        .unwrap_or_default();

    match args.get(3) {
        None => Ok(Value::Str(captured)),
        Some(type_name) if captured.is_empty() => {
            conversion::check_type_name(&type_name.to_string())?;
            Ok(Value::from(""))
        }
        Some(type_name) => conversion::cast_named(&type_name.to_string(), &captured),
    }
}

/// `indexof(text, lookup[, start[, length[, occurrence]]])`. Returns -1
/// when the lookup does not occur in the searched range.
pub fn indexof(args: &[Value]) -> Result<Value> {
    expect_args("indexof", args, 2, 5)?;
    let chars: Vec<char> = args[0].to_string().chars().collect();
    let lookup: Vec<char> = args[1].to_string().chars().collect();
    let Some((start, end, occurrence)) = search_range("indexof", args, chars.len())? else {
        return Ok(Value::Long(-1));
    };

    let mut seen = 0;
    let last = end.saturating_sub(lookup.len());
    for i in start..=last {
        if i + lookup.len() <= end && chars[i..i + lookup.len()] == lookup[..] {
            seen += 1;
            if seen == occurrence {
                return Ok(Value::Long(i as i64));
            }
        }
    }
    Ok(Value::Long(-1))
}

/// `indexof_regex(text, regex[, start[, length[, occurrence]]])`
pub fn indexof_regex(args: &[Value]) -> Result<Value> {
    expect_args("indexof_regex", args, 2, 5)?;
    let chars: Vec<char> = args[0].to_string().chars().collect();
    let re = cached_regex(&args[1].to_string())?;
    let Some((start, end, occurrence)) = search_range("indexof_regex", args, chars.len())? else {
        return Ok(Value::Long(-1));
    };

    let window: String = chars[start..end].iter().collect();
    let found = re.find_iter(&window).nth(occurrence - 1).map(|m| {
        let offset = window[..m.start()].chars().count();
        (start + offset) as i64
    });
    Ok(Value::Long(found.unwrap_or(-1)))
}

/// Resolve the optional `start`, `length` and `occurrence` arguments into a
/// char range. `None` means nothing can match.
fn search_range(
    function: &str,
    args: &[Value],
    len: usize,
) -> Result<Option<(usize, usize, usize)>> {
    let start = match args.get(2) {
        Some(v) => int_arg(function, v)?,
        None => 0,
    };
    let length = match args.get(3) {
        Some(v) => int_arg(function, v)?,
        None => -1,
    };
    let occurrence = match args.get(4) {
        Some(v) => int_arg(function, v)?,
        None => 1,
    };

    if start < 0 || start as usize > len || length < -1 || occurrence < 1 {
        return Ok(None);
    }
    let start = start as usize;
    let end = if length == -1 {
        len
    } else {
        start.saturating_add(length as usize).min(len)
    };
    Ok(Some((start, end, occurrence as usize)))
}

pub fn tolower(args: &[Value]) -> Result<Value> {
    expect_args("tolower", args, 1, 1)?;
    Ok(Value::Str(args[0].to_string().to_lowercase()))
}

pub fn toupper(args: &[Value]) -> Result<Value> {
    expect_args("toupper", args, 1, 1)?;
    Ok(Value::Str(args[0].to_string().to_uppercase()))
}

pub fn reverse(args: &[Value]) -> Result<Value> {
    expect_args("reverse", args, 1, 1)?;
    Ok(Value::Str(args[0].to_string().chars().rev().collect()))
}

/// `trim(regex, text)`: strip one leading and one trailing match.
pub fn trim(args: &[Value]) -> Result<Value> {
    expect_args("trim", args, 2, 2)?;
    let pattern = args[0].to_string();
    let text = args[1].to_string();
    let trimmed = trim_end_matching(&pattern, &text)?;
    Ok(Value::Str(trim_start_matching(&pattern, &trimmed)?))
}

pub fn trim_start(args: &[Value]) -> Result<Value> {
    expect_args("trim_start", args, 2, 2)?;
    Ok(Value::Str(trim_start_matching(
        &args[0].to_string(),
        &args[1].to_string(),
    )?))
}

pub fn trim_end(args: &[Value]) -> Result<Value> {
    expect_args("trim_end", args, 2, 2)?;
    Ok(Value::Str(trim_end_matching(
        &args[0].to_string(),
        &args[1].to_string(),
    )?))
}

fn trim_start_matching(pattern: &str, text: &str) -> Result<String> {
    let re = cached_regex(&format!("^(?:{pattern})"))?;
    Ok(match re.find(text) {
        Some(m) => text[m.end()..].to_string(),
        None => text.to_string(),
    })
}

fn trim_end_matching(pattern: &str, text: &str) -> Result<String> {
    let re = cached_regex(&format!("(?:{pattern})$"))?;
    Ok(match re.find(text) {
        Some(m) => text[..m.start()].to_string(),
        None => text.to_string(),
    })
}

/// Hex-encoded SHA-256 of the UTF-8 text. Empty input yields `""`.
pub fn hash_sha256(args: &[Value]) -> Result<Value> {
    expect_args("hash_sha256", args, 1, 1)?;
    let text = args[0].to_string();
    if text.is_empty() {
        return Ok(Value::from(""));
    }
    Ok(Value::Str(format!("{:x}", Sha256::digest(text.as_bytes()))))
}
