//! Aggregation functions used by `summarize`.
//!
//! Each aggregation has a default value seeded into new cells and a
//! transition that folds one input into the running value. Inputs are checked
//! with [`AggregationSpec::check`] before any cell is touched, so a bad input
//! fails the record without leaving a half-updated window behind.

use kql_parser::{Aggregation, Expr, Value};

use crate::error::{EvalError, Result};

/// Upper bound for `make_list` / `make_set` sizes.
pub const MAX_LIST_SIZE: usize = 1_048_576;

/// Default size of the legacy `makelist` / `makeset` variants.
pub const LEGACY_LIST_SIZE: usize = 128;

static AGGREGATIONS: &[&str] = &[
    "count", "sum", "min", "max", "make_list", "makelist", "make_set", "makeset",
];

pub fn is_aggregation(name: &str) -> bool {
    AGGREGATIONS.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationKind {
    Count,
    Sum,
    Min,
    Max,
    MakeList { cap: usize },
    MakeSet { cap: usize },
}

/// A compiled aggregation: output column, transition, and input expression.
#[derive(Debug, Clone)]
pub struct AggregationSpec {
    pub name: String,
    pub function: String,
    pub kind: AggregationKind,
    pub arg: Option<Expr>,
}

impl AggregationSpec {
    /// Compile a parsed aggregation. Unknown names and bad arities fail here,
    /// at query construction.
    pub fn compile(aggregation: &Aggregation) -> Result<Self> {
        let function = aggregation.function.as_str();
        let args = &aggregation.args;

        let arity = |min: usize, max: usize| -> Result<()> {
            if args.len() < min || args.len() > max {
                let expected = if min == max {
                    min.to_string()
                } else {
                    format!("{min} to {max}")
                };
                return Err(EvalError::arity(function, expected, args.len()));
            }
            Ok(())
        };

        let kind = match function {
            "count" => {
                arity(0, 0)?;
                AggregationKind::Count
            }
            "sum" | "min" | "max" => {
                arity(1, 1)?;
                match function {
                    "sum" => AggregationKind::Sum,
                    "min" => AggregationKind::Min,
                    _ => AggregationKind::Max,
                }
            }
            "make_list" | "makelist" | "make_set" | "makeset" => {
                arity(1, 2)?;
                let default = if function.contains('_') {
                    MAX_LIST_SIZE
                } else {
                    LEGACY_LIST_SIZE
                };
                let cap = match args.get(1) {
                    Some(expr) => list_cap(function, expr)?,
                    None => default,
                };
                if matches!(function, "make_list" | "makelist") {
                    AggregationKind::MakeList { cap }
                } else {
                    AggregationKind::MakeSet { cap }
                }
            }
            other => return Err(EvalError::UnknownFunction(other.to_string())),
        };

        Ok(AggregationSpec {
            name: aggregation.name.clone(),
            function: function.to_string(),
            kind,
            arg: args.first().cloned(),
        })
    }

    /// The value a freshly created cell starts with.
    pub fn default_value(&self) -> Value {
        match self.kind {
            AggregationKind::Count => Value::Long(0),
            AggregationKind::Sum | AggregationKind::Min | AggregationKind::Max => Value::Null,
            AggregationKind::MakeList { .. } | AggregationKind::MakeSet { .. } => {
                Value::List(Vec::new())
            }
        }
    }

    /// Validate an input before it is folded into any cell.
    pub fn check(&self, input: &Value) -> Result<()> {
        match self.kind {
            AggregationKind::Sum | AggregationKind::Min | AggregationKind::Max => {
                if input.is_empty_like()
                    || matches!(input, Value::Int(_) | Value::Long(_) | Value::Real(_))
                {
                    Ok(())
                } else {
                    Err(EvalError::mismatch(format!(
                        "{}() expects a numeric input, got {} '{input}'",
                        self.function,
                        input.type_name()
                    )))
                }
            }
            _ => Ok(()),
        }
    }

    /// Fold one checked input into the running value.
    pub fn add(&self, input: Value, acc: &mut Value) {
        match self.kind {
            AggregationKind::Count => {
                if let Value::Long(n) = acc {
                    *n += 1;
                }
            }
            AggregationKind::Sum | AggregationKind::Min | AggregationKind::Max => {
                fold_numeric(self.kind, acc, &input)
            }
            AggregationKind::MakeList { cap } => {
                if let Value::List(items) = acc
                    && !matches!(input, Value::Null)
                    && items.len() < cap
                {
                    items.push(input);
                }
            }
            AggregationKind::MakeSet { cap } => {
                if let Value::List(items) = acc
                    && !matches!(input, Value::Null)
                    && items.len() < cap
                    && !items.contains(&input)
                {
                    items.push(input);
                }
            }
        }
    }
}

fn list_cap(function: &str, expr: &Expr) -> Result<usize> {
    let cap = match expr {
        Expr::Const(value) => value.as_i64(),
        _ => None,
    };
    match cap {
        Some(n) if n > 0 => Ok((n as u64).min(MAX_LIST_SIZE as u64) as usize),
        _ => Err(EvalError::InvalidArgument(format!(
            "{function}: size limit must be a positive integer constant, got {expr}"
        ))),
    }
}

fn fold_numeric(kind: AggregationKind, acc: &mut Value, input: &Value) {
    if input.is_empty_like() {
        return;
    }

    let next = match (&*acc, input) {
        (Value::Null, Value::Int(i)) => Value::Long(i64::from(*i)),
        (Value::Null, v) => v.clone(),
        (Value::Long(a), Value::Int(_) | Value::Long(_)) => {
            let (a, b) = (*a, input.as_i64().unwrap_or_default());
            match kind {
                AggregationKind::Sum => a
                    .checked_add(b)
                    .map_or_else(|| Value::Real(a as f64 + b as f64), Value::Long),
                AggregationKind::Min => Value::Long(a.min(b)),
                _ => Value::Long(a.max(b)),
            }
        }
        (a, b) => {
            let (a, b) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
            Value::Real(match kind {
                AggregationKind::Sum => a + b,
                AggregationKind::Min => a.min(b),
                _ => a.max(b),
            })
        }
    };
    *acc = next;
}
