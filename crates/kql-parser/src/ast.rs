//! AST types for KQL pipelines: expressions, stages, queries and
//! user-defined functions.
//!
//! Every node implements [`fmt::Display`] producing KQL text that parses back
//! into an equal node. Binary operators are always parenthesized so the
//! rendered text does not depend on precedence.

use std::fmt;

use chrono::TimeDelta;
use serde::{Serialize, Serializer};

use crate::value::{Value, format_timespan, timespan_literal};

// =============================================================================
// Operators
// =============================================================================

/// Binary operators, from arithmetic to string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    /// `=~`
    EqCi,
    /// `!~`
    NotEqCi,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Contains,
    NotContains,
    ContainsCs,
    NotContainsCs,
    Has,
    NotHas,
    HasCs,
    NotHasCs,
    StartsWith,
    NotStartsWith,
    StartsWithCs,
    NotStartsWithCs,
    EndsWith,
    NotEndsWith,
    EndsWithCs,
    NotEndsWithCs,
    MatchesRegex,
}

impl BinaryOp {
    /// The operator token as written in query text.
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::EqCi => "=~",
            BinaryOp::NotEqCi => "!~",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Contains => "contains",
            BinaryOp::NotContains => "!contains",
            BinaryOp::ContainsCs => "contains_cs",
            BinaryOp::NotContainsCs => "!contains_cs",
            BinaryOp::Has => "has",
            BinaryOp::NotHas => "!has",
            BinaryOp::HasCs => "has_cs",
            BinaryOp::NotHasCs => "!has_cs",
            BinaryOp::StartsWith => "startswith",
            BinaryOp::NotStartsWith => "!startswith",
            BinaryOp::StartsWithCs => "startswith_cs",
            BinaryOp::NotStartsWithCs => "!startswith_cs",
            BinaryOp::EndsWith => "endswith",
            BinaryOp::NotEndsWith => "!endswith",
            BinaryOp::EndsWithCs => "endswith_cs",
            BinaryOp::NotEndsWithCs => "!endswith_cs",
            BinaryOp::MatchesRegex => "matches regex",
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Expressions
// =============================================================================

/// A scalar expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    /// A literal value.
    Const(Value),
    /// A top-level field of the current record.
    Property(String),
    /// `base.selector` or `base['selector']`.
    Path { base: Box<Expr>, selector: String },
    /// `base[index]` where `index` is evaluated at runtime.
    Index { base: Box<Expr>, index: Box<Expr> },
    /// `name(args...)`, resolved through the function registry at evaluation.
    Call { name: String, args: Vec<Expr> },
    /// `not expr`
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `value between (low .. high)`, inclusive on both ends.
    Between {
        value: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    /// `value in (a, b, ...)` and its `in~` / `!in` / `!in~` variants.
    In {
        value: Box<Expr>,
        candidates: Vec<Expr>,
        case_insensitive: bool,
        negated: bool,
    },
}

impl Expr {
    pub fn property(name: impl Into<String>) -> Self {
        Expr::Property(name.into())
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        Expr::Const(value.into())
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            name: name.into(),
            args,
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// The column name a bare expression contributes to `project`:
    /// properties keep their name, paths join segments with `_`.
    pub fn implicit_name(&self) -> Option<String> {
        match self {
            Expr::Property(name) => Some(name.clone()),
            Expr::Path { base, selector } => {
                base.implicit_name().map(|b| format!("{b}_{selector}"))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(value) => fmt_literal(value, f),
            Expr::Property(name) => fmt_name(name, f),
            Expr::Path { base, selector } => {
                if is_plain_identifier(selector) {
                    write!(f, "{base}.{selector}")
                } else {
                    write!(f, "{base}[{}]", quote_string(selector))
                }
            }
            Expr::Index { base, index } => write!(f, "{base}[{index}]"),
            Expr::Call { name, args } => {
                write!(f, "{name}(")?;
                fmt_list(args, f)?;
                write!(f, ")")
            }
            Expr::Not(inner) => write!(f, "not({inner})"),
            Expr::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::Between {
                value,
                low,
                high,
                negated,
            } => {
                let kw = if *negated { "!between" } else { "between" };
                write!(f, "({value} {kw} ({low} .. {high}))")
            }
            Expr::In {
                value,
                candidates,
                case_insensitive,
                negated,
            } => {
                let kw = match (*negated, *case_insensitive) {
                    (false, false) => "in",
                    (false, true) => "in~",
                    (true, false) => "!in",
                    (true, true) => "!in~",
                };
                write!(f, "({value} {kw} (")?;
                fmt_list(candidates, f)?;
                write!(f, "))")
            }
        }
    }
}

fn fmt_list(items: &[Expr], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn fmt_literal(value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Value::Null => write!(f, "dynamic(null)"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::Int(i) => write!(f, "{i}"),
        Value::Long(l) => {
            if i32::try_from(*l).is_ok() {
                write!(f, "long({l})")
            } else {
                write!(f, "{l}")
            }
        }
        Value::Real(r) if r.is_finite() => write!(f, "{r:?}"),
        Value::Real(r) => write!(f, "real({r})"),
        Value::Decimal(d) => write!(f, "decimal({d})"),
        Value::DateTime(_) => write!(f, "datetime({value})"),
        Value::TimeSpan(ts) if *ts >= TimeDelta::zero() => write!(f, "{}", timespan_literal(*ts)),
        Value::TimeSpan(ts) => write!(f, "timespan({})", format_timespan(*ts)),
        Value::Guid(g) => write!(f, "guid({g})"),
        Value::Str(s) => f.write_str(&quote_string(s)),
        Value::Record(_) | Value::List(_) => write!(f, "dynamic({value})"),
    }
}

fn fmt_name(name: &str, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if is_plain_identifier(name) {
        f.write_str(name)
    } else {
        write!(f, "[{}]", quote_string(name))
    }
}

/// Quote a string as a double-quoted KQL literal.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Words that cannot be written as bare column names.
const RESERVED: &[&str] = &[
    "and", "or", "not", "by", "true", "false", "between", "in", "contains", "contains_cs",
    "has", "has_cs", "startswith", "startswith_cs", "endswith", "endswith_cs", "matches",
];

/// `true` when `name` can be written without `['...']` brackets.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '@' || c == '$');
    first_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !RESERVED.contains(&name)
}

// =============================================================================
// Stages
// =============================================================================

/// `name = expr`, as used by `extend`, `project` and summarize `by` clauses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedExpr {
    pub name: String,
    pub expr: Expr,
}

impl NamedExpr {
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        NamedExpr {
            name: name.into(),
            expr,
        }
    }
}

impl fmt::Display for NamedExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_name(&self.name, f)?;
        write!(f, " = {}", self.expr)
    }
}

/// One aggregation in a `summarize` stage: `name = function(args)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregation {
    /// Output column. Defaults to the function name when not assigned.
    pub name: String,
    pub function: String,
    pub args: Vec<Expr>,
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_name(&self.name, f)?;
        write!(f, " = {}(", self.function)?;
        fmt_list(&self.args, f)?;
        write!(f, ")")
    }
}

/// The time-window dimension of a `summarize`: `bin(source, duration)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinSpec {
    /// Output column carrying the window start.
    pub name: String,
    pub source: Expr,
    #[serde(serialize_with = "serialize_timespan")]
    pub duration: TimeDelta,
}

fn serialize_timespan<S: Serializer>(ts: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timespan(*ts))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summarize {
    pub aggregations: Vec<Aggregation>,
    /// Discrete group-by dimensions, in declaration order.
    pub group_by: Vec<NamedExpr>,
    pub bin: Option<BinSpec>,
}

impl fmt::Display for Summarize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "summarize ")?;
        for (i, agg) in self.aggregations.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{agg}")?;
        }
        if self.group_by.is_empty() && self.bin.is_none() {
            return Ok(());
        }
        write!(f, " by ")?;
        for (i, group) in self.group_by.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{group}")?;
        }
        if let Some(bin) = &self.bin {
            if !self.group_by.is_empty() {
                write!(f, ", ")?;
            }
            fmt_name(&bin.name, f)?;
            write!(
                f,
                " = bin({}, {})",
                bin.source,
                Expr::Const(Value::TimeSpan(bin.duration))
            )?;
        }
        Ok(())
    }
}

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Stage {
    Where(Expr),
    Extend(Vec<NamedExpr>),
    Project(Vec<NamedExpr>),
    ProjectAway(Vec<String>),
    ProjectKeep(Vec<String>),
    /// `evaluate fn(args)`. The expression is always an [`Expr::Call`].
    Evaluate(Expr),
    Summarize(Summarize),
    /// `take N` / `limit N`
    Take(u64),
}

impl Stage {
    /// The stage keyword, for diagnostics.
    pub fn keyword(&self) -> &'static str {
        match self {
            Stage::Where(_) => "where",
            Stage::Extend(_) => "extend",
            Stage::Project(_) => "project",
            Stage::ProjectAway(_) => "project-away",
            Stage::ProjectKeep(_) => "project-keep",
            Stage::Evaluate(_) => "evaluate",
            Stage::Summarize(_) => "summarize",
            Stage::Take(_) => "take",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Where(expr) => write!(f, "where {expr}"),
            Stage::Extend(columns) | Stage::Project(columns) => {
                write!(f, "{} ", self.keyword())?;
                for (i, column) in columns.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{column}")?;
                }
                Ok(())
            }
            Stage::ProjectAway(names) | Stage::ProjectKeep(names) => {
                write!(f, "{} ", self.keyword())?;
                for (i, name) in names.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    fmt_name(name, f)?;
                }
                Ok(())
            }
            Stage::Evaluate(call) => write!(f, "evaluate {call}"),
            Stage::Summarize(summarize) => write!(f, "{summarize}"),
            Stage::Take(n) => write!(f, "take {n}"),
        }
    }
}

// =============================================================================
// Queries and functions
// =============================================================================

/// A parsed pipeline: `Source | stage | stage ...`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    /// Text before the first `|`. Identifies a conceptual source; never resolved.
    pub source: Option<String>,
    pub stages: Vec<Stage>,
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, "{source}")?;
        }
        for stage in &self.stages {
            write!(f, " | {stage}")?;
        }
        Ok(())
    }
}

/// A declared parameter of a user-defined function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameter {
    pub name: String,
    /// Declared type. Metadata only; not checked at call time.
    pub type_name: String,
}

/// `.create-or-alter function Name(arg: type, ...) { body }`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserFunction {
    pub name: String,
    pub params: Vec<Parameter>,
    pub body: Expr,
    /// `//` comment lines preceding the declaration in a query file.
    pub comment: String,
}

impl fmt::Display for UserFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".create-or-alter function {}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", param.name, param.type_name)?;
        }
        write!(f, ") {{ {} }}", self.body)
    }
}
