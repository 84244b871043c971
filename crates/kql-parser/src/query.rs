//! Query pipeline parser using pest PEG grammar + Pratt parser.
//!
//! Parses pipelines like:
//! - `"SecurityEvent | where EventID == 4625 | project Account, Computer"`
//! - `"T | extend Host = tolower(Computer) | summarize count() by Host, bin(Time, 1m)"`
//! - `"| where Message contains \"error\" and Level in (1, 2)"`
//!
//! and single expressions and `.create-or-alter function` declarations.

use pest::Parser;
use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest_derive::Parser;
use uuid::Uuid;

use crate::ast::{
    Aggregation, BinSpec, BinaryOp, Expr, NamedExpr, Parameter, Query, Stage, Summarize,
    UserFunction,
};
use crate::error::{KqlParserError, Result};
use crate::value::{
    Value, parse_datetime, parse_decimal, parse_timespan, parse_timespan_literal,
};

// ---------------------------------------------------------------------------
// Pest parser (generated from kql.pest grammar)
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[grammar = "src/kql.pest"]
struct KqlGrammar;

fn pratt_parser() -> PrattParser<Rule> {
    PrattParser::new()
        .op(Op::infix(Rule::or_op, Assoc::Left))
        .op(Op::infix(Rule::and_op, Assoc::Left))
        .op(Op::infix(Rule::eq_op, Assoc::Left)
            | Op::infix(Rule::eq_ci_op, Assoc::Left)
            | Op::infix(Rule::neq_op, Assoc::Left)
            | Op::infix(Rule::neq_ci_op, Assoc::Left)
            | Op::infix(Rule::contains_op, Assoc::Left)
            | Op::infix(Rule::not_contains_op, Assoc::Left)
            | Op::infix(Rule::contains_cs_op, Assoc::Left)
            | Op::infix(Rule::not_contains_cs_op, Assoc::Left)
            | Op::infix(Rule::has_op, Assoc::Left)
            | Op::infix(Rule::not_has_op, Assoc::Left)
            | Op::infix(Rule::has_cs_op, Assoc::Left)
            | Op::infix(Rule::not_has_cs_op, Assoc::Left)
            | Op::infix(Rule::startswith_op, Assoc::Left)
            | Op::infix(Rule::not_startswith_op, Assoc::Left)
            | Op::infix(Rule::startswith_cs_op, Assoc::Left)
            | Op::infix(Rule::not_startswith_cs_op, Assoc::Left)
            | Op::infix(Rule::endswith_op, Assoc::Left)
            | Op::infix(Rule::not_endswith_op, Assoc::Left)
            | Op::infix(Rule::endswith_cs_op, Assoc::Left)
            | Op::infix(Rule::not_endswith_cs_op, Assoc::Left)
            | Op::infix(Rule::matches_regex_op, Assoc::Left)
            | Op::postfix(Rule::between_op)
            | Op::postfix(Rule::not_between_op)
            | Op::postfix(Rule::in_op)
            | Op::postfix(Rule::in_ci_op)
            | Op::postfix(Rule::not_in_op)
            | Op::postfix(Rule::not_in_ci_op))
        .op(Op::infix(Rule::lt_op, Assoc::Left)
            | Op::infix(Rule::le_op, Assoc::Left)
            | Op::infix(Rule::gt_op, Assoc::Left)
            | Op::infix(Rule::ge_op, Assoc::Left))
        .op(Op::infix(Rule::add_op, Assoc::Left) | Op::infix(Rule::sub_op, Assoc::Left))
        .op(Op::infix(Rule::mul_op, Assoc::Left)
            | Op::infix(Rule::div_op, Assoc::Left)
            | Op::infix(Rule::mod_op, Assoc::Left))
        .op(Op::prefix(Rule::not_op) | Op::prefix(Rule::neg_op))
        .op(Op::postfix(Rule::path_op) | Op::postfix(Rule::index_op))
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse a pipeline `Source | stage | stage ...` into a [`Query`].
///
/// The source before the first `|` is optional and kept verbatim.
///
/// # Examples
///
/// ```
/// use kql_parser::parse_query;
///
/// let query = parse_query("Events | where Level > 2 | project Message").unwrap();
/// assert_eq!(query.stages.len(), 2);
/// ```
pub fn parse_query(input: &str) -> Result<Query> {
    let mut pairs = KqlGrammar::parse(Rule::query, input).map_err(|e| pest_error(input, &e))?;
    let pratt = pratt_parser();
    let query = next_pair(&mut pairs, "query").and_then(|pair| build_query(pair, &pratt));
    query.map_err(|e| e.for_query(input))
}

/// Parse a single scalar expression.
pub fn parse_expression(input: &str) -> Result<Expr> {
    let pratt = pratt_parser();
    parse_expression_with(input, &pratt).map_err(|e| e.for_query(input))
}

/// Parse a `.create-or-alter function Name(a: type, ...) { body }` declaration.
pub fn parse_function_definition(input: &str) -> Result<UserFunction> {
    let mut pairs = KqlGrammar::parse(Rule::function_def, input.trim())
        .map_err(|e| KqlParserError::InvalidFunctionDefinition(pest_diagnostic(&e)))?;
    let pratt = pratt_parser();
    let pair = next_pair(&mut pairs, "function definition")?;

    let mut name = None;
    let mut params = Vec::new();
    let mut body = None;
    for child in pair.into_inner() {
        match child.as_rule() {
            Rule::ident => name = Some(child.as_str().to_string()),
            Rule::param => {
                let mut inner = child.into_inner();
                let param_name = next_pair(&mut inner, "parameter name")?;
                let type_name = next_pair(&mut inner, "parameter type")?;
                params.push(Parameter {
                    name: param_name.as_str().to_string(),
                    type_name: type_name.as_str().to_string(),
                });
            }
            Rule::expr => body = Some(parse_expr(child, &pratt)?),
            _ => {}
        }
    }

    let name = name.ok_or_else(|| {
        KqlParserError::InvalidFunctionDefinition("missing function name".to_string())
    })?;
    let body = body.ok_or_else(|| {
        KqlParserError::InvalidFunctionDefinition(format!("function '{name}' has no body"))
    })?;

    Ok(UserFunction {
        name,
        params,
        body,
        comment: String::new(),
    })
}

// ---------------------------------------------------------------------------
// Internal parsing helpers
// ---------------------------------------------------------------------------

fn pest_diagnostic(err: &pest::error::Error<Rule>) -> String {
    let (line, col) = match err.line_col {
        LineColLocation::Pos(pos) => pos,
        LineColLocation::Span(start, _) => start,
    };
    format!("({line}:{col}): {}", err.variant.message())
}

fn pest_error(input: &str, err: &pest::error::Error<Rule>) -> KqlParserError {
    KqlParserError::QueryParsing {
        query: input.to_string(),
        diagnostics: vec![pest_diagnostic(err)],
    }
}

fn next_pair<'i>(
    pairs: &mut impl Iterator<Item = Pair<'i, Rule>>,
    what: &str,
) -> Result<Pair<'i, Rule>> {
    pairs
        .next()
        .ok_or_else(|| KqlParserError::Syntax(format!("expected {what}")))
}

fn parse_expression_with(input: &str, pratt: &PrattParser<Rule>) -> Result<Expr> {
    let mut pairs =
        KqlGrammar::parse(Rule::expression, input).map_err(|e| pest_error(input, &e))?;
    let expression = next_pair(&mut pairs, "expression")?;
    let expr = expression
        .into_inner()
        .find(|p| p.as_rule() == Rule::expr)
        .ok_or_else(|| KqlParserError::Syntax("expected expression".to_string()))?;
    parse_expr(expr, pratt)
}

fn build_query(pair: Pair<'_, Rule>, pratt: &PrattParser<Rule>) -> Result<Query> {
    let mut source = None;
    let mut stages = Vec::new();

    for child in pair.into_inner() {
        match child.as_rule() {
            Rule::source => source = Some(child.as_str().trim().to_string()),
            Rule::EOI => {}
            _ => stages.push(build_stage(child, pratt)?),
        }
    }

    Ok(Query { source, stages })
}

fn build_stage(pair: Pair<'_, Rule>, pratt: &PrattParser<Rule>) -> Result<Stage> {
    let rule = pair.as_rule();
    match rule {
        Rule::where_stage => {
            let expr = first_expr(pair)?;
            Ok(Stage::Where(parse_expr(expr, pratt)?))
        }
        Rule::extend_stage => {
            let mut columns = Vec::new();
            for column in children(pair, Rule::column) {
                let (name, expr) = build_column(column, pratt)?;
                let name = name.ok_or_else(|| {
                    KqlParserError::Syntax(format!(
                        "extend requires 'name = expression', found '{expr}'"
                    ))
                })?;
                columns.push(NamedExpr::new(name, expr));
            }
            Ok(Stage::Extend(columns))
        }
        Rule::project_stage => {
            let mut columns = Vec::new();
            let mut unnamed = 0;
            for column in children(pair, Rule::column) {
                let (name, expr) = build_column(column, pratt)?;
                let name = name.or_else(|| expr.implicit_name()).unwrap_or_else(|| {
                    unnamed += 1;
                    format!("Column{unnamed}")
                });
                columns.push(NamedExpr::new(name, expr));
            }
            Ok(Stage::Project(columns))
        }
        Rule::project_away_stage | Rule::project_keep_stage => {
            let names = pair
                .into_inner()
                .filter(|p| matches!(p.as_rule(), Rule::ident | Rule::bracket_name))
                .map(build_name)
                .collect::<Result<Vec<_>>>()?;
            if rule == Rule::project_away_stage {
                Ok(Stage::ProjectAway(names))
            } else {
                Ok(Stage::ProjectKeep(names))
            }
        }
        Rule::evaluate_stage => {
            let call = children(pair, Rule::call)
                .next()
                .ok_or_else(|| KqlParserError::Syntax("evaluate requires a function call".into()))?;
            Ok(Stage::Evaluate(build_call(call, pratt)?))
        }
        Rule::summarize_stage => Ok(Stage::Summarize(build_summarize(pair, pratt)?)),
        Rule::take_stage => {
            let count = children(pair, Rule::uint)
                .next()
                .ok_or_else(|| KqlParserError::Syntax("take requires a row count".into()))?;
            let n = count
                .as_str()
                .parse::<u64>()
                .map_err(|_| KqlParserError::InvalidLiteral(count.as_str().to_string()))?;
            Ok(Stage::Take(n))
        }
        other => unreachable!("unexpected stage rule: {other:?}"),
    }
}

fn build_summarize(pair: Pair<'_, Rule>, pratt: &PrattParser<Rule>) -> Result<Summarize> {
    let mut aggregations = Vec::new();
    let mut group_by = Vec::new();
    let mut bin: Option<BinSpec> = None;
    let mut unnamed = 0;

    for child in pair.into_inner() {
        match child.as_rule() {
            Rule::aggregation => {
                let mut name = None;
                let mut call = None;
                for part in child.into_inner() {
                    match part.as_rule() {
                        Rule::call => call = Some(build_call(part, pratt)?),
                        _ => name = Some(build_name(part)?),
                    }
                }
                let Some(Expr::Call { name: function, args }) = call else {
                    return Err(KqlParserError::Syntax(
                        "aggregation must be a function call".to_string(),
                    ));
                };
                aggregations.push(Aggregation {
                    name: name.unwrap_or_else(|| function.clone()),
                    function,
                    args,
                });
            }
            Rule::by_clause => {
                for column in children(child, Rule::column) {
                    let (name, expr) = build_column(column, pratt)?;
                    if let Some((source, duration)) = as_time_bin(&expr) {
                        if bin.is_some() {
                            return Err(KqlParserError::Syntax(
                                "summarize supports at most one time bin".to_string(),
                            ));
                        }
                        if duration <= chrono::TimeDelta::zero() {
                            return Err(KqlParserError::Syntax(format!(
                                "bin duration must be positive in '{expr}'"
                            )));
                        }
                        let name = name.or_else(|| source.implicit_name()).ok_or_else(|| {
                            KqlParserError::Syntax(format!(
                                "cannot infer a column name for '{expr}'"
                            ))
                        })?;
                        bin = Some(BinSpec {
                            name,
                            source: source.clone(),
                            duration,
                        });
                    } else {
                        let name = name.or_else(|| expr.implicit_name()).unwrap_or_else(|| {
                            unnamed += 1;
                            format!("Column{unnamed}")
                        });
                        group_by.push(NamedExpr::new(name, expr));
                    }
                }
            }
            _ => {}
        }
    }

    Ok(Summarize {
        aggregations,
        group_by,
        bin,
    })
}

/// `bin(source, <timespan literal>)` in a by-clause is the time-window dimension.
/// A numeric `bin(x, 10)` stays an ordinary grouping expression.
fn as_time_bin(expr: &Expr) -> Option<(&Expr, chrono::TimeDelta)> {
    match expr {
        Expr::Call { name, args } if name.eq_ignore_ascii_case("bin") && args.len() == 2 => {
            match &args[1] {
                Expr::Const(Value::TimeSpan(duration)) => Some((&args[0], *duration)),
                _ => None,
            }
        }
        _ => None,
    }
}

fn build_column(
    pair: Pair<'_, Rule>,
    pratt: &PrattParser<Rule>,
) -> Result<(Option<String>, Expr)> {
    let mut name = None;
    let mut expr = None;
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::expr => expr = Some(parse_expr(part, pratt)?),
            _ => name = Some(build_name(part)?),
        }
    }
    let expr = expr.ok_or_else(|| KqlParserError::Syntax("expected expression".to_string()))?;
    Ok((name, expr))
}

fn build_name(pair: Pair<'_, Rule>) -> Result<String> {
    match pair.as_rule() {
        Rule::ident => Ok(pair.as_str().to_string()),
        Rule::bracket_name => {
            let literal = pair
                .into_inner()
                .next()
                .ok_or_else(|| KqlParserError::Syntax("empty bracketed name".to_string()))?;
            Ok(build_string(literal))
        }
        other => Err(KqlParserError::Syntax(format!(
            "expected a column name, found {other:?}"
        ))),
    }
}

fn build_call(pair: Pair<'_, Rule>, pratt: &PrattParser<Rule>) -> Result<Expr> {
    let mut inner = pair.into_inner();
    let name = next_pair(&mut inner, "function name")?.as_str().to_string();
    let args = inner
        .filter(|p| p.as_rule() == Rule::expr)
        .map(|p| parse_expr(p, pratt))
        .collect::<Result<Vec<_>>>()?;
    Ok(Expr::Call { name, args })
}

fn parse_expr(pair: Pair<'_, Rule>, pratt: &PrattParser<Rule>) -> Result<Expr> {
    pratt
        .map_primary(|primary| build_primary(primary, pratt))
        .map_prefix(|op, rhs| {
            let rhs = rhs?;
            match op.as_rule() {
                Rule::not_op => Ok(Expr::Not(Box::new(rhs))),
                Rule::neg_op => Ok(Expr::binary(BinaryOp::Sub, Expr::Const(Value::Int(0)), rhs)),
                other => unreachable!("unexpected prefix rule: {other:?}"),
            }
        })
        .map_postfix(|lhs, op| build_postfix(lhs?, op, pratt))
        .map_infix(|lhs, op, rhs| Ok(Expr::binary(binary_op(op.as_rule()), lhs?, rhs?)))
        .parse(pair.into_inner())
}

fn binary_op(rule: Rule) -> BinaryOp {
    match rule {
        Rule::or_op => BinaryOp::Or,
        Rule::and_op => BinaryOp::And,
        Rule::eq_op => BinaryOp::Eq,
        Rule::eq_ci_op => BinaryOp::EqCi,
        Rule::neq_op => BinaryOp::NotEq,
        Rule::neq_ci_op => BinaryOp::NotEqCi,
        Rule::contains_op => BinaryOp::Contains,
        Rule::not_contains_op => BinaryOp::NotContains,
        Rule::contains_cs_op => BinaryOp::ContainsCs,
        Rule::not_contains_cs_op => BinaryOp::NotContainsCs,
        Rule::has_op => BinaryOp::Has,
        Rule::not_has_op => BinaryOp::NotHas,
        Rule::has_cs_op => BinaryOp::HasCs,
        Rule::not_has_cs_op => BinaryOp::NotHasCs,
        Rule::startswith_op => BinaryOp::StartsWith,
        Rule::not_startswith_op => BinaryOp::NotStartsWith,
        Rule::startswith_cs_op => BinaryOp::StartsWithCs,
        Rule::not_startswith_cs_op => BinaryOp::NotStartsWithCs,
        Rule::endswith_op => BinaryOp::EndsWith,
        Rule::not_endswith_op => BinaryOp::NotEndsWith,
        Rule::endswith_cs_op => BinaryOp::EndsWithCs,
        Rule::not_endswith_cs_op => BinaryOp::NotEndsWithCs,
        Rule::matches_regex_op => BinaryOp::MatchesRegex,
        Rule::lt_op => BinaryOp::Lt,
        Rule::le_op => BinaryOp::Le,
        Rule::gt_op => BinaryOp::Gt,
        Rule::ge_op => BinaryOp::Ge,
        Rule::add_op => BinaryOp::Add,
        Rule::sub_op => BinaryOp::Sub,
        Rule::mul_op => BinaryOp::Mul,
        Rule::div_op => BinaryOp::Div,
        Rule::mod_op => BinaryOp::Mod,
        other => unreachable!("unexpected infix rule: {other:?}"),
    }
}

fn build_postfix(lhs: Expr, op: Pair<'_, Rule>, pratt: &PrattParser<Rule>) -> Result<Expr> {
    let rule = op.as_rule();
    match rule {
        Rule::path_op => {
            let selector = op
                .into_inner()
                .next()
                .ok_or_else(|| KqlParserError::Syntax("expected a field after '.'".into()))?;
            Ok(Expr::Path {
                base: Box::new(lhs),
                selector: build_name(selector)?,
            })
        }
        Rule::index_op => {
            let index = parse_expr(first_expr(op)?, pratt)?;
            Ok(match index {
                Expr::Const(Value::Str(selector)) => Expr::Path {
                    base: Box::new(lhs),
                    selector,
                },
                index => Expr::Index {
                    base: Box::new(lhs),
                    index: Box::new(index),
                },
            })
        }
        Rule::between_op | Rule::not_between_op => {
            let mut bounds = children(op, Rule::expr);
            let low = next_pair(&mut bounds, "lower bound")?;
            let high = next_pair(&mut bounds, "upper bound")?;
            Ok(Expr::Between {
                value: Box::new(lhs),
                low: Box::new(parse_expr(low, pratt)?),
                high: Box::new(parse_expr(high, pratt)?),
                negated: rule == Rule::not_between_op,
            })
        }
        Rule::in_op | Rule::in_ci_op | Rule::not_in_op | Rule::not_in_ci_op => {
            let candidates = children(op, Rule::expr)
                .map(|p| parse_expr(p, pratt))
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::In {
                value: Box::new(lhs),
                candidates,
                case_insensitive: matches!(rule, Rule::in_ci_op | Rule::not_in_ci_op),
                negated: matches!(rule, Rule::not_in_op | Rule::not_in_ci_op),
            })
        }
        other => unreachable!("unexpected postfix rule: {other:?}"),
    }
}

fn build_primary(pair: Pair<'_, Rule>, pratt: &PrattParser<Rule>) -> Result<Expr> {
    match pair.as_rule() {
        Rule::expr => parse_expr(pair, pratt),
        Rule::string_lit => Ok(Expr::Const(Value::Str(build_string(pair)))),
        Rule::verbatim_string => {
            let raw = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(Expr::Const(Value::Str(raw.to_string())))
        }
        Rule::bool_lit => Ok(Expr::Const(Value::Bool(pair.as_str() == "true"))),
        Rule::timespan_lit => parse_timespan_literal(pair.as_str())
            .map(|ts| Expr::Const(Value::TimeSpan(ts)))
            .ok_or_else(|| KqlParserError::InvalidTimespan(pair.as_str().to_string())),
        Rule::real_lit => pair
            .as_str()
            .parse::<f64>()
            .map(|r| Expr::Const(Value::Real(r)))
            .map_err(|_| KqlParserError::InvalidLiteral(pair.as_str().to_string())),
        Rule::int_lit => parse_integer(pair.as_str()).map(Expr::Const),
        Rule::typed_lit => {
            let mut inner = pair.into_inner();
            let kw = next_pair(&mut inner, "literal type")?.as_str();
            let body = inner.next().map(|p| p.as_str()).unwrap_or("");
            build_typed_literal(kw, body, pratt)
        }
        Rule::dynamic_lit => {
            let body = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            let json: serde_json::Value = serde_json::from_str(body.trim())
                .map_err(|_| KqlParserError::InvalidLiteral(format!("dynamic({body})")))?;
            Ok(Expr::Const(Value::from_json(json)))
        }
        Rule::call => build_call(pair, pratt),
        Rule::ident | Rule::bracket_name => Ok(Expr::Property(build_name(pair)?)),
        other => unreachable!("unexpected primary rule: {other:?}"),
    }
}

/// Integer literals are int32 when they fit, int64 otherwise.
fn parse_integer(s: &str) -> Result<Value> {
    if let Ok(i) = s.parse::<i32>() {
        return Ok(Value::Int(i));
    }
    s.parse::<i64>()
        .map(Value::Long)
        .map_err(|_| KqlParserError::InvalidLiteral(s.to_string()))
}

/// `datetime(...)`, `timespan(...)`, `guid(...)` and friends.
///
/// A body that is not a literal of the named type is parsed as an expression
/// and becomes a conversion call, e.g. `datetime(Timestamp)`.
fn build_typed_literal(kw: &str, body: &str, pratt: &PrattParser<Rule>) -> Result<Expr> {
    let raw = body.trim();
    if raw == "null" {
        return Ok(Expr::Const(Value::Null));
    }
    let text = unquote(raw);
    let literal = match kw {
        "datetime" => parse_datetime(&text).map(Value::DateTime),
        "timespan" | "time" => parse_timespan(&text).map(Value::TimeSpan),
        "guid" => Uuid::parse_str(&text).ok().map(Value::Guid),
        "decimal" => parse_decimal(&text).map(Value::Decimal),
        "long" => text.parse::<i64>().ok().map(Value::Long),
        "int" => text.parse::<i32>().ok().map(Value::Int),
        "real" | "double" => text.parse::<f64>().ok().map(Value::Real),
        "bool" => match text.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    };
    if let Some(value) = literal {
        return Ok(Expr::Const(value));
    }

    let invalid = || KqlParserError::InvalidLiteral(format!("{kw}({raw})"));
    match parse_expression_with(raw, pratt) {
        Ok(Expr::Const(_)) | Err(_) => Err(invalid()),
        Ok(arg) => Ok(Expr::call(kw, vec![arg])),
    }
}

fn unquote(raw: &str) -> String {
    let bytes = raw.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if (first == b'"' || first == b'\'') && first == last {
            return unescape(&raw[1..raw.len() - 1]);
        }
    }
    raw.to_string()
}

fn build_string(pair: Pair<'_, Rule>) -> String {
    let inner = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
    unescape(inner)
}

/// Resolve backslash escapes. Unknown escapes keep the backslash so regex
/// classes like `\d` survive in ordinary strings.
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn first_expr(pair: Pair<'_, Rule>) -> Result<Pair<'_, Rule>> {
    pair.into_inner()
        .find(|p| p.as_rule() == Rule::expr)
        .ok_or_else(|| KqlParserError::Syntax("expected expression".to_string()))
}

fn children(pair: Pair<'_, Rule>, rule: Rule) -> impl Iterator<Item = Pair<'_, Rule>> {
    pair.into_inner().filter(move |p| p.as_rule() == rule)
}

// =============================================================================
// Tests
// =============================================================================
