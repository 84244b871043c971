//! Stage operators: one compiled pipeline stage each.

use kql_parser::{Expr, NamedExpr, Record, Stage, Value};

use super::summarize::SummarizeOperator;
use crate::error::{EvalError, Result};
use crate::evaluator::Evaluator;

#[derive(Debug)]
pub enum StageOperator {
    Where(Expr),
    Extend(Vec<NamedExpr>),
    Project(Vec<NamedExpr>),
    ProjectAway(Vec<String>),
    ProjectKeep(Vec<String>),
    Evaluate(Expr),
    Summarize(Box<SummarizeOperator>),
    Take { limit: u64, passed: u64 },
}

impl StageOperator {
    pub fn compile(stage: &Stage) -> Result<Self> {
        Ok(match stage {
            Stage::Where(predicate) => StageOperator::Where(predicate.clone()),
            Stage::Extend(columns) => StageOperator::Extend(columns.clone()),
            Stage::Project(columns) => StageOperator::Project(columns.clone()),
            Stage::ProjectAway(names) => StageOperator::ProjectAway(names.clone()),
            Stage::ProjectKeep(names) => StageOperator::ProjectKeep(names.clone()),
            Stage::Evaluate(call) => StageOperator::Evaluate(call.clone()),
            Stage::Summarize(summarize) => {
                StageOperator::Summarize(Box::new(SummarizeOperator::new(summarize)?))
            }
            Stage::Take(limit) => StageOperator::Take {
                limit: *limit,
                passed: 0,
            },
        })
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            StageOperator::Where(_) => "where",
            StageOperator::Extend(_) => "extend",
            StageOperator::Project(_) => "project",
            StageOperator::ProjectAway(_) => "project-away",
            StageOperator::ProjectKeep(_) => "project-keep",
            StageOperator::Evaluate(_) => "evaluate",
            StageOperator::Summarize(_) => "summarize",
            StageOperator::Take { .. } => "take",
        }
    }

    /// Process one record. Returns the records passed downstream: none when
    /// filtered, several when a summarize window closes.
    pub fn on_next(&mut self, record: Record, evaluator: &Evaluator) -> Result<Vec<Record>> {
        match self {
            StageOperator::Where(predicate) => {
                if evaluator.eval_predicate(predicate, &record)? {
                    Ok(vec![record])
                } else {
                    Ok(Vec::new())
                }
            }
            StageOperator::Extend(columns) => {
                let mut output = record;
                for column in columns.iter() {
                    let value = evaluator.eval(&column.expr, &output)?;
                    output.insert(column.name.clone(), value);
                }
                Ok(vec![output])
            }
            StageOperator::Project(columns) => {
                let mut output = Record::with_capacity(columns.len());
                for column in columns.iter() {
                    output.insert(column.name.clone(), evaluator.eval(&column.expr, &record)?);
                }
                Ok(vec![output])
            }
            StageOperator::ProjectAway(names) => {
                let mut output = record;
                for name in names.iter() {
                    output.shift_remove(name);
                }
                Ok(vec![output])
            }
            StageOperator::ProjectKeep(names) => {
                let mut output = record;
                output.retain(|key, _| names.contains(key));
                Ok(vec![output])
            }
            StageOperator::Evaluate(call) => Ok(vec![evaluate(call, record, evaluator)?]),
            StageOperator::Summarize(summarize) => summarize.on_next(&record, evaluator),
            StageOperator::Take { limit, passed } => {
                if *passed < *limit {
                    *passed += 1;
                    Ok(vec![record])
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    /// Upstream completion. Only `summarize` holds records back.
    pub fn on_completed(&mut self) -> Vec<Record> {
        match self {
            StageOperator::Summarize(summarize) => summarize.on_completed(),
            _ => Vec::new(),
        }
    }
}

/// `evaluate f(...)`: the result replaces the record, except `bag_unpack`,
/// whose fields are merged into it with the unpacked values winning.
fn evaluate(call: &Expr, record: Record, evaluator: &Evaluator) -> Result<Record> {
    let Expr::Call { name, args } = call else {
        return Err(EvalError::InvalidArgument(format!(
            "evaluate expects a function call, got {call}"
        )));
    };

    if name == "bag_unpack" {
        if !matches!(args.first(), Some(Expr::Property(_) | Expr::Path { .. })) {
            return Err(EvalError::mismatch(format!(
                "bag_unpack expects a column reference, got {call}"
            )));
        }
        let Value::Record(unpacked) = evaluator.eval(call, &record)? else {
            return Err(EvalError::mismatch("bag_unpack did not return a property bag"));
        };
        let mut output = record;
        output.extend(unpacked);
        return Ok(output);
    }

    match evaluator.eval(call, &record)? {
        Value::Record(output) => Ok(output),
        other => Err(EvalError::mismatch(format!(
            "evaluate {name}() must return a property bag, got {}",
            other.type_name()
        ))),
    }
}
