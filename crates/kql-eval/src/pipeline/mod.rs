//! Compiled pipelines: a chain of stage operators driven by `on_next` /
//! `on_completed`.
//!
//! Stages run strictly left to right; each stage's output records are the
//! next stage's input. Completion walks the stages in order, pushing each
//! stage's final flush through the stages after it before completing them.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use kql_eval::{FunctionRegistry, Pipeline, record_from_json};
//! use serde_json::json;
//!
//! let mut pipeline = Pipeline::parse(
//!     "Logons | where Result == 'failure' | summarize Failures = count() by Account",
//!     Arc::new(FunctionRegistry::new()),
//! )
//! .unwrap();
//!
//! for account in ["alice", "bob", "alice"] {
//!     let event = record_from_json(json!({"Account": account, "Result": "failure"})).unwrap();
//!     assert!(pipeline.on_next(&event).unwrap().is_empty());
//! }
//! let summary = pipeline.on_completed().unwrap();
//! assert_eq!(summary.len(), 2);
//! ```

pub mod stage;
pub mod summarize;

use std::sync::Arc;

use kql_parser::{Query, Record, parse_query};

use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::registry::FunctionRegistry;

pub use stage::StageOperator;
pub use summarize::{DimensionIndex, GroupKey, SummarizeOperator};

#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<StageOperator>,
    evaluator: Evaluator,
}

impl Pipeline {
    /// Compile a parsed query. Fails on unknown aggregations; scalar function
    /// names are resolved at evaluation time.
    pub fn compile(query: &Query, registry: Arc<FunctionRegistry>) -> Result<Self> {
        let stages = query
            .stages
            .iter()
            .map(StageOperator::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Pipeline {
            stages,
            evaluator: Evaluator::new(registry),
        })
    }

    /// Parse and compile query text.
    pub fn parse(text: &str, registry: Arc<FunctionRegistry>) -> Result<Self> {
        Self::compile(&parse_query(text)?, registry)
    }

    pub fn stages(&self) -> &[StageOperator] {
        &self.stages
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Feed one record, returning what reached the end of the chain.
    pub fn on_next(&mut self, record: &Record) -> Result<Vec<Record>> {
        self.push_from(0, vec![record.clone()])
    }

    /// Complete the pipeline, flushing every summarize stage in order.
    pub fn on_completed(&mut self) -> Result<Vec<Record>> {
        let mut output = Vec::new();
        for i in 0..self.stages.len() {
            let flushed = self.stages[i].on_completed();
            if !flushed.is_empty() {
                output.extend(self.push_from(i + 1, flushed)?);
            }
        }
        Ok(output)
    }

    /// Push a batch through the stages from `start` on. The first error fails
    /// the whole batch.
    fn push_from(&mut self, start: usize, records: Vec<Record>) -> Result<Vec<Record>> {
        let mut batch = records;
        for stage in &mut self.stages[start..] {
            if batch.is_empty() {
                break;
            }
            let mut next = Vec::with_capacity(batch.len());
            for record in batch {
                next.extend(stage.on_next(record, &self.evaluator)?);
            }
            batch = next;
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kql_parser::Value;
    use serde_json::json;

    use crate::event::record_from_json;

    fn pipeline(text: &str) -> Pipeline {
        Pipeline::parse(text, Arc::new(FunctionRegistry::new())).unwrap()
    }

    fn rec(v: serde_json::Value) -> Record {
        record_from_json(v).unwrap()
    }

    #[test]
    fn test_no_stages_passes_through() {
        let mut p = pipeline("Events");
        let out = p.on_next(&rec(json!({"a": 1}))).unwrap();
        assert_eq!(out, vec![rec(json!({"a": 1}))]);
    }

    #[test]
    fn test_stages_chain_left_to_right() {
        let mut p = pipeline("T | extend y = x * 2 | where y > 5 | project y");
        assert!(p.on_next(&rec(json!({"x": 2}))).unwrap().is_empty());
        let out = p.on_next(&rec(json!({"x": 3}))).unwrap();
        assert_eq!(out, vec![rec(json!({"y": 6}))]);
    }

    #[test]
    fn test_completion_flows_through_later_stages() {
        let mut p = pipeline("T | summarize n = count() by k | where n > 1 | extend tag = 'hot'");
        for k in ["a", "b", "a"] {
            p.on_next(&rec(json!({"k": k}))).unwrap();
        }
        let out = p.on_completed().unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["k"], Value::from("a"));
        assert_eq!(out[0]["tag"], Value::from("hot"));
    }

    #[test]
    fn test_chained_summaries_complete_in_order() {
        let mut p = pipeline("T | summarize n = count() by k | summarize groups = count()");
        for k in ["a", "b", "c", "a"] {
            p.on_next(&rec(json!({"k": k}))).unwrap();
        }
        let out = p.on_completed().unwrap();
        assert_eq!(out, vec![rec(json!({"groups": 3}))]);
    }

    #[test]
    fn test_unknown_aggregation_fails_compile() {
        assert!(Pipeline::parse("T | summarize median(x)", Arc::new(FunctionRegistry::new())).is_err());
    }
}
