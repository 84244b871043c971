//! Standing queries: a compiled pipeline plus the identity, state and
//! counters the host tracks for it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use kql_parser::Record;

use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::registry::FunctionRegistry;

/// Query text plus optional metadata, as handed to the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryDefinition {
    pub name: Option<String>,
    pub description: Option<String>,
    pub comment: String,
    pub text: String,
}

impl QueryDefinition {
    pub fn new(text: impl Into<String>) -> Self {
        QueryDefinition {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A pipeline evaluated against every record the host receives.
#[derive(Debug)]
pub struct StandingQuery {
    pub id: u64,
    pub guid: Uuid,
    pub name: String,
    pub description: String,
    pub comment: String,
    pub text: String,
    pub engaged_at: DateTime<Utc>,
    /// `false` once the query failed to build or was disposed.
    pub valid: bool,
    pub failure_reason: Option<String>,
    pub evaluation_count: u64,
    pub evaluation_time: Duration,
    registry: Arc<FunctionRegistry>,
    pipeline: Option<Pipeline>,
}

/// A serializable snapshot of a query's state and counters.
#[derive(Debug, Clone, Serialize)]
pub struct QueryStats {
    pub id: u64,
    pub guid: Uuid,
    pub name: String,
    pub valid: bool,
    pub failure_reason: Option<String>,
    pub engaged_at: String,
    pub evaluation_count: u64,
    pub average_microseconds: f64,
}

impl StandingQuery {
    /// Build a query. A parse or compile failure does not fail construction:
    /// the query comes back invalid, carrying the reason.
    pub fn new(id: u64, definition: QueryDefinition, registry: Arc<FunctionRegistry>) -> Self {
        let name = definition.name.clone().unwrap_or_else(|| {
            definition
                .comment
                .lines()
                .map(|line| line.trim().trim_start_matches('/').trim())
                .find(|line| !line.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Query{id}"))
        });

        let mut query = StandingQuery {
            id,
            guid: Uuid::new_v4(),
            name,
            description: definition.description.unwrap_or_default(),
            comment: definition.comment,
            text: definition.text,
            engaged_at: Utc::now(),
            valid: false,
            failure_reason: None,
            evaluation_count: 0,
            evaluation_time: Duration::ZERO,
            registry,
            pipeline: None,
        };
        if let Err(e) = query.build() {
            query.failure_reason = Some(e.to_string());
        }
        query
    }

    fn build(&mut self) -> Result<()> {
        let pipeline = Pipeline::parse(&self.text, Arc::clone(&self.registry))?;
        self.pipeline = Some(pipeline);
        self.valid = true;
        self.engaged_at = Utc::now();
        Ok(())
    }

    /// Feed one record. A disposed or invalid query produces nothing.
    pub fn on_next(&mut self, record: &Record) -> Result<Vec<Record>> {
        let Some(pipeline) = self.pipeline.as_mut().filter(|_| self.valid) else {
            return Ok(Vec::new());
        };
        let started = Instant::now();
        let result = pipeline.on_next(record);
        self.evaluation_time += started.elapsed();
        self.evaluation_count += 1;
        result
    }

    pub fn on_completed(&mut self) -> Result<Vec<Record>> {
        match self.pipeline.as_mut().filter(|_| self.valid) {
            Some(pipeline) => pipeline.on_completed(),
            None => Ok(Vec::new()),
        }
    }

    /// Rebuild the pipeline from the original text, dropping its state.
    pub fn resubscribe(&mut self) -> Result<()> {
        self.pipeline = None;
        self.valid = false;
        self.build()
    }

    /// Stop evaluating this query for good.
    pub fn dispose(&mut self) {
        self.pipeline = None;
        self.valid = false;
    }

    /// Run a fresh copy of the pipeline on one record, complete it, and
    /// return everything it produced. The standing state is not touched.
    pub fn evaluate(&self, record: &Record) -> Result<Vec<Record>> {
        let mut pipeline = Pipeline::parse(&self.text, Arc::clone(&self.registry))?;
        let mut output = pipeline.on_next(record)?;
        output.extend(pipeline.on_completed()?);
        Ok(output)
    }

    pub fn average_microseconds(&self) -> f64 {
        if self.evaluation_count == 0 {
            return 0.0;
        }
        self.evaluation_time.as_secs_f64() * 1e6 / self.evaluation_count as f64
    }

    pub fn stats(&self) -> QueryStats {
        QueryStats {
            id: self.id,
            guid: self.guid,
            name: self.name.clone(),
            valid: self.valid,
            failure_reason: self.failure_reason.clone(),
            engaged_at: self.engaged_at.to_rfc3339(),
            evaluation_count: self.evaluation_count,
            average_microseconds: self.average_microseconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kql_parser::Value;
    use serde_json::json;

    use crate::event::record_from_json;

    fn query(comment: &str, text: &str) -> StandingQuery {
        StandingQuery::new(
            1,
            QueryDefinition::new(text).with_comment(comment),
            Arc::new(FunctionRegistry::new()),
        )
    }

    #[test]
    fn test_name_from_comment() {
        assert_eq!(query("Failed logons\nmore", "T").name, "Failed logons");
        assert_eq!(query("", "T").name, "Query1");
        let named = StandingQuery::new(
            3,
            QueryDefinition::new("T").with_name("Explicit").with_description("d"),
            Arc::new(FunctionRegistry::new()),
        );
        assert_eq!(named.name, "Explicit");
        assert_eq!(named.description, "d");
    }

    #[test]
    fn test_invalid_query_records_reason() {
        let q = query("", "T | where (");
        assert!(!q.valid);
        assert!(q.failure_reason.is_some());
    }

    #[test]
    fn test_counters() {
        let mut q = query("", "T | where x == 1");
        let r = record_from_json(json!({"x": 1})).unwrap();
        q.on_next(&r).unwrap();
        q.on_next(&r).unwrap();
        assert_eq!(q.evaluation_count, 2);
        assert_eq!(q.stats().evaluation_count, 2);
    }

    #[test]
    fn test_dispose_and_resubscribe() {
        let mut q = query("", "T | summarize n = count()");
        let r = record_from_json(json!({})).unwrap();
        q.on_next(&r).unwrap();
        q.dispose();
        assert!(!q.valid);
        assert!(q.on_next(&r).unwrap().is_empty());

        q.resubscribe().unwrap();
        assert!(q.valid);
        q.on_next(&r).unwrap();
        let out = q.on_completed().unwrap();
        // state from before the dispose is gone
        assert_eq!(out[0]["n"], Value::Long(1));
    }

    #[test]
    fn test_single_shot_evaluate() {
        let q = query("", "T | summarize n = count()");
        let r = record_from_json(json!({})).unwrap();
        let out = q.evaluate(&r).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["n"], Value::Long(1));
        assert_eq!(q.evaluation_count, 0);
    }
}
