//! Multi-query host.
//!
//! The `Host` holds an ordered set of standing queries and feeds every record
//! to each of them. A query that fails on a record is isolated: the failure
//! is recorded on that query, the configured [`RecoveryPolicy`] is applied,
//! and the remaining queries still see the record.
//!
//! Record delivery takes `&mut self`, so a host has a single producer.
//! Function management goes through the shared [`FunctionRegistry`], which
//! other threads may mutate while records are flowing.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use kql_eval::{FunctionRegistry, Host, HostConfig, record_from_json};
//! use serde_json::json;
//!
//! let mut host = Host::with_registry(HostConfig::default(), Arc::new(FunctionRegistry::new()));
//! host.add_query("// Admin logons", "Logons | where Account =~ 'admin'");
//! host.add_query("// Broken", "Logons | where nosuchfn(Account)");
//!
//! let event = record_from_json(json!({"Account": "ADMIN"})).unwrap();
//! let result = host.on_next(&event);
//! assert_eq!(result.outputs.len(), 1);
//! assert_eq!(result.outputs[0].query_name, "Admin logons");
//! ```

use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use uuid::Uuid;

use kql_parser::{
    QueryFile, Record, UserFunction, parse_query_directory, parse_query_file, parse_query_file_str,
};

use crate::error::{EvalError, Result};
use crate::query::{QueryDefinition, QueryStats, StandingQuery};
use crate::registry::FunctionRegistry;

// =============================================================================
// Configuration
// =============================================================================

/// What happens to a query after it fails on a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryPolicy {
    /// Stop evaluating the query. It stays listed with `valid == false`.
    Dispose,
    /// Rebuild the query from its text, dropping any summarize state.
    #[default]
    Resubscribe,
}

#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    pub recovery: RecoveryPolicy,
    /// Return failures in [`ProcessResult::failures`] as well as recording
    /// them on the query.
    pub emit_failure_events: bool,
}

// =============================================================================
// Results
// =============================================================================

/// One record produced by a query, tagged with where it came from.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutput {
    pub query_id: u64,
    pub query_name: String,
    pub query_guid: Uuid,
    pub comment: String,
    pub record: Record,
}

/// A query failing on a record (or on completion, where `record` is `None`).
#[derive(Debug, Clone, Serialize)]
pub struct QueryFailure {
    pub query_id: u64,
    pub query_name: String,
    pub query_guid: Uuid,
    pub comment: String,
    pub error: String,
    pub record: Option<Record>,
}

/// Everything one `on_next` / `on_completed` call produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessResult {
    pub outputs: Vec<QueryOutput>,
    pub failures: Vec<QueryFailure>,
}

impl ProcessResult {
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty() && self.failures.is_empty()
    }
}

/// Summary of loading query text or files.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    /// Ids of queries that built successfully.
    pub added: Vec<u64>,
    /// Names of registered user functions.
    pub functions: Vec<String>,
    /// Malformed function declarations and queries that failed to build.
    pub errors: Vec<String>,
}

// =============================================================================
// Host
// =============================================================================

#[derive(Debug)]
pub struct Host {
    config: HostConfig,
    registry: Arc<FunctionRegistry>,
    queries: Vec<StandingQuery>,
    failed: Vec<StandingQuery>,
    next_id: u64,
}

impl Host {
    /// A host evaluating against the process-wide function registry.
    pub fn new(config: HostConfig) -> Self {
        Self::with_registry(config, FunctionRegistry::global())
    }

    pub fn with_registry(config: HostConfig, registry: Arc<FunctionRegistry>) -> Self {
        Host {
            config,
            registry,
            queries: Vec::new(),
            failed: Vec::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    // -------------------------------------------------------------------------
    // Query management
    // -------------------------------------------------------------------------

    /// Register a query. A query that fails to build goes to the failed list
    /// instead; the id is returned either way.
    pub fn add_query(&mut self, comment: &str, text: &str) -> u64 {
        self.add_definition(QueryDefinition::new(text).with_comment(comment))
    }

    pub fn add_definition(&mut self, definition: QueryDefinition) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let query = StandingQuery::new(id, definition, Arc::clone(&self.registry));
        if query.valid {
            debug!("registered query {} '{}'", query.id, query.name);
            self.queries.push(query);
        } else {
            warn!(
                "query '{}' failed to build: {}",
                query.name,
                query.failure_reason.as_deref().unwrap_or_default()
            );
            self.failed.push(query);
        }
        id
    }

    /// Add several queries at once, optionally replacing the current set.
    pub fn add_queries(
        &mut self,
        definitions: impl IntoIterator<Item = QueryDefinition>,
        replace: bool,
    ) -> Vec<u64> {
        if replace {
            self.queries.clear();
            self.failed.clear();
        }
        definitions
            .into_iter()
            .map(|definition| self.add_definition(definition))
            .collect()
    }

    pub fn remove_query(&mut self, id: u64) -> bool {
        let before = self.queries.len() + self.failed.len();
        self.queries.retain(|q| q.id != id);
        self.failed.retain(|q| q.id != id);
        before != self.queries.len() + self.failed.len()
    }

    /// Registered queries, in registration order. Disposed queries are
    /// included with `valid == false`.
    pub fn queries(&self) -> &[StandingQuery] {
        &self.queries
    }

    /// Queries that failed to build.
    pub fn failed_queries(&self) -> &[StandingQuery] {
        &self.failed
    }

    pub fn query(&self, id: u64) -> Option<&StandingQuery> {
        self.queries
            .iter()
            .chain(self.failed.iter())
            .find(|q| q.id == id)
    }

    pub fn stats(&self) -> Vec<QueryStats> {
        self.queries.iter().map(StandingQuery::stats).collect()
    }

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------

    /// Load query file text: functions are registered first, then every
    /// query paragraph is added.
    pub fn add_query_text(&mut self, text: &str) -> LoadReport {
        self.load(parse_query_file_str(text))
    }

    /// Load a query file, or every `.kql` / `.csl` file under a directory.
    pub fn add_query_file(&mut self, path: &Path) -> Result<LoadReport> {
        let file = if path.is_dir() {
            parse_query_directory(path)?
        } else {
            parse_query_file(path)?
        };
        Ok(self.load(file))
    }

    fn load(&mut self, file: QueryFile) -> LoadReport {
        let mut report = LoadReport {
            errors: file.errors,
            ..Default::default()
        };
        for function in file.functions {
            report.functions.push(function.name.clone());
            self.registry.add_function(function);
        }
        for source in file.queries {
            let id = self.add_query(&source.comment, &source.text);
            match self.failed.iter().find(|q| q.id == id) {
                Some(failed) => report.errors.push(format!(
                    "{}: {}",
                    failed.name,
                    failed.failure_reason.as_deref().unwrap_or_default()
                )),
                None => report.added.push(id),
            }
        }
        report
    }

    // -------------------------------------------------------------------------
    // Functions
    // -------------------------------------------------------------------------

    pub fn add_function(&self, function: UserFunction) {
        self.registry.add_function(function);
    }

    /// Register every `.create-or-alter function` declaration in `text`.
    pub fn add_function_text(&self, text: &str) -> Result<Vec<String>> {
        self.registry.add_function_text(text)
    }

    pub fn remove_function(&self, name: &str) -> bool {
        self.registry.remove_function(name)
    }

    pub fn get_function(&self, name: &str) -> Option<Arc<UserFunction>> {
        self.registry.get_function(name)
    }

    // -------------------------------------------------------------------------
    // Record flow
    // -------------------------------------------------------------------------

    /// Feed one record to every active query, in registration order.
    pub fn on_next(&mut self, record: &Record) -> ProcessResult {
        let mut result = ProcessResult::default();
        for query in self.queries.iter_mut().filter(|q| q.valid) {
            match query.on_next(record) {
                Ok(outputs) => collect(query, outputs, &mut result),
                Err(e) => {
                    let failure = recover(&self.config, query, e, Some(record));
                    if self.config.emit_failure_events {
                        result.failures.push(failure);
                    }
                }
            }
        }
        result
    }

    /// Upstream completion: flush every active query.
    pub fn on_completed(&mut self) -> ProcessResult {
        let mut result = ProcessResult::default();
        for query in self.queries.iter_mut().filter(|q| q.valid) {
            match query.on_completed() {
                Ok(outputs) => collect(query, outputs, &mut result),
                Err(e) => {
                    let failure = recover(&self.config, query, e, None);
                    if self.config.emit_failure_events {
                        result.failures.push(failure);
                    }
                }
            }
        }
        result
    }
}

fn collect(query: &StandingQuery, outputs: Vec<Record>, result: &mut ProcessResult) {
    result.outputs.extend(outputs.into_iter().map(|record| QueryOutput {
        query_id: query.id,
        query_name: query.name.clone(),
        query_guid: query.guid,
        comment: query.comment.clone(),
        record,
    }));
}

/// Record the failure on the query and apply the recovery policy.
fn recover(
    config: &HostConfig,
    query: &mut StandingQuery,
    error: EvalError,
    record: Option<&Record>,
) -> QueryFailure {
    let message = error.to_string();
    warn!("query '{}' failed: {message}", query.name);
    query.failure_reason = Some(message.clone());

    match config.recovery {
        RecoveryPolicy::Dispose => {
            info!("disposing query '{}'", query.name);
            query.dispose();
        }
        RecoveryPolicy::Resubscribe => {
            info!("resubscribing query '{}'", query.name);
            if let Err(e) = query.resubscribe() {
                warn!("query '{}' could not be rebuilt: {e}", query.name);
            }
        }
    }

    QueryFailure {
        query_id: query.id,
        query_name: query.name.clone(),
        query_guid: query.guid,
        comment: query.comment.clone(),
        error: message,
        record: record.cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kql_parser::Value;
    use serde_json::json;

    use crate::event::record_from_json;

    fn host(recovery: RecoveryPolicy) -> Host {
        Host::with_registry(
            HostConfig {
                recovery,
                emit_failure_events: true,
            },
            Arc::new(FunctionRegistry::new()),
        )
    }

    fn rec(v: serde_json::Value) -> Record {
        record_from_json(v).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.recovery, RecoveryPolicy::Resubscribe);
        assert!(!config.emit_failure_events);
    }

    #[test]
    fn test_failed_build_is_listed_separately() {
        let mut h = host(RecoveryPolicy::Dispose);
        let good = h.add_query("", "T | where x == 1");
        let bad = h.add_query("// bad", "T | where (");
        assert_eq!(h.queries().len(), 1);
        assert_eq!(h.failed_queries().len(), 1);
        assert_ne!(good, bad);
        assert_eq!(h.query(bad).unwrap().name, "bad");
    }

    #[test]
    fn test_failure_isolated_from_siblings() {
        let mut h = host(RecoveryPolicy::Dispose);
        h.add_query("", "T | where boom(x)");
        h.add_query("", "T | where x == 1");
        let result = h.on_next(&rec(json!({"x": 1})));
        assert_eq!(result.outputs.len(), 1);
        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].error.contains("boom"));
        assert!(!h.queries()[0].valid);

        // disposed: no further failures
        let result = h.on_next(&rec(json!({"x": 1})));
        assert_eq!(result.outputs.len(), 1);
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_resubscribe_keeps_evaluating() {
        let mut h = host(RecoveryPolicy::Resubscribe);
        h.add_query("", "T | where throw('bad') == 1");
        for _ in 0..3 {
            assert_eq!(h.on_next(&rec(json!({"x": 1}))).failures.len(), 1);
        }
        assert!(h.queries()[0].valid);
        assert!(h.queries()[0].failure_reason.is_some());
    }

    #[test]
    fn test_failures_hidden_unless_enabled() {
        let mut h = Host::with_registry(HostConfig::default(), Arc::new(FunctionRegistry::new()));
        h.add_query("", "T | where nope()");
        let result = h.on_next(&rec(json!({})));
        assert!(result.is_empty());
        assert!(h.queries()[0].failure_reason.is_some());
    }

    #[test]
    fn test_on_completed_flushes_with_metadata() {
        let mut h = host(RecoveryPolicy::Dispose);
        let id = h.add_query("// counter", "T | summarize n = count()");
        h.on_next(&rec(json!({})));
        h.on_next(&rec(json!({})));
        let result = h.on_completed();
        assert_eq!(result.outputs.len(), 1);
        let output = &result.outputs[0];
        assert_eq!(output.query_id, id);
        assert_eq!(output.query_name, "counter");
        assert_eq!(output.comment, "// counter");
        assert_eq!(output.record["n"], Value::Long(2));
    }

    #[test]
    fn test_bulk_replace_and_remove() {
        let mut h = host(RecoveryPolicy::Dispose);
        h.add_query("", "T");
        let ids = h.add_queries(
            vec![QueryDefinition::new("T | take 1"), QueryDefinition::new("T | take 2")],
            true,
        );
        assert_eq!(h.queries().len(), 2);
        assert!(h.remove_query(ids[0]));
        assert!(!h.remove_query(ids[0]));
        assert_eq!(h.queries().len(), 1);
    }

    #[test]
    fn test_load_text_with_functions() {
        let mut h = host(RecoveryPolicy::Dispose);
        let report = h.add_query_text(
            ".create-or-alter function Double(v: long) { v * 2 }\n\n\
             // doubled\n\
             T | extend d = Double(x)\n\n\
             T | where (",
        );
        assert_eq!(report.functions, vec!["Double"]);
        assert_eq!(report.added.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert!(h.get_function("Double").is_some());

        let result = h.on_next(&rec(json!({"x": 4})));
        assert_eq!(result.outputs[0].record["d"], Value::Long(8));
        assert!(h.remove_function("Double"));
    }
}
