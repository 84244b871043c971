//! # kql-eval
//!
//! Streaming evaluator for KQL pipelines.
//!
//! This crate consumes the AST produced by [`kql_parser`] and runs it over a
//! stream of records, one record at a time, using a compile-then-evaluate
//! model.
//!
//! ## Architecture
//!
//! - **Evaluator**: recursive evaluation of expressions against a record,
//!   with a built-in scalar function library and a shared registry for user
//!   and host-supplied functions.
//! - **Stage operators**: `where`, `extend`, `project`, `project-away`,
//!   `project-keep`, `evaluate` and `take` are stateless per record.
//! - **Summarize** (stateful): grouped aggregation (`count`, `sum`, `min`,
//!   `max`, `make_list`, `make_set`) over tumbling `bin(Time, span)` windows,
//!   flushed when event time crosses the window end or on completion.
//! - **Host**: many standing queries over one stream, each failure isolated
//!   to the query that raised it.
//!
//! ## Quick Start
//!
//! ```rust
//! use kql_eval::{Host, HostConfig, record_from_json};
//! use serde_json::json;
//!
//! let mut host = Host::new(HostConfig::default());
//! host.add_query(
//!     "// Failed logons per account",
//!     "SecurityEvent | where EventID == 4625 | summarize Failures = count() by Account, bin(TimeCreated, 1m)",
//! );
//!
//! for (account, time) in [
//!     ("alice", "2024-01-01T10:00:05Z"),
//!     ("alice", "2024-01-01T10:00:40Z"),
//!     ("alice", "2024-01-01T10:01:10Z"),
//! ] {
//!     let event = json!({"EventID": 4625, "Account": account, "TimeCreated": time});
//!     let result = host.on_next(&record_from_json(event).unwrap());
//!     if time.ends_with("10:01:10Z") {
//!         // the 10:00 window closed
//!         assert_eq!(result.outputs.len(), 1);
//!         assert_eq!(result.outputs[0].record["Failures"], kql_eval::Value::Long(2));
//!     }
//! }
//! assert_eq!(host.on_completed().outputs.len(), 1);
//! ```

pub mod aggregation;
pub mod error;
pub mod evaluator;
pub mod event;
pub mod functions;
pub mod host;
pub mod operators;
pub mod pipeline;
pub mod query;
pub mod registry;

// Re-export the most commonly used types and functions at crate root
pub use aggregation::{AggregationKind, AggregationSpec};
pub use error::{EvalError, Result};
pub use evaluator::Evaluator;
pub use event::{field_or_empty, get_field, record_from_json, record_from_str, record_to_json};
pub use host::{
    Host, HostConfig, LoadReport, ProcessResult, QueryFailure, QueryOutput, RecoveryPolicy,
};
pub use pipeline::{Pipeline, StageOperator, SummarizeOperator};
pub use query::{QueryDefinition, QueryStats, StandingQuery};
pub use registry::{FunctionRegistry, NativeFn, Resolved};

pub use kql_parser::{Record, Value};
