//! # kql-parser
//!
//! Parser for the streaming subset of the Kusto Query Language: pipelines of
//! `where`, `extend`, `project`, `project-away`, `project-keep`, `evaluate`,
//! `summarize` and `take` stages over a stream of records.
//!
//! This crate turns query text into a strongly-typed AST, handling:
//!
//! - **Expressions**: arithmetic, comparisons, `and` / `or` / `not`, the string
//!   operators (`contains`, `has`, `startswith`, `endswith`, `matches regex`,
//!   and their `_cs` / negated forms), `between`, `in` / `in~` / `!in`
//! - **Literals**: int, long, real, string (quoted and verbatim), bool,
//!   timespan (`5m`, `timespan(01:00:00)`), `datetime(...)`, `guid(...)`,
//!   `decimal(...)` and `dynamic(...)`
//! - **Property access**: `a.b`, `a["b c"]`, `a[0]`
//! - **Summarize**: named aggregations, group-by dimensions and a single
//!   `bin(Time, span)` time window
//! - **User functions**: `.create-or-alter function Name(a: type) { body }`
//! - **Query files**: blank-line separated paragraphs with `//` comments
//!
//! ## Architecture
//!
//! - **PEG grammar** ([`pest`]) for the pipeline syntax, with a Pratt parser
//!   resolving operator precedence (`or` < `and` < equality / string ops <
//!   relational < additive < multiplicative < unary < member access)
//! - **Typed values** ([`Value`]) shared with the evaluator
//! - Every AST node renders back to KQL through `Display`
//!
//! ## Quick Start
//!
//! ```rust
//! use kql_parser::{Stage, parse_query};
//!
//! let query = parse_query(
//!     "SecurityEvent | where EventID == 4625 | summarize Failures = count() by Account, bin(TimeCreated, 5m)",
//! )
//! .unwrap();
//! assert_eq!(query.source.as_deref(), Some("SecurityEvent"));
//! assert!(matches!(query.stages[1], Stage::Summarize(_)));
//! ```
//!
//! ## Parsing expressions
//!
//! ```rust
//! use kql_parser::parse_expression;
//!
//! let expr = parse_expression("Level between (2 .. 4) and Message has \"timeout\"").unwrap();
//! println!("{expr}");
//! ```

pub mod ast;
pub mod error;
pub mod parser;
pub mod query;
pub mod value;

pub use ast::*;
pub use error::{KqlParserError, Result};
pub use parser::{
    QueryFile, QuerySource, parse_query_directory, parse_query_file, parse_query_file_str,
};
pub use query::{parse_expression, parse_function_definition, parse_query};
pub use value::{
    Record, Value, format_datetime_iso, format_timespan, parse_datetime, parse_decimal,
    parse_timespan, parse_timespan_literal, timespan_from_ticks, timespan_literal, timespan_ticks,
};
