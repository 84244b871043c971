#![allow(dead_code)]

use std::sync::Arc;

use kql_eval::{
    Evaluator, FunctionRegistry, Host, HostConfig, Pipeline, ProcessResult, Record,
    RecoveryPolicy, Value, record_from_json,
};
use kql_parser::parse_expression;
use serde_json::Value as Json;

pub fn rec(event: Json) -> Record {
    record_from_json(event).unwrap()
}

pub fn pipeline(text: &str) -> Pipeline {
    Pipeline::parse(text, Arc::new(FunctionRegistry::new())).unwrap()
}

/// Feed every event, then complete; returns everything the pipeline emitted.
pub fn run(text: &str, events: Vec<Json>) -> Vec<Record> {
    let mut p = pipeline(text);
    let mut out = Vec::new();
    for event in events {
        out.extend(p.on_next(&rec(event)).unwrap());
    }
    out.extend(p.on_completed().unwrap());
    out
}

pub fn eval_expr(text: &str, event: Json) -> kql_eval::Result<Value> {
    let expr = parse_expression(text).unwrap();
    Evaluator::new(Arc::new(FunctionRegistry::new())).eval(&expr, &rec(event))
}

pub fn host(recovery: RecoveryPolicy, emit_failure_events: bool) -> Host {
    Host::with_registry(
        HostConfig {
            recovery,
            emit_failure_events,
        },
        Arc::new(FunctionRegistry::new()),
    )
}

pub fn feed(host: &mut Host, event: Json) -> ProcessResult {
    host.on_next(&rec(event))
}
