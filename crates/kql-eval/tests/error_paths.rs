mod helpers;

use std::sync::Arc;

use helpers::{eval_expr, pipeline, rec};
use kql_eval::{EvalError, FunctionRegistry, Pipeline, Value};
use serde_json::json;

#[test]
fn unknown_function_raises_at_evaluation() {
    let mut p = pipeline("T | where foo(x) == 1");
    for _ in 0..3 {
        let err = p.on_next(&rec(json!({"x": 1}))).unwrap_err();
        assert!(
            matches!(err, EvalError::UnknownFunction(ref name) if name == "foo"),
            "expected UnknownFunction, got: {err}"
        );
    }
}

#[test]
fn unknown_aggregation_fails_construction() {
    let err = Pipeline::parse("T | summarize p = percentile(x, 50)", Arc::new(FunctionRegistry::new()))
        .unwrap_err();
    assert!(matches!(err, EvalError::UnknownFunction(_)), "got: {err}");
}

#[test]
fn malformed_query_is_a_parser_error() {
    let err = Pipeline::parse("T | where x ==", Arc::new(FunctionRegistry::new())).unwrap_err();
    assert!(matches!(err, EvalError::Parser(_)), "got: {err}");
}

#[test]
fn numeric_compared_with_unparseable_string() {
    let err = eval_expr(r#"x > "abc""#, json!({"x": 5})).unwrap_err();
    assert!(matches!(err, EvalError::EvaluationTypeMismatch(_)), "got: {err}");
    let err = eval_expr(r#"x == "abc""#, json!({"x": 5})).unwrap_err();
    assert!(matches!(err, EvalError::EvaluationTypeMismatch(_)), "got: {err}");
}

#[test]
fn equality_on_property_bag_is_unsupported() {
    let err = eval_expr("bag == 1", json!({"bag": {"a": 1}})).unwrap_err();
    assert!(matches!(err, EvalError::UnsupportedType { .. }), "got: {err}");
}

#[test]
fn case_without_else_branch() {
    let err = eval_expr(r#"case(x > 1, "a", x > 0, "b")"#, json!({"x": 1})).unwrap_err();
    assert!(matches!(err, EvalError::InvalidArgument(_)), "got: {err}");
    let err = eval_expr(r#"case(x > 1, "a")"#, json!({"x": 1})).unwrap_err();
    assert!(matches!(err, EvalError::ArgumentCount { .. }), "got: {err}");
}

#[test]
fn wrong_arity_for_builtin() {
    let err = eval_expr("strlen(a, b)", json!({})).unwrap_err();
    assert!(matches!(err, EvalError::ArgumentCount { .. }), "got: {err}");
    let err = eval_expr("iif(true, 1)", json!({})).unwrap_err();
    assert!(matches!(err, EvalError::ArgumentCount { .. }), "got: {err}");
}

#[test]
fn invalid_regex_surfaces_on_use() {
    let err = eval_expr(r#"s matches regex "[unclosed""#, json!({"s": "x"})).unwrap_err();
    assert!(matches!(err, EvalError::InvalidRegex(_)), "got: {err}");
}

#[test]
fn non_boolean_predicate() {
    let err = pipeline("T | where x").on_next(&rec(json!({"x": "maybe"}))).unwrap_err();
    assert!(matches!(err, EvalError::EvaluationTypeMismatch(_)), "got: {err}");
}

#[test]
fn arithmetic_failures() {
    let err = eval_expr("x / 0", json!({"x": 4})).unwrap_err();
    assert!(matches!(err, EvalError::InvalidArgument(_)), "got: {err}");
    let err = eval_expr("x + 1", json!({"x": 9223372036854775807i64})).unwrap_err();
    assert!(matches!(err, EvalError::InvalidArgument(_)), "got: {err}");
    let err = eval_expr("x * 2", json!({"x": true})).unwrap_err();
    assert!(matches!(err, EvalError::UnsupportedType { .. }), "got: {err}");
}

#[test]
fn out_of_range_time_arithmetic() {
    let huge = json!({"Span": "100000000.00:00:00"});
    for text in [
        "ago(totimespan(Span))",
        "now(totimespan(Span))",
        "datetime(2020-01-01) between (datetime(2020-01-01) .. totimespan(Span))",
    ] {
        let err = eval_expr(text, huge.clone()).unwrap_err();
        assert!(matches!(err, EvalError::InvalidArgument(_)), "{text}: {err}");
    }

    let err = eval_expr("bin(x, 7)", json!({"x": i64::MIN})).unwrap_err();
    assert!(matches!(err, EvalError::InvalidArgument(_)), "got: {err}");
}

#[test]
fn timespan_beyond_range_converts_to_null() {
    let value = eval_expr("totimespan('106751991167.23:00:00')", json!({})).unwrap();
    assert_eq!(value, Value::Null);
}

#[test]
fn throw_surfaces_message() {
    let err = eval_expr(r#"throw("custom failure")"#, json!({})).unwrap_err();
    assert!(matches!(err, EvalError::FunctionThrow(ref m) if m == "custom failure"));
}

#[test]
fn aggregation_outside_summarize() {
    let err = eval_expr("count()", json!({})).unwrap_err();
    assert!(matches!(err, EvalError::InvalidArgument(_)), "got: {err}");
}

#[test]
fn recursion_depth_is_bounded() {
    let registry = Arc::new(FunctionRegistry::new());
    registry
        .add_function_text(".create-or-alter function Forever(n: long) { Forever(n + 1) }")
        .unwrap();
    let mut p = Pipeline::parse("T | extend y = Forever(0)", registry).unwrap();
    let err = p.on_next(&rec(json!({}))).unwrap_err();
    assert!(
        matches!(err, EvalError::InvalidArgument(ref m) if m.contains("call depth")),
        "got: {err}"
    );
}

#[test]
fn user_function_arity_mismatch() {
    let registry = Arc::new(FunctionRegistry::new());
    registry
        .add_function_text(".create-or-alter function Add(a: long, b: long) { a + b }")
        .unwrap();
    let mut p = Pipeline::parse("T | extend y = Add(1)", registry).unwrap();
    let err = p.on_next(&rec(json!({}))).unwrap_err();
    assert!(matches!(err, EvalError::ArgumentCount { .. }), "got: {err}");
}

#[test]
fn evaluate_requires_property_bag_result() {
    let err = pipeline("T | evaluate strcat(a, b)")
        .on_next(&rec(json!({"a": "x", "b": "y"})))
        .unwrap_err();
    assert!(matches!(err, EvalError::EvaluationTypeMismatch(_)), "got: {err}");
}
