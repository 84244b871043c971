use kql_parser::{
    KqlParserError, Stage, parse_expression, parse_function_definition, parse_query,
    parse_query_file, parse_query_file_str,
};

fn diagnostics(err: KqlParserError) -> Vec<String> {
    match err {
        KqlParserError::QueryParsing { diagnostics, .. } => diagnostics,
        other => panic!("expected QueryParsing, got: {other}"),
    }
}

#[test]
fn dangling_operator_fails_with_location() {
    let err = parse_query("T | where a and").unwrap_err();
    let diags = diagnostics(err);
    assert_eq!(diags.len(), 1);
    assert!(diags[0].starts_with("(1:"), "got: {}", diags[0]);
}

#[test]
fn error_carries_query_text() {
    let err = parse_query("T | where (a == 1").unwrap_err();
    match err {
        KqlParserError::QueryParsing { query, .. } => assert_eq!(query, "T | where (a == 1"),
        other => panic!("expected QueryParsing, got: {other}"),
    }
}

#[test]
fn multi_line_error_reports_line() {
    let err = parse_query("T\n| where a == 1\n| project ,").unwrap_err();
    let diags = diagnostics(err);
    assert!(diags[0].starts_with("(3:"), "got: {}", diags[0]);
}

#[test]
fn empty_pipe_fails() {
    assert!(parse_query("T | ").is_err());
    assert!(parse_query("T || where a").is_err());
}

#[test]
fn unsupported_stage_fails() {
    assert!(parse_query("T | sort by a").is_err());
    assert!(parse_query("T | join (U) on a").is_err());
}

#[test]
fn take_requires_a_count() {
    assert!(parse_query("T | take").is_err());
    assert!(parse_query("T | take -1").is_err());
    assert!(matches!(
        parse_query("T | limit 3").unwrap().stages[0],
        Stage::Take(3)
    ));
}

#[test]
fn summarize_requires_aggregation_call() {
    assert!(parse_query("T | summarize by a").is_err());
    assert!(parse_query("T | summarize x by a").is_err());
}

#[test]
fn summarize_zero_bin_rejected() {
    let diags = diagnostics(parse_query("T | summarize count() by bin(Time, 0s)").unwrap_err());
    assert!(diags[0].contains("positive"), "got: {}", diags[0]);
}

#[test]
fn summarize_bin_on_expression_needs_a_name() {
    let err = parse_query("T | summarize count() by bin(todatetime(t), 1m)").unwrap_err();
    let diags = diagnostics(err);
    assert!(diags[0].contains("cannot infer a column name"), "got: {}", diags[0]);

    let query = parse_query("T | summarize count() by Window = bin(todatetime(t), 1m)").unwrap();
    let Stage::Summarize(summarize) = &query.stages[0] else {
        panic!("expected summarize");
    };
    assert_eq!(summarize.bin.as_ref().unwrap().name, "Window");
}

#[test]
fn invalid_dynamic_literal() {
    assert!(parse_expression("dynamic({not json})").is_err());
}

#[test]
fn invalid_guid_literal() {
    assert!(parse_expression("guid(\"not-a-guid\")").is_err());
}

#[test]
fn unterminated_string() {
    assert!(parse_expression("a == \"open").is_err());
}

#[test]
fn in_requires_candidates() {
    assert!(parse_expression("a in ()").is_err());
}

#[test]
fn keyword_prefix_is_an_identifier() {
    // `android` starts with `and`, `origin` with `or`
    assert!(parse_expression("android == origin").is_ok());
    assert!(parse_expression("index in (1, 2)").is_ok());
}

#[test]
fn function_definition_missing_body() {
    let err = parse_function_definition(".create-or-alter function F(x: int)").unwrap_err();
    assert!(matches!(err, KqlParserError::InvalidFunctionDefinition(_)));
}

#[test]
fn query_file_missing_path_is_io_error() {
    let err = parse_query_file(std::path::Path::new("/nonexistent/queries.kql")).unwrap_err();
    assert!(matches!(err, KqlParserError::Io(_)));
}

#[test]
fn query_file_bad_function_does_not_hide_queries() {
    let file = parse_query_file_str(
        ".create-or-alter function Bad(x: int) { x + }\n\nT | take 1\n\nU | take 2\n",
    );
    assert_eq!(file.errors.len(), 1);
    assert_eq!(file.queries.len(), 2);
}
