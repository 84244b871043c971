//! Expression evaluation against a single record.
//!
//! Evaluation is a direct recursion over the [`Expr`] tree. Function names are
//! resolved through the [`FunctionRegistry`] on every call, so functions
//! registered after a query was built are picked up, and an unknown name only
//! fails when a record actually reaches the call.

use std::sync::Arc;

use kql_parser::{BinaryOp, Expr, Record, UserFunction, Value};

use crate::aggregation::is_aggregation;
use crate::error::{EvalError, Result};
use crate::event::field_or_empty;
use crate::operators::{arithmetic, between, compare, equals, string_match, to_i64, truthy};
use crate::registry::{FunctionRegistry, Resolved};

/// Maximum nesting of user-defined function calls.
pub const MAX_CALL_DEPTH: usize = 64;

fn empty() -> Value {
    Value::Str(String::new())
}

#[derive(Debug, Clone)]
pub struct Evaluator {
    registry: Arc<FunctionRegistry>,
}

impl Evaluator {
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Evaluator { registry }
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// Evaluate an expression against a record.
    pub fn eval(&self, expr: &Expr, record: &Record) -> Result<Value> {
        self.eval_at(expr, record, 0)
    }

    /// Evaluate an expression and interpret the result as a predicate.
    pub fn eval_predicate(&self, expr: &Expr, record: &Record) -> Result<bool> {
        truthy(&self.eval(expr, record)?)
    }

    fn eval_at(&self, expr: &Expr, record: &Record, depth: usize) -> Result<Value> {
        match expr {
            Expr::Const(value) => Ok(value.clone()),
            Expr::Property(name) => Ok(field_or_empty(record, name)),
            Expr::Path { base, selector } => match self.eval_at(base, record, depth)? {
                Value::Record(fields) => Ok(fields.get(selector).cloned().unwrap_or_else(empty)),
                // `a.b` where `a` is not a bag: try the flat key "a.b".
                _ => Ok(dotted_name(expr)
                    .map(|name| field_or_empty(record, &name))
                    .unwrap_or_else(empty)),
            },
            Expr::Index { base, index } => {
                let base = self.eval_at(base, record, depth)?;
                let index = self.eval_at(index, record, depth)?;
                Ok(match base {
                    Value::List(items) => list_element(items, &index),
                    Value::Record(mut fields) => {
                        fields.swap_remove(&index.to_string()).unwrap_or_else(empty)
                    }
                    _ => empty(),
                })
            }
            Expr::Call { name, args } => self.call(name, args, record, depth),
            Expr::Not(inner) => Ok(Value::Bool(!truthy(&self.eval_at(inner, record, depth)?)?)),
            Expr::Binary { op, left, right } => self.binary(*op, left, right, record, depth),
            Expr::Between {
                value,
                low,
                high,
                negated,
            } => {
                let value = self.eval_at(value, record, depth)?;
                let low = self.eval_at(low, record, depth)?;
                let high = self.eval_at(high, record, depth)?;
                Ok(Value::Bool(between(&value, &low, &high)? != *negated))
            }
            Expr::In {
                value,
                candidates,
                case_insensitive,
                negated,
            } => {
                let value = self.eval_at(value, record, depth)?;
                let mut found = false;
                for candidate in candidates {
                    let candidate = self.eval_at(candidate, record, depth)?;
                    if is_member(&value, &candidate, *case_insensitive) {
                        found = true;
                        break;
                    }
                }
                Ok(Value::Bool(found != *negated))
            }
        }
    }

    fn binary(
        &self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        record: &Record,
        depth: usize,
    ) -> Result<Value> {
        // and/or short-circuit
        if op.is_logical() {
            let lhs = truthy(&self.eval_at(left, record, depth)?)?;
            if (op == BinaryOp::And) != lhs {
                return Ok(Value::Bool(lhs));
            }
            return Ok(Value::Bool(truthy(&self.eval_at(right, record, depth)?)?));
        }

        let l = self.eval_at(left, record, depth)?;
        let r = self.eval_at(right, record, depth)?;
        match op {
            BinaryOp::Eq => Ok(Value::Bool(equals(&l, &r, false)?)),
            BinaryOp::NotEq => Ok(Value::Bool(!equals(&l, &r, false)?)),
            BinaryOp::EqCi => Ok(Value::Bool(equals(&l, &r, true)?)),
            BinaryOp::NotEqCi => Ok(Value::Bool(!equals(&l, &r, true)?)),
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                Ok(Value::Bool(compare(op, &l, &r)?))
            }
            op if op.is_arithmetic() => arithmetic(op, &l, &r),
            op => Ok(Value::Bool(string_match(op, &l, &r)?)),
        }
    }

    fn call(&self, name: &str, args: &[Expr], record: &Record, depth: usize) -> Result<Value> {
        // special forms: arguments are evaluated lazily or not at all
        match name {
            "iif" | "iff" => {
                if args.len() != 3 {
                    return Err(EvalError::arity(name, "3", args.len()));
                }
                let branch = if truthy(&self.eval_at(&args[0], record, depth)?)? {
                    &args[1]
                } else {
                    &args[2]
                };
                return self.eval_at(branch, record, depth);
            }
            "case" => {
                if args.len() < 3 {
                    return Err(EvalError::arity(name, "at least 3", args.len()));
                }
                if args.len() % 2 == 0 {
                    return Err(EvalError::InvalidArgument(
                        "case expects predicate/value pairs followed by an else value".to_string(),
                    ));
                }
                for pair in args[..args.len() - 1].chunks_exact(2) {
                    if truthy(&self.eval_at(&pair[0], record, depth)?)? {
                        return self.eval_at(&pair[1], record, depth);
                    }
                }
                return self.eval_at(&args[args.len() - 1], record, depth);
            }
            "typeof" => {
                if args.len() != 1 {
                    return Err(EvalError::arity(name, "1", args.len()));
                }
                return Ok(match &args[0] {
                    Expr::Property(type_name) => Value::Str(type_name.clone()),
                    other => Value::from(self.eval_at(other, record, depth)?.type_name()),
                });
            }
            _ => {}
        }

        match self.registry.resolve(name) {
            Some(Resolved::User(function)) => self.call_user(&function, args, record, depth),
            Some(Resolved::Native(function)) => function(&self.eval_args(args, record, depth)?),
            Some(Resolved::Builtin(function)) => function(&self.eval_args(args, record, depth)?),
            None if is_aggregation(name) => Err(EvalError::InvalidArgument(format!(
                "aggregation '{name}' is only valid inside summarize"
            ))),
            None => Err(EvalError::UnknownFunction(name.to_string())),
        }
    }

    fn eval_args(&self, args: &[Expr], record: &Record, depth: usize) -> Result<Vec<Value>> {
        args.iter()
            .map(|arg| self.eval_at(arg, record, depth))
            .collect()
    }

    /// Bind arguments to parameters in a fresh scope and evaluate the body
    /// against that scope only.
    fn call_user(
        &self,
        function: &UserFunction,
        args: &[Expr],
        record: &Record,
        depth: usize,
    ) -> Result<Value> {
        if args.len() != function.params.len() {
            return Err(EvalError::arity(
                &function.name,
                function.params.len().to_string(),
                args.len(),
            ));
        }
        if depth >= MAX_CALL_DEPTH {
            return Err(EvalError::InvalidArgument(format!(
                "call depth limit of {MAX_CALL_DEPTH} exceeded in '{}'",
                function.name
            )));
        }

        let mut scope = Record::with_capacity(args.len());
        for (param, arg) in function.params.iter().zip(args) {
            scope.insert(param.name.clone(), self.eval_at(arg, record, depth)?);
        }
        self.eval_at(&function.body, &scope, depth + 1)
    }
}

/// `a.b.c` as a flat field name, when the path is built from properties only.
fn dotted_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Property(name) => Some(name.clone()),
        Expr::Path { base, selector } => dotted_name(base).map(|b| format!("{b}.{selector}")),
        _ => None,
    }
}

fn list_element(mut items: Vec<Value>, index: &Value) -> Value {
    let Some(i) = to_i64(index) else {
        return empty();
    };
    let i = if i < 0 { items.len() as i64 + i } else { i };
    match usize::try_from(i) {
        Ok(i) if i < items.len() => items.swap_remove(i),
        _ => empty(),
    }
}

/// `in` membership. A list candidate contributes each of its elements.
fn is_member(value: &Value, candidate: &Value, case_insensitive: bool) -> bool {
    match candidate {
        Value::List(items) => items
            .iter()
            .any(|item| equals(value, item, case_insensitive).unwrap_or(false)),
        other => equals(value, other, case_insensitive).unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kql_parser::parse_expression;
    use serde_json::json;

    use crate::event::record_from_json;

    fn eval_with(registry: Arc<FunctionRegistry>, text: &str, event: serde_json::Value) -> Result<Value> {
        let expr = parse_expression(text).unwrap();
        Evaluator::new(registry).eval(&expr, &record_from_json(event).unwrap())
    }

    fn eval(text: &str, event: serde_json::Value) -> Result<Value> {
        eval_with(Arc::new(FunctionRegistry::new()), text, event)
    }

    #[test]
    fn test_missing_property_is_empty_string() {
        assert_eq!(eval("missing", json!({})).unwrap(), Value::from(""));
        assert_eq!(eval("isempty(missing)", json!({})).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_case_sensitivity_of_equality() {
        let event = json!({"S": "ABC"});
        assert_eq!(eval(r#"S == "aBc""#, event.clone()).unwrap(), Value::Bool(false));
        assert_eq!(eval(r#"S =~ "aBc""#, event.clone()).unwrap(), Value::Bool(true));
        assert_eq!(eval(r#"S !~ "aBc""#, event).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_between_and_negation() {
        for (target, expected) in [(34, true), (14, false), (30, true), (37, true), (38, false)] {
            let event = json!({"target": target});
            assert_eq!(
                eval("target between (30 .. 37)", event.clone()).unwrap(),
                Value::Bool(expected)
            );
            assert_eq!(
                eval("target !between (30 .. 37)", event).unwrap(),
                Value::Bool(!expected)
            );
        }
        assert_eq!(
            eval("target !between (30 .. 37)", json!({})).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_in_variants() {
        let event = json!({"User": "Admin"});
        assert_eq!(eval(r#"User in ("admin", "root")"#, event.clone()).unwrap(), Value::Bool(false));
        assert_eq!(eval(r#"User in~ ("admin", "root")"#, event.clone()).unwrap(), Value::Bool(true));
        assert_eq!(eval(r#"User !in ("admin", "root")"#, event.clone()).unwrap(), Value::Bool(true));
        assert_eq!(eval(r#"User !in~ ("admin", "root")"#, event.clone()).unwrap(), Value::Bool(false));
        assert_eq!(
            eval(r#"User in (dynamic(["x", "Admin"]))"#, event).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_paths_and_indexes() {
        let event = json!({
            "actor": {"id": "u1", "roles": ["a", "b"]},
            "flat.key": 5
        });
        assert_eq!(eval("actor.id", event.clone()).unwrap(), Value::from("u1"));
        assert_eq!(eval("actor.roles[1]", event.clone()).unwrap(), Value::from("b"));
        assert_eq!(eval("actor.roles[-1]", event.clone()).unwrap(), Value::from("b"));
        assert_eq!(eval("actor.roles[9]", event.clone()).unwrap(), Value::from(""));
        assert_eq!(eval(r#"actor["id"]"#, event.clone()).unwrap(), Value::from("u1"));
        assert_eq!(eval("actor.missing", event.clone()).unwrap(), Value::from(""));
        assert_eq!(eval("flat.key", event.clone()).unwrap(), Value::Long(5));
        assert_eq!(eval("actor.id[0]", event).unwrap(), Value::from(""));
    }

    #[test]
    fn test_logical_short_circuit() {
        // the right side would fail if evaluated
        assert_eq!(
            eval("false and nosuchfn()", json!({})).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(eval("true or nosuchfn()", json!({})).unwrap(), Value::Bool(true));
        assert!(eval("true and nosuchfn()", json!({})).is_err());
    }

    #[test]
    fn test_non_bool_predicate_is_error() {
        let err = eval("not(5)", json!({})).unwrap_err();
        assert!(matches!(err, EvalError::EvaluationTypeMismatch(_)));
    }

    #[test]
    fn test_iif_and_case() {
        let event = json!({"n": 7});
        assert_eq!(eval(r#"iif(n > 5, "big", "small")"#, event.clone()).unwrap(), Value::from("big"));
        assert_eq!(
            eval(r#"case(n < 3, "low", n < 8, "mid", "high")"#, event.clone()).unwrap(),
            Value::from("mid")
        );
        assert_eq!(
            eval(r#"case(n < 3, "low", "high")"#, event.clone()).unwrap(),
            Value::from("high")
        );
        let err = eval(r#"case(n < 3, "low", n < 8, "mid")"#, event).unwrap_err();
        assert!(matches!(err, EvalError::InvalidArgument(_)));
    }

    #[test]
    fn test_unknown_function() {
        let err = eval("foo(1)", json!({})).unwrap_err();
        assert!(matches!(err, EvalError::UnknownFunction(ref n) if n == "foo"));
    }

    #[test]
    fn test_aggregation_outside_summarize() {
        let err = eval("count()", json!({})).unwrap_err();
        assert!(matches!(err, EvalError::InvalidArgument(_)));
    }

    #[test]
    fn test_user_function_scope() {
        let registry = Arc::new(FunctionRegistry::new());
        registry
            .add_function_text(".create-or-alter function Double(x: long) { x * 2 }")
            .unwrap();
        registry
            .add_function_text(".create-or-alter function Leaky() { Outer }")
            .unwrap();

        let event = json!({"n": 21, "Outer": "visible"});
        assert_eq!(
            eval_with(registry.clone(), "Double(n)", event.clone()).unwrap(),
            Value::Long(42)
        );
        // the body sees only its parameters
        assert_eq!(
            eval_with(registry.clone(), "Leaky()", event.clone()).unwrap(),
            Value::from("")
        );
        let err = eval_with(registry, "Double(1, 2)", event).unwrap_err();
        assert!(matches!(err, EvalError::ArgumentCount { actual: 2, .. }));
    }

    #[test]
    fn test_user_function_recursion_limit() {
        let registry = Arc::new(FunctionRegistry::new());
        registry
            .add_function_text(".create-or-alter function Loop(x: long) { Loop(x + 1) }")
            .unwrap();
        let err = eval_with(registry, "Loop(0)", json!({})).unwrap_err();
        assert!(matches!(err, EvalError::InvalidArgument(ref m) if m.contains("depth")));
    }

    #[test]
    fn test_native_function() {
        let registry = Arc::new(FunctionRegistry::new());
        registry.add_native("answer", |_| Ok(Value::Long(42)));
        assert_eq!(eval_with(registry, "answer() + 1", json!({})).unwrap(), Value::Long(43));
    }

    #[test]
    fn test_typeof() {
        assert_eq!(eval("typeof(long)", json!({})).unwrap(), Value::from("long"));
    }

    #[test]
    fn test_arithmetic_and_strings() {
        let event = json!({"a": 6, "b": "4", "name": "Bob"});
        assert_eq!(eval("a * 2 + 1", event.clone()).unwrap(), Value::Long(13));
        assert_eq!(eval("a - b", event.clone()).unwrap(), Value::Long(2));
        assert_eq!(
            eval(r#"strcat(tolower(name), "_", a)"#, event.clone()).unwrap(),
            Value::from("bob_6")
        );
        assert_eq!(eval(r#"name has "bob""#, event).unwrap(), Value::Bool(true));
    }
}
