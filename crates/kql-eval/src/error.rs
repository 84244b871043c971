//! Evaluation-specific error types.

use thiserror::Error;

use kql_parser::Value;

/// Errors that can occur while building or evaluating a pipeline.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A function name did not resolve to a user, native or built-in function.
    #[error("unknown function: '{0}'")]
    UnknownFunction(String),

    /// An operator or function does not handle this runtime type.
    #[error("unsupported type '{type_name}' for {operation}")]
    UnsupportedType {
        operation: String,
        type_name: String,
    },

    /// A function was called with the wrong number of arguments.
    #[error("function '{function}' expects {expected} argument(s), got {actual}")]
    ArgumentCount {
        function: String,
        expected: String,
        actual: usize,
    },

    /// A function argument was malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operand did not have the type the operation expects.
    #[error("type mismatch: {0}")]
    EvaluationTypeMismatch(String),

    /// Raised by the `throw()` function.
    #[error("{0}")]
    FunctionThrow(String),

    /// A regex pattern failed to compile.
    #[error("invalid regex pattern: {0}")]
    InvalidRegex(#[from] regex::Error),

    /// A parser error propagated while building a pipeline.
    #[error("parser error: {0}")]
    Parser(#[from] kql_parser::KqlParserError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EvalError {
    pub(crate) fn unsupported(operation: impl Into<String>, value: &Value) -> Self {
        EvalError::UnsupportedType {
            operation: operation.into(),
            type_name: value.type_name().to_string(),
        }
    }

    pub(crate) fn arity(function: &str, expected: impl Into<String>, actual: usize) -> Self {
        EvalError::ArgumentCount {
            function: function.to_string(),
            expected: expected.into(),
            actual,
        }
    }

    pub(crate) fn mismatch(message: impl Into<String>) -> Self {
        EvalError::EvaluationTypeMismatch(message.into())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EvalError>;
