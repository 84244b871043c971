use thiserror::Error;

/// Errors that can occur while parsing queries, expressions and query files.
#[derive(Debug, Error)]
pub enum KqlParserError {
    /// A query or expression was malformed. Carries the offending text and
    /// one diagnostic per problem found.
    #[error("Error parsing query '{query}': {}", .diagnostics.join("; "))]
    QueryParsing {
        query: String,
        diagnostics: Vec<String>,
    },

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Invalid literal '{0}'")]
    InvalidLiteral(String),

    #[error("Invalid timespan '{0}'")]
    InvalidTimespan(String),

    #[error("Invalid function definition: {0}")]
    InvalidFunctionDefinition(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KqlParserError {
    /// Wrap any non-IO error as a [`KqlParserError::QueryParsing`] for `query`.
    pub(crate) fn for_query(self, query: &str) -> KqlParserError {
        match self {
            KqlParserError::QueryParsing { .. } | KqlParserError::Io(_) => self,
            other => KqlParserError::QueryParsing {
                query: query.to_string(),
                diagnostics: vec![other.to_string()],
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, KqlParserError>;
