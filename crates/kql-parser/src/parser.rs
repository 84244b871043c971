//! Query file reader.
//!
//! A query file (`.kql` / `.csl`) is a sequence of paragraphs separated by
//! blank lines:
//! - `//` lines attach to the paragraph as its comment
//! - a paragraph beginning with `.create-or-alter function` declares a
//!   user function
//! - any other paragraph beginning with `.` is a control command and is skipped
//! - every remaining paragraph is one standing query

use std::path::Path;

use serde::Serialize;

use crate::ast::UserFunction;
use crate::error::Result;
use crate::query::parse_function_definition;

/// One query paragraph and the comment lines that preceded it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuerySource {
    pub comment: String,
    pub text: String,
}

/// Everything read from one or more query files.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryFile {
    pub queries: Vec<QuerySource>,
    pub functions: Vec<UserFunction>,
    /// Function declarations that failed to parse. Queries are not parsed
    /// here, so they never land in this list.
    pub errors: Vec<String>,
}

impl QueryFile {
    pub fn new() -> Self {
        Self::default()
    }

    fn extend(&mut self, other: QueryFile) {
        self.queries.extend(other.queries);
        self.functions.extend(other.functions);
        self.errors.extend(other.errors);
    }
}

/// Split query file text into queries and function declarations.
pub fn parse_query_file_str(text: &str) -> QueryFile {
    let mut file = QueryFile::new();
    let mut comment: Vec<&str> = Vec::new();
    let mut body: Vec<&str> = Vec::new();

    for line in text.lines().chain(std::iter::once("")) {
        let line = line.trim();
        if line.is_empty() {
            if !body.is_empty() {
                finish_paragraph(&mut file, comment.join("\n"), body.join("\n"));
            }
            comment.clear();
            body.clear();
            continue;
        }
        if let Some(stripped) = line.strip_prefix("//") {
            comment.push(stripped.trim());
        } else {
            body.push(line);
        }
    }

    file
}

fn finish_paragraph(file: &mut QueryFile, comment: String, text: String) {
    if !text.starts_with('.') {
        file.queries.push(QuerySource { comment, text });
        return;
    }
    if !is_function_declaration(&text) {
        log::debug!("skipping control command: {text}");
        return;
    }
    match parse_function_definition(&text) {
        Ok(mut function) => {
            function.comment = comment;
            file.functions.push(function);
        }
        Err(e) => file.errors.push(e.to_string()),
    }
}

fn is_function_declaration(text: &str) -> bool {
    let mut words = text[1..].split_whitespace();
    matches!(
        (words.next(), words.next()),
        (Some("create-or-alter" | "create" | "alter"), Some("function"))
    )
}

/// Read a single query file.
pub fn parse_query_file(path: &Path) -> Result<QueryFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_query_file_str(&content))
}

/// Read every `.kql` and `.csl` file under a directory (recursively).
///
/// Files are visited in name order so query order is stable across runs.
pub fn parse_query_directory(dir: &Path) -> Result<QueryFile> {
    let mut collection = QueryFile::new();

    fn walk(dir: &Path, collection: &mut QueryFile) -> Result<()> {
        let mut entries = std::fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();
        for path in entries {
            if path.is_dir() {
                walk(&path, collection)?;
            } else if matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("kql" | "csl")
            ) {
                match parse_query_file(&path) {
                    Ok(sub) => collection.extend(sub),
                    Err(e) => collection.errors.push(format!("{}: {e}", path.display())),
                }
            }
        }
        Ok(())
    }

    walk(dir, &mut collection)?;
    Ok(collection)
}
