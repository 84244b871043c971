use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use kql_eval::{
    FunctionRegistry, Host, HostConfig, ProcessResult, QueryDefinition, RecoveryPolicy,
    StandingQuery, record_from_str, record_to_json,
};
use kql_parser::{QueryFile, parse_query, parse_query_directory, parse_query_file};

#[derive(Parser)]
#[command(name = "kql")]
#[command(about = "Parse, validate, and run streaming KQL queries over NDJSON events")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a single query and print the AST as JSON
    Parse {
        /// The query text
        query: String,

        /// Pretty-print JSON output
        #[arg(short, long, default_value_t = true)]
        pretty: bool,
    },

    /// Parse query files or directories (recursive) and report results
    Validate {
        /// Query files (.kql / .csl) or directories containing them
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Show details for each error (not just the summary)
        #[arg(short, long)]
        verbose: bool,
    },

    /// Run standing queries over NDJSON events read from stdin
    ///
    /// Every output record is printed as one JSON object carrying the
    /// originating query. Windows still open at end of input are flushed.
    Run {
        /// Query file or directory (can be specified multiple times)
        #[arg(short = 'q', long = "queries")]
        queries: Vec<PathBuf>,

        /// Inline query text (can be specified multiple times)
        #[arg(short = 'e', long = "query")]
        expressions: Vec<String>,

        /// What to do with a query after it fails on a record
        #[arg(long, value_enum, default_value_t = Recovery::Resubscribe)]
        recovery: Recovery,

        /// Print query failures to stderr as JSON
        #[arg(long)]
        failure_events: bool,

        /// Pretty-print JSON output
        #[arg(short, long)]
        pretty: bool,

        /// Print per-query statistics to stderr at the end
        #[arg(long)]
        stats: bool,
    },

    /// Evaluate one query against a single event
    Eval {
        /// The query text
        #[arg(short = 'e', long = "query")]
        query: String,

        /// The event as a JSON object
        #[arg(long)]
        event: String,

        /// Pretty-print JSON output
        #[arg(short, long)]
        pretty: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Recovery {
    Dispose,
    Resubscribe,
}

impl From<Recovery> for RecoveryPolicy {
    fn from(recovery: Recovery) -> Self {
        match recovery {
            Recovery::Dispose => RecoveryPolicy::Dispose,
            Recovery::Resubscribe => RecoveryPolicy::Resubscribe,
        }
    }
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Parse { query, pretty } => cmd_parse(query, pretty),
        Commands::Validate { paths, verbose } => cmd_validate(paths, verbose),
        Commands::Run {
            queries,
            expressions,
            recovery,
            failure_events,
            pretty,
            stats,
        } => cmd_run(
            queries,
            expressions,
            HostConfig {
                recovery: recovery.into(),
                emit_failure_events: failure_events,
            },
            pretty,
            stats,
        ),
        Commands::Eval {
            query,
            event,
            pretty,
        } => cmd_eval(query, event, pretty),
    }
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_parse(query: String, pretty: bool) {
    match parse_query(&query) {
        Ok(ast) => print_json(&ast, pretty),
        Err(e) => {
            eprintln!("Query parse error: {e}");
            process::exit(1);
        }
    }
}

fn cmd_validate(paths: Vec<PathBuf>, verbose: bool) {
    let mut queries = 0usize;
    let mut functions = 0usize;
    let mut errors = Vec::new();

    for path in &paths {
        let file = load_file(path);
        functions += file.functions.len();
        errors.extend(file.errors);
        for source in &file.queries {
            queries += 1;
            if let Err(e) = parse_query(&source.text) {
                let label = source.comment.lines().next().unwrap_or(&source.text);
                errors.push(format!("{label}: {e}"));
            }
        }
    }

    println!("Parsed {} path(s)", paths.len());
    println!("  Queries:      {queries}");
    println!("  Functions:    {functions}");
    println!("  Parse errors: {}", errors.len());

    if verbose && !errors.is_empty() {
        println!("\nErrors:");
        for err in &errors {
            println!("  - {err}");
        }
    }

    if !errors.is_empty() {
        process::exit(1);
    }
}

fn cmd_run(
    query_paths: Vec<PathBuf>,
    expressions: Vec<String>,
    config: HostConfig,
    pretty: bool,
    stats: bool,
) {
    let mut host = Host::new(config);

    for path in &query_paths {
        match host.add_query_file(path) {
            Ok(report) => {
                eprintln!(
                    "Loaded {} queries and {} functions from {}",
                    report.added.len(),
                    report.functions.len(),
                    path.display()
                );
                print_warnings(&report.errors);
            }
            Err(e) => {
                eprintln!("Error loading queries from {}: {e}", path.display());
                process::exit(1);
            }
        }
    }
    for text in &expressions {
        let id = host.add_query("", text);
        if let Some(failed) = host.failed_queries().iter().find(|q| q.id == id) {
            eprintln!(
                "Error in query '{text}': {}",
                failed.failure_reason.as_deref().unwrap_or_default()
            );
            process::exit(1);
        }
    }

    if host.queries().is_empty() {
        eprintln!("No queries to run.");
        process::exit(1);
    }
    log::info!(
        "running {} standing queries ({} failed to build)",
        host.queries().iter().filter(|q| q.valid).count(),
        host.failed_queries().len()
    );

    let stdin = io::stdin();
    let mut line_num = 0u64;
    let mut output_count = 0u64;

    for line in stdin.lock().lines() {
        line_num += 1;
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading line {line_num}: {e}");
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let record = match record_from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Invalid JSON event on line {line_num}: {e}");
                continue;
            }
        };

        output_count += print_result(&host.on_next(&record), pretty);
    }

    log::debug!("input closed after {line_num} lines, flushing windows");
    output_count += print_result(&host.on_completed(), pretty);

    if stats {
        for stat in host.stats() {
            match serde_json::to_string(&stat) {
                Ok(j) => eprintln!("{j}"),
                Err(e) => eprintln!("JSON serialization error: {e}"),
            }
        }
    }

    eprintln!("Processed {line_num} events, {output_count} outputs.");
}

fn cmd_eval(query: String, event: String, pretty: bool) {
    let record = match record_from_str(&event) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Invalid JSON event: {e}");
            process::exit(1);
        }
    };

    let standing = StandingQuery::new(1, QueryDefinition::new(query), FunctionRegistry::global());
    if let Some(reason) = &standing.failure_reason {
        eprintln!("Query error: {reason}");
        process::exit(1);
    }

    match standing.evaluate(&record) {
        Ok(outputs) if outputs.is_empty() => eprintln!("No output."),
        Ok(outputs) => {
            for output in &outputs {
                print_json(&record_to_json(output), pretty);
            }
        }
        Err(e) => {
            eprintln!("Evaluation error: {e}");
            process::exit(1);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_file(path: &Path) -> QueryFile {
    log::debug!("loading queries from {}", path.display());
    let file = if path.is_dir() {
        parse_query_directory(path)
    } else {
        parse_query_file(path)
    };
    match file {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error loading queries from {}: {e}", path.display());
            process::exit(1);
        }
    }
}

/// Print outputs to stdout and failures to stderr; returns the output count.
fn print_result(result: &ProcessResult, pretty: bool) -> u64 {
    for output in &result.outputs {
        let line = serde_json::json!({
            "query": output.query_name,
            "comment": output.comment,
            "output": record_to_json(&output.record),
        });
        print_json(&line, pretty);
    }
    for failure in &result.failures {
        match serde_json::to_string(failure) {
            Ok(j) => eprintln!("{j}"),
            Err(e) => eprintln!("JSON serialization error: {e}"),
        }
    }
    result.outputs.len() as u64
}

fn print_warnings(errors: &[String]) {
    if !errors.is_empty() {
        eprintln!("Warnings:");
        for err in errors {
            eprintln!("  - {err}");
        }
    }
}

fn print_json(value: &impl serde::Serialize, pretty: bool) {
    let json = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match json {
        Ok(j) => println!("{j}"),
        Err(e) => {
            eprintln!("JSON serialization error: {e}");
            process::exit(1);
        }
    }
}
