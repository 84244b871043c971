//! Synthetic KQL generators for benchmarks.
//!
//! Produces deterministic output when given the same seed, so benchmark runs are
//! reproducible. Each generator returns a `String` of valid query text.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Fixed seed for reproducible benchmarks.
const SEED: u64 = 0xDEAD_BEEF_CAFE;

/// Create a seeded RNG.
pub fn rng() -> StdRng {
    StdRng::seed_from_u64(SEED)
}

// ---------------------------------------------------------------------------
// Field / value pools
// ---------------------------------------------------------------------------

const FIELD_NAMES: &[&str] = &[
    "CommandLine",
    "ParentImage",
    "Image",
    "TargetFilename",
    "SourceIp",
    "DestinationIp",
    "DestinationPort",
    "User",
    "EventType",
    "ProcessName",
    "ServiceName",
    "Computer",
];

const STRING_VALUES: &[&str] = &[
    "whoami",
    "cmd.exe",
    "powershell.exe",
    "mimikatz",
    "lsass.exe",
    "rundll32.exe",
    "certutil.exe",
    "mshta.exe",
];

const STRING_OPS: &[&str] = &[
    "==",
    "=~",
    "contains",
    "has",
    "startswith",
    "endswith",
    "!contains",
    "contains_cs",
];

const TABLES: &[&str] = &["SecurityEvent", "Syslog", "ProcessCreation", "NetworkFlow"];

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

fn gen_predicate(rng: &mut StdRng) -> String {
    let field = FIELD_NAMES[rng.random_range(0..FIELD_NAMES.len())];
    match rng.random_range(0..4u8) {
        0 => format!("DestinationPort between ({} .. {})", rng.random_range(1..1024), rng.random_range(1024..65535)),
        1 => format!("{field} in (\"{}\", \"{}\")", pick(rng, STRING_VALUES), pick(rng, STRING_VALUES)),
        2 => format!("strlen({field}) > {}", rng.random_range(1..200)),
        _ => format!("{field} {} \"{}\"", pick(rng, STRING_OPS), pick(rng, STRING_VALUES)),
    }
}

fn pick<'a>(rng: &mut StdRng, pool: &[&'a str]) -> &'a str {
    pool[rng.random_range(0..pool.len())]
}

/// Generate a single pipeline with a where clause and a projection or summary.
pub fn gen_single_query(rng: &mut StdRng) -> String {
    let table = pick(rng, TABLES);
    let num_predicates = rng.random_range(1..=4);
    let predicates: Vec<String> = (0..num_predicates).map(|_| gen_predicate(rng)).collect();
    let joiner = if rng.random_bool(0.3) { " or " } else { " and " };

    let tail = if rng.random_bool(0.5) {
        format!(
            "| summarize Count = count(), Users = make_set(User) by Computer, bin(TimeCreated, {}m)",
            rng.random_range(1..60)
        )
    } else {
        format!(
            "| extend Lower = tolower({}) | project Computer, Lower, User",
            pick(rng, FIELD_NAMES)
        )
    };
    format!("{table} | where {} {tail}", predicates.join(joiner))
}

/// A query with a deeply nested boolean condition.
pub fn gen_complex_query() -> String {
    let mut rng = rng();
    let mut expr = gen_predicate(&mut rng);
    for i in 0..24 {
        let next = gen_predicate(&mut rng);
        expr = if i % 2 == 0 {
            format!("({expr}) and not({next})")
        } else {
            format!("({expr}) or {next}")
        };
    }
    format!("SecurityEvent | where {expr} | take 100")
}

/// Generate `n` queries as a query file (blank-line separated).
pub fn gen_n_queries(n: usize) -> String {
    let mut rng = rng();
    (0..n)
        .map(|i| format!("// query {i}\n{}", gen_single_query(&mut rng)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Individual query texts.
pub fn gen_query_list(n: usize) -> Vec<String> {
    let mut rng = rng();
    (0..n).map(|_| gen_single_query(&mut rng)).collect()
}
