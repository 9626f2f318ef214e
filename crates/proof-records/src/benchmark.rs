//! Benchmark loading.
//!
//! A benchmark file maps problem names to problems:
//!
//! ```json
//! {
//!   "mathd_algebra_10": {
//!     "formal_statement": "theorem mathd_algebra_10 : ... := by",
//!     "header": "import Mathlib\n...",
//!     "informal_statement": "...",
//!     "variants": {"no_nl": {}, "proof1_full": {"nl_proof": "..."}}
//!   }
//! }
//! ```
//!
//! Problems with variants expand to one record per `name/variant` key.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::types::{ProofRecord, RecordError};

#[derive(Debug, Deserialize)]
struct BenchmarkProblem {
    #[serde(default)]
    formal_statement: Option<String>,
    #[serde(default)]
    header: Option<String>,
    #[serde(default)]
    informal_statement: Option<String>,
    #[serde(default)]
    nl_proof: Option<String>,
    #[serde(default)]
    variants: BTreeMap<String, BenchmarkVariant>,
}

/// Per-variant overrides of the problem's hint fields.
#[derive(Debug, Default, Deserialize)]
struct BenchmarkVariant {
    #[serde(default)]
    informal_statement: Option<String>,
    #[serde(default)]
    nl_proof: Option<String>,
}

/// Load a benchmark file into records keyed by problem (or `problem/variant`).
pub fn load_benchmark(path: &Path) -> Result<Vec<(String, ProofRecord)>, RecordError> {
    let text = std::fs::read_to_string(path).map_err(|e| RecordError::io(path, e))?;
    let records = parse_benchmark(&text)?;
    tracing::info!(
        path = %path.display(),
        records = records.len(),
        "Loaded benchmark"
    );
    Ok(records)
}

/// Parse benchmark JSON. Problems come out sorted by name.
pub fn parse_benchmark(json: &str) -> Result<Vec<(String, ProofRecord)>, RecordError> {
    let problems: BTreeMap<String, BenchmarkProblem> = serde_json::from_str(json)?;

    let mut records = Vec::with_capacity(problems.len());
    for (name, problem) in problems {
        let formal_statement = problem
            .formal_statement
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| RecordError::MissingField {
                problem: name.clone(),
                field: "formal_statement",
            })?;
        let header = problem
            .header
            .filter(|h| !h.trim().is_empty())
            .ok_or_else(|| RecordError::EmptyHeader(name.clone()))?;

        if problem.variants.is_empty() {
            let record = ProofRecord::new(formal_statement, header)
                .with_informal_statement(problem.informal_statement)
                .with_nl_proof(problem.nl_proof);
            records.push((name, record));
            continue;
        }

        for (variant, overrides) in problem.variants {
            let record = ProofRecord::new(formal_statement.clone(), header.clone())
                .with_informal_statement(
                    overrides
                        .informal_statement
                        .or_else(|| problem.informal_statement.clone()),
                )
                .with_nl_proof(overrides.nl_proof);
            records.push((format!("{name}/{variant}"), record));
        }
    }
    Ok(records)
}
