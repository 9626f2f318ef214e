//! Summary statistics over a checkpoint of proof records.

use proof_records::ProofRecord;
use serde::{Deserialize, Serialize};

/// Aggregate results of a generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Number of problems (or problem variants).
    pub problems: usize,
    /// Problems with a verified proof.
    pub solved: usize,
    /// Attempts across all problems.
    pub attempts: usize,
    /// Verified attempts across all problems.
    pub successful_attempts: usize,
    /// Fraction solved (solved / problems).
    pub solve_rate: f64,
    /// Mean attempts per problem.
    pub mean_attempts: f64,
    /// Mean attempts made up to and including the first success, over
    /// solved problems.
    pub mean_attempts_to_solve: f64,
    /// Mean generation time per attempt in seconds.
    pub mean_generation_secs: f64,
    /// Mean verification time per attempt in seconds.
    pub mean_verification_secs: f64,
    /// Median verification time per attempt in seconds.
    pub median_verification_secs: f64,
    /// Per-problem results.
    pub per_problem: Vec<ProblemSummary>,
}

/// Result for a single problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemSummary {
    pub key: String,
    pub solved: bool,
    pub attempts: usize,
    /// 1-based index of the first verified attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_success: Option<usize>,
}

impl RunSummary {
    pub fn from_records(records: &[(String, ProofRecord)]) -> Self {
        let per_problem: Vec<ProblemSummary> = records
            .iter()
            .map(|(key, record)| ProblemSummary {
                key: key.clone(),
                solved: record.has_solution(),
                attempts: record.count_attempts(),
                first_success: record
                    .attempts()
                    .iter()
                    .position(|a| a.success)
                    .map(|i| i + 1),
            })
            .collect();

        let problems = records.len();
        let solved = per_problem.iter().filter(|p| p.solved).count();
        let attempts: usize = per_problem.iter().map(|p| p.attempts).sum();
        let successful_attempts = records.iter().map(|(_, r)| r.count_successes()).sum();

        let generation: f64 = records
            .iter()
            .map(|(_, r)| r.total_generation_time().as_secs_f64())
            .sum();
        let mut verification: Vec<f64> = records
            .iter()
            .flat_map(|(_, r)| r.attempts().iter().map(|a| a.verification_time.as_secs_f64()))
            .collect();
        let verification_total: f64 = verification.iter().sum();

        let to_solve: Vec<usize> = per_problem.iter().filter_map(|p| p.first_success).collect();

        Self {
            problems,
            solved,
            attempts,
            successful_attempts,
            solve_rate: ratio(solved as f64, problems),
            mean_attempts: ratio(attempts as f64, problems),
            mean_attempts_to_solve: ratio(to_solve.iter().sum::<usize>() as f64, to_solve.len()),
            mean_generation_secs: ratio(generation, attempts),
            mean_verification_secs: ratio(verification_total, attempts),
            median_verification_secs: median(&mut verification),
            per_problem,
        }
    }

    /// Human-readable report, as printed by `lean-synth summary`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Problems: {}\n", self.problems));
        out.push_str(&format!(
            "Solved: {}/{} ({:.1}%)\n",
            self.solved,
            self.problems,
            self.solve_rate * 100.0
        ));
        out.push_str(&format!(
            "Attempts: {} ({} verified, {:.2} per problem)\n",
            self.attempts, self.successful_attempts, self.mean_attempts
        ));
        if self.solved > 0 {
            out.push_str(&format!(
                "Attempts to first success: {:.2}\n",
                self.mean_attempts_to_solve
            ));
        }
        out.push_str(&format!(
            "Mean generation time: {:.2}s\n",
            self.mean_generation_secs
        ));
        out.push_str(&format!(
            "Mean verification time: {:.2}s (median {:.2}s)\n",
            self.mean_verification_secs, self.median_verification_secs
        ));
        out
    }
}

fn ratio(total: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// Compute the median of a slice of f64 values.
///
/// Returns 0.0 for empty slices.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}
