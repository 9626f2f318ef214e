//! Micro-batched generate-and-verify scheduler.
//!
//! Each round fills one batch of prompts, starting with the earliest problem
//! that still has budget and topping up with later problems, makes a single
//! inference call, then verifies every sample in batch order against the
//! shared checker. Verification is strictly sequential.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;

use lean_repl::CheckOutcome;
use policy::PromptConfig;
use proof_records::{Attempt, ProofRecord};

use crate::config::SchedulerConfig;

/// Errors that can abort a scheduling run.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Settings the scheduler cannot run with.
    #[error("Invalid scheduler configuration: {0}")]
    Config(String),
    /// Error from the inference backend.
    #[error("Generation error: {0}")]
    Generation(#[source] anyhow::Error),
    /// The round observer (e.g. checkpoint writer) failed.
    #[error("Round observer failed: {0}")]
    Observer(#[source] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Batch inference: one completion per prompt, in order.
#[async_trait]
pub trait SampleGenerator: Send + Sync {
    async fn generate_batch(&self, prompts: &[String]) -> Result<Vec<String>, SchedulerError>;
}

/// Checks one candidate proof. Failures are reported in the outcome.
#[async_trait]
pub trait ProofVerifier: Send + Sync {
    async fn check_proof(
        &self,
        candidate: &str,
        header: &str,
        allow_incomplete: bool,
        timeout: Duration,
    ) -> CheckOutcome;
}

/// Called after every round, e.g. to write a checkpoint.
pub trait RoundObserver: Send {
    fn on_round(&mut self, report: &RoundReport, problems: &[Problem]) -> anyhow::Result<()>;
}

impl<F> RoundObserver for F
where
    F: FnMut(&RoundReport, &[Problem]) -> anyhow::Result<()> + Send,
{
    fn on_round(&mut self, report: &RoundReport, problems: &[Problem]) -> anyhow::Result<()> {
        self(report, problems)
    }
}

/// Observer that does nothing.
pub struct NoopObserver;

impl RoundObserver for NoopObserver {
    fn on_round(&mut self, _report: &RoundReport, _problems: &[Problem]) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Problem / reports
// ---------------------------------------------------------------------------

/// A problem being scheduled: its rendered prompt, the parser for its
/// completions, and the record that collects its attempts.
#[derive(Debug, Clone)]
pub struct Problem {
    pub key: String,
    pub prompt: String,
    pub parser: PromptConfig,
    pub record: ProofRecord,
    /// Overrides `max_attempts_per_problem` for this problem.
    pub budget: Option<usize>,
}

impl Problem {
    /// Render the prompt from `parser` and attach `record`.
    pub fn new(key: impl Into<String>, parser: PromptConfig, record: ProofRecord) -> Self {
        Self {
            key: key.into(),
            prompt: parser.render(),
            parser,
            record,
            budget: None,
        }
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Build prompt and parser from the record's own fields.
    pub fn from_record(
        key: impl Into<String>,
        style: policy::PromptStyle,
        record: ProofRecord,
    ) -> Self {
        let parser = PromptConfig::new(style, record.formal_statement(), record.header())
            .with_informal_statement(record.informal_statement().map(str::to_string))
            .with_nl_proof(record.nl_proof().map(str::to_string));
        Self::new(key, parser, record)
    }

    pub fn header(&self) -> &str {
        self.record.header()
    }
}

/// What happened in one round.
#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    /// 1-based round number within the run.
    pub round: usize,
    /// Keys in batch order, one per slot.
    pub batch: Vec<String>,
    pub samples: usize,
    pub attempts: usize,
    pub discarded: usize,
    pub skipped: usize,
    pub newly_solved: usize,
    pub inference_failed: bool,
    pub elapsed: Duration,
}

/// Counters for a whole run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub rounds: usize,
    /// Completions returned by the inference backend.
    pub samples_generated: usize,
    pub attempts_recorded: usize,
    /// Samples dropped because their problem was already solved.
    pub discarded: usize,
    /// Empty completions and slots of failed inference calls.
    pub skipped: usize,
    pub failed_batches: usize,
    /// Problems with at least one verified attempt in this run.
    pub solved: usize,
    pub generation_time: Duration,
    pub verification_time: Duration,
}

/// Attempts added in this run, per key in input order, plus counters.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub attempts: Vec<(String, Vec<Attempt>)>,
    pub stats: RunStats,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler, rejecting a zero micro-batch size.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run every problem to its budget (or first success).
    ///
    /// Inference errors are logged and their slots count as consumed. Only
    /// an observer failure aborts the run.
    pub async fn run(
        &self,
        problems: &mut [Problem],
        generator: &dyn SampleGenerator,
        verifier: &dyn ProofVerifier,
        observer: &mut dyn RoundObserver,
    ) -> Result<RunResult, SchedulerError> {
        let batch_size = self.config.micro_batch_size;
        let stop_on_success = self.config.stop_on_success;
        let timeout = self.config.verify_timeout();
        let allow_incomplete = self.config.allow_incomplete_proofs;

        let start_counts: Vec<usize> = problems.iter().map(|p| p.record.count_attempts()).collect();
        let mut remaining: Vec<usize> = problems
            .iter()
            .map(|p| p.budget.unwrap_or(self.config.max_attempts_per_problem))
            .collect();
        let mut solved = vec![false; problems.len()];
        let mut stats = RunStats::default();

        tracing::info!(
            problems = problems.len(),
            budget = self.config.max_attempts_per_problem,
            batch_size,
            stop_on_success,
            "Starting generation run"
        );

        loop {
            let eligible =
                |i: usize, remaining: &[usize], solved: &[bool]| remaining[i] > 0 && !(stop_on_success && solved[i]);

            let Some(current) = (0..problems.len()).find(|&i| eligible(i, &remaining, &solved)) else {
                break;
            };

            let mut slots = Vec::with_capacity(batch_size);
            let take = remaining[current].min(batch_size);
            slots.extend(std::iter::repeat(current).take(take));
            for next in current + 1..problems.len() {
                if slots.len() >= batch_size {
                    break;
                }
                if eligible(next, &remaining, &solved) {
                    let take = remaining[next].min(batch_size - slots.len());
                    slots.extend(std::iter::repeat(next).take(take));
                }
            }
            for &i in &slots {
                remaining[i] -= 1;
            }

            stats.rounds += 1;
            let round_start = Instant::now();
            let mut report = RoundReport {
                round: stats.rounds,
                batch: slots.iter().map(|&i| problems[i].key.clone()).collect(),
                samples: 0,
                attempts: 0,
                discarded: 0,
                skipped: 0,
                newly_solved: 0,
                inference_failed: false,
                elapsed: Duration::ZERO,
            };

            let prompts: Vec<String> = slots.iter().map(|&i| problems[i].prompt.clone()).collect();
            let gen_start = Instant::now();
            match generator.generate_batch(&prompts).await {
                Ok(outputs) => {
                    let gen_elapsed = gen_start.elapsed();
                    stats.generation_time += gen_elapsed;
                    if outputs.len() != slots.len() {
                        tracing::warn!(
                            expected = slots.len(),
                            got = outputs.len(),
                            "Inference returned a different number of samples than requested"
                        );
                        report.skipped += slots.len().saturating_sub(outputs.len());
                    }
                    let per_sample = if outputs.is_empty() {
                        Duration::ZERO
                    } else {
                        gen_elapsed / outputs.len() as u32
                    };
                    report.samples = outputs.len();

                    for (&i, raw) in slots.iter().zip(outputs.iter()) {
                        if stop_on_success && solved[i] {
                            report.discarded += 1;
                            continue;
                        }
                        if raw.trim().is_empty() {
                            tracing::warn!(key = %problems[i].key, "Empty completion, skipping sample");
                            report.skipped += 1;
                            continue;
                        }

                        let problem = &mut problems[i];
                        let parsed = problem.parser.parse(raw);
                        let verify_start = Instant::now();
                        let outcome = verifier
                            .check_proof(&parsed, problem.record.header(), allow_incomplete, timeout)
                            .await;
                        let verify_elapsed = verify_start.elapsed();
                        stats.verification_time += verify_elapsed;

                        let success = outcome.verified;
                        tracing::debug!(
                            key = %problem.key,
                            success,
                            verify_ms = verify_elapsed.as_millis() as u64,
                            "Sample verified"
                        );
                        problem.record.add_attempt(Attempt::from_outcome(
                            raw.clone(),
                            parsed,
                            outcome,
                            per_sample,
                            verify_elapsed,
                        ));
                        report.attempts += 1;

                        if success && !solved[i] {
                            solved[i] = true;
                            report.newly_solved += 1;
                            tracing::info!(key = %problem.key, "Problem solved");
                        }
                        if success && stop_on_success {
                            remaining[i] = 0;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        slots = slots.len(),
                        round = stats.rounds,
                        "Inference call failed, skipping batch"
                    );
                    stats.generation_time += gen_start.elapsed();
                    stats.failed_batches += 1;
                    report.inference_failed = true;
                    report.skipped += slots.len();
                }
            }

            stats.samples_generated += report.samples;
            stats.attempts_recorded += report.attempts;
            stats.discarded += report.discarded;
            stats.skipped += report.skipped;
            stats.solved += report.newly_solved;
            report.elapsed = round_start.elapsed();

            tracing::info!(
                round = report.round,
                batch = report.batch.len(),
                attempts = report.attempts,
                solved = stats.solved,
                elapsed_s = report.elapsed.as_secs_f64(),
                "Round complete"
            );

            observer
                .on_round(&report, problems)
                .map_err(SchedulerError::Observer)?;
        }

        let attempts = problems
            .iter()
            .zip(start_counts)
            .map(|(p, start)| (p.key.clone(), p.record.attempts()[start..].to_vec()))
            .collect();

        tracing::info!(
            rounds = stats.rounds,
            attempts = stats.attempts_recorded,
            solved = stats.solved,
            "Generation run complete"
        );

        Ok(RunResult { attempts, stats })
    }
}
