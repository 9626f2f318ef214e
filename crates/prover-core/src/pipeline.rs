//! Generation run, single-file check, checkpoint summary and serve commands.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};

use lean_repl::VerificationBridge;
use policy::{PromptStyle, SglangClient, SglangConfig, DEFAULT_HEADER};
use proof_records::{load_benchmark, read_checkpoint, write_checkpoint, ProofRecord};
use scheduler::{
    InferenceGenerator, Problem, ProofVerifier, RemoteBridge, RoundReport, Scheduler,
};

use crate::config::{build_checker_config, load_or_default, CheckerCli};
use crate::results::RunSummary;
use crate::server::{run_server, ServerState};

/// Arguments for the `run` subcommand.
#[derive(Debug)]
pub struct RunArgs {
    pub config: PathBuf,
    pub benchmark: PathBuf,
    pub checkpoint: PathBuf,
    pub server_url: String,
    pub checker_url: Option<String>,
    pub model_id: Option<String>,
    pub attempts: Option<usize>,
    pub micro_batch_size: Option<usize>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_new_tokens: Option<usize>,
    pub rounds: usize,
    pub no_stop_on_success: bool,
    pub max_problems: Option<usize>,
    pub resume: bool,
    pub checker: CheckerCli,
}

/// Arguments for the `check` subcommand.
#[derive(Debug)]
pub struct CheckArgs {
    pub config: PathBuf,
    pub proof_file: PathBuf,
    pub header_file: Option<PathBuf>,
    pub timeout: Option<u64>,
    pub allow_incomplete: bool,
    pub checker: CheckerCli,
}

/// Arguments for the `summary` subcommand.
#[derive(Debug)]
pub struct SummaryArgs {
    pub checkpoint: PathBuf,
    pub json: bool,
}

/// Arguments for the `serve` subcommand.
#[derive(Debug)]
pub struct ServeArgs {
    pub config: PathBuf,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub checker: CheckerCli,
}

/// Sample, verify and checkpoint proofs for every benchmark problem.
pub async fn run_generate(args: RunArgs) -> anyhow::Result<()> {
    let start = Instant::now();

    // 1. Load config and apply CLI overrides
    let toml = load_or_default(&args.config)?;
    let mut sched_config = toml.scheduler;
    if let Some(n) = args.attempts {
        sched_config.max_attempts_per_problem = n;
    }
    if let Some(n) = args.micro_batch_size {
        sched_config.micro_batch_size = n;
    }
    if args.no_stop_on_success {
        sched_config.stop_on_success = false;
    }
    let mut params = toml.generation;
    if let Some(t) = args.temperature {
        params.temperature = t;
    }
    if let Some(p) = args.top_p {
        params.top_p = p;
    }
    if let Some(n) = args.max_new_tokens {
        params.max_new_tokens = n;
    }
    let stop_on_success = sched_config.stop_on_success;
    let scheduler = Scheduler::new(sched_config)?;

    // 2. Load benchmark (and previous attempts)
    let mut records = load_benchmark(&args.benchmark)?;
    if let Some(max) = args.max_problems {
        records.truncate(max);
    }
    if args.resume && args.checkpoint.exists() {
        let previous = read_checkpoint(&args.checkpoint)?;
        let merged = merge_previous_attempts(&mut records, previous);
        tracing::info!(problems = merged, "Resumed attempts from checkpoint");
    }

    // 3. Build prompts
    let model_id = args.model_id.as_deref().unwrap_or("default");
    let style = PromptStyle::for_model(model_id);
    tracing::info!(model = model_id, style = %style, "Selected prompt style");
    let per_problem = scheduler.config().max_attempts_per_problem;
    let problems: Vec<Problem> = records
        .into_iter()
        .map(|(key, record)| {
            let spent = record.count_attempts();
            let problem = Problem::from_record(key, style, record);
            if args.resume && spent > 0 {
                problem.with_budget(per_problem.saturating_sub(spent))
            } else {
                problem
            }
        })
        .collect();
    let order: HashMap<String, usize> = problems
        .iter()
        .enumerate()
        .map(|(i, p)| (p.key.clone(), i))
        .collect();

    // 4. Checker: remote, or a local session whose start failure aborts the run
    let mut local_bridge = None;
    let verifier: Box<dyn ProofVerifier> = match &args.checker_url {
        Some(url) => {
            tracing::info!(url = %url, "Using remote checker");
            Box::new(RemoteBridge::new(url)?)
        }
        None => {
            let checker_config = build_checker_config(&toml.checker, &args.checker)?;
            let bridge = Arc::new(VerificationBridge::new(checker_config));
            bridge
                .init()
                .await
                .context("Failed to start the checker session")?;
            local_bridge = Some(Arc::clone(&bridge));
            Box::new(bridge)
        }
    };

    // 5. Inference server
    let client = SglangClient::new(SglangConfig::new(args.server_url.clone())).await?;
    let generator = InferenceGenerator::new(client, params);

    // 6. Scheduling rounds, checkpointing after each
    let mut problems = problems;
    for round in 1..=args.rounds.max(1) {
        let (mut active, done) = split_active(problems, stop_on_success);
        if active.is_empty() {
            tracing::info!(round, "Nothing left to schedule");
            problems = done;
            break;
        }

        let budget: u64 = active
            .iter()
            .map(|p| p.budget.unwrap_or(per_problem) as u64)
            .sum();
        let pb = ProgressBar::new(budget);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        pb.set_message(format!("round {round}/{}", args.rounds.max(1)));

        let result = {
            let checkpoint = &args.checkpoint;
            let done = &done;
            let pb = pb.clone();
            let mut observer =
                move |report: &RoundReport, active: &[Problem]| -> anyhow::Result<()> {
                    pb.inc(report.batch.len() as u64);
                    let snapshot: Vec<(String, ProofRecord)> = active
                        .iter()
                        .chain(done.iter())
                        .map(|p| (p.key.clone(), p.record.clone()))
                        .collect();
                    write_checkpoint(checkpoint, &snapshot)?;
                    Ok(())
                };
            scheduler
                .run(&mut active, &generator, verifier.as_ref(), &mut observer)
                .await
        };
        pb.finish_with_message(format!("round {round} done"));
        let result = result?;
        tracing::info!(
            round,
            solved = result.stats.solved,
            attempts = result.stats.attempts_recorded,
            "Scheduling round finished"
        );

        problems = active
            .into_iter()
            .chain(done)
            .map(|mut p| {
                p.budget = None;
                p
            })
            .collect();
        problems.sort_by_key(|p| order.get(&p.key).copied().unwrap_or(usize::MAX));
    }

    // 7. Final checkpoint and shutdown
    let records: Vec<(String, ProofRecord)> = problems
        .into_iter()
        .map(|p| (p.key, p.record))
        .collect();
    write_checkpoint(&args.checkpoint, &records)?;
    if let Some(bridge) = local_bridge {
        bridge.teardown().await;
    }

    // 8. Print summary
    let summary = RunSummary::from_records(&records);
    println!("\n--- Generation Summary ---");
    print!("{}", summary.render());
    println!("Checkpoint: {}", args.checkpoint.display());
    println!("Elapsed: {:.1}s", start.elapsed().as_secs_f64());

    Ok(())
}

/// Check a single proof file against a local checker session.
pub async fn run_check(args: CheckArgs) -> anyhow::Result<()> {
    let toml = load_or_default(&args.config)?;
    let proof = std::fs::read_to_string(&args.proof_file)
        .with_context(|| format!("Failed to read {}", args.proof_file.display()))?;
    let header = match &args.header_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => DEFAULT_HEADER.to_string(),
    };

    let checker_config = build_checker_config(&toml.checker, &args.checker)?;
    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| checker_config.check_timeout());
    let bridge = VerificationBridge::new(checker_config);
    bridge
        .init()
        .await
        .context("Failed to start the checker session")?;

    let started = Instant::now();
    let outcome = bridge
        .check_proof(&proof, &header, args.allow_incomplete, timeout)
        .await;
    bridge.teardown().await;

    println!("File: {}", args.proof_file.display());
    println!("Verified: {}", outcome.verified);
    println!("Diagnostic: {}", outcome.diagnostic);
    println!("Time: {:.2}s", started.elapsed().as_secs_f64());

    if !outcome.verified {
        anyhow::bail!("Proof rejected by the checker");
    }
    Ok(())
}

/// Print statistics from a checkpoint file.
pub fn run_summary(args: SummaryArgs) -> anyhow::Result<()> {
    let records = read_checkpoint(&args.checkpoint)?;
    let summary = RunSummary::from_records(&records);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    println!("--- Checkpoint Summary ---");
    println!("File: {}", args.checkpoint.display());
    print!("{}", summary.render());
    Ok(())
}

/// Serve the checker over HTTP until Ctrl-C.
pub async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    let toml = load_or_default(&args.config)?;
    let checker_config = build_checker_config(&toml.checker, &args.checker)?;
    tracing::info!(
        project = %checker_config.project_dir.display(),
        upload_dir = %args.upload_dir.display(),
        "Starting checker service"
    );
    let state = Arc::new(ServerState {
        bridge: Arc::new(VerificationBridge::new(checker_config)),
        upload_dir: args.upload_dir,
    });
    run_server(state, args.port).await
}

/// Separate problems still to be scheduled from those already finished.
///
/// With stop-on-success, solved problems are finished. Order within each
/// group is preserved.
pub fn split_active(problems: Vec<Problem>, stop_on_success: bool) -> (Vec<Problem>, Vec<Problem>) {
    problems
        .into_iter()
        .partition(|p| !(stop_on_success && p.record.has_solution()))
}

/// Append attempts from a previous checkpoint to matching benchmark records.
///
/// Returns how many records received attempts. Keys absent from the
/// benchmark are ignored.
pub fn merge_previous_attempts(
    records: &mut [(String, ProofRecord)],
    previous: Vec<(String, ProofRecord)>,
) -> usize {
    let mut previous: HashMap<String, ProofRecord> = previous.into_iter().collect();
    let mut merged = 0;
    for (key, record) in records.iter_mut() {
        if let Some(old) = previous.remove(key) {
            if old.count_attempts() > 0 {
                record.extend_attempts(old.attempts().iter().cloned());
                merged += 1;
            }
        }
    }
    if !previous.is_empty() {
        tracing::warn!(
            ignored = previous.len(),
            "Checkpoint holds problems not in the benchmark"
        );
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use lean_repl::{CheckOutcome, Diagnostic};
    use proof_records::Attempt;

    fn record(name: &str) -> ProofRecord {
        ProofRecord::new(format!("theorem {name} : True := by"), "import Mathlib\n")
    }

    fn attempt(success: bool) -> Attempt {
        let outcome = if success {
            CheckOutcome::verified()
        } else {
            CheckOutcome::rejected(Diagnostic::text("no"))
        };
        Attempt::from_outcome("raw", "trivial", outcome, Duration::ZERO, Duration::ZERO)
    }

    #[test]
    fn test_split_active_skips_solved_only_with_stop() {
        let mut solved = record("a");
        solved.add_attempt(attempt(true));
        let problems = vec![
            Problem::from_record("a", PromptStyle::Default, solved),
            Problem::from_record("b", PromptStyle::Default, record("b")),
        ];

        let (active, done) = split_active(problems.clone(), true);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].key, "b");
        assert_eq!(done[0].key, "a");

        let (active, done) = split_active(problems, false);
        assert_eq!(active.len(), 2);
        assert!(done.is_empty());
    }

    #[test]
    fn test_merge_previous_attempts() {
        let mut records = vec![("a".to_string(), record("a")), ("b".to_string(), record("b"))];
        let mut old_a = record("a");
        old_a.add_attempt(attempt(false));
        old_a.add_attempt(attempt(true));
        let previous = vec![
            ("a".to_string(), old_a),
            ("b".to_string(), record("b")),
            ("gone".to_string(), record("gone")),
        ];

        let merged = merge_previous_attempts(&mut records, previous);
        assert_eq!(merged, 1);
        assert_eq!(records[0].1.count_attempts(), 2);
        assert_eq!(records[0].1.solution(), Some("trivial"));
        assert_eq!(records[1].1.count_attempts(), 0);
    }
}
