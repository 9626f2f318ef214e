use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use prover_core::config::CheckerCli;
use prover_core::pipeline::{self, CheckArgs, RunArgs, ServeArgs, SummaryArgs};

/// lean-synth: whole-proof synthesis for Lean 4 with an LLM and a REPL checker.
#[derive(Parser)]
#[command(name = "lean-synth", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands for serving the checker, generating proofs, checking files and summaries.
#[derive(Subcommand)]
enum Command {
    /// Serve the checker session over HTTP.
    Serve {
        /// Path to synth config TOML file.
        #[arg(long, default_value = "configs/synth.toml")]
        config: PathBuf,
        /// Port to listen on.
        #[arg(long, default_value_t = 1347)]
        port: u16,
        /// Directory for files posted to /save_file.
        #[arg(long, default_value = "uploads")]
        upload_dir: PathBuf,
        /// Override the REPL executable.
        #[arg(long)]
        repl_path: Option<PathBuf>,
        /// Override the Lean project directory.
        #[arg(long)]
        project_dir: Option<PathBuf>,
    },
    /// Generate and verify proofs for every problem of a benchmark.
    Run {
        /// Path to synth config TOML file.
        #[arg(long, default_value = "configs/synth.toml")]
        config: PathBuf,
        /// Path to the benchmark JSON file.
        #[arg(long)]
        benchmark: PathBuf,
        /// Path of the JSON checkpoint written after every round.
        #[arg(long)]
        checkpoint: PathBuf,
        /// URL of the SGLang inference server (e.g., http://localhost:30000).
        #[arg(long)]
        server_url: String,
        /// URL of a `lean-synth serve` checker. Default: start a local checker.
        #[arg(long)]
        checker_url: Option<String>,
        /// Model id, used to pick the prompt style.
        #[arg(long)]
        model_id: Option<String>,
        /// Override samples per problem.
        #[arg(long)]
        attempts: Option<usize>,
        /// Override prompts per inference call.
        #[arg(long)]
        micro_batch_size: Option<usize>,
        /// Override sampling temperature.
        #[arg(long)]
        temperature: Option<f64>,
        /// Override top-p.
        #[arg(long)]
        top_p: Option<f64>,
        /// Override maximum tokens per sample.
        #[arg(long)]
        max_new_tokens: Option<usize>,
        /// Number of scheduling passes over the benchmark.
        #[arg(long, default_value_t = 1)]
        rounds: usize,
        /// Keep sampling problems after their first verified proof.
        #[arg(long)]
        no_stop_on_success: bool,
        /// Maximum number of problems to run (truncates the benchmark).
        #[arg(long)]
        max_problems: Option<usize>,
        /// Append to the attempts already in the checkpoint.
        #[arg(long)]
        resume: bool,
        /// Override the REPL executable.
        #[arg(long)]
        repl_path: Option<PathBuf>,
        /// Override the Lean project directory.
        #[arg(long)]
        project_dir: Option<PathBuf>,
    },
    /// Check a single Lean file.
    Check {
        /// Path to synth config TOML file.
        #[arg(long, default_value = "configs/synth.toml")]
        config: PathBuf,
        /// File holding the header the proof is checked against.
        #[arg(long)]
        header_file: Option<PathBuf>,
        /// Check timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Accept proofs that still contain `sorry`.
        #[arg(long)]
        allow_incomplete: bool,
        /// Override the REPL executable.
        #[arg(long)]
        repl_path: Option<PathBuf>,
        /// Override the Lean project directory.
        #[arg(long)]
        project_dir: Option<PathBuf>,
        /// Lean file to check.
        proof_file: PathBuf,
    },
    /// Print statistics from a checkpoint file.
    Summary {
        /// Path to the checkpoint JSON file.
        #[arg(long)]
        checkpoint: PathBuf,
        /// Output as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            upload_dir,
            repl_path,
            project_dir,
        } => {
            pipeline::run_serve(ServeArgs {
                config,
                port,
                upload_dir,
                checker: CheckerCli {
                    project_dir,
                    repl_path,
                },
            })
            .await
        }
        Command::Run {
            config,
            benchmark,
            checkpoint,
            server_url,
            checker_url,
            model_id,
            attempts,
            micro_batch_size,
            temperature,
            top_p,
            max_new_tokens,
            rounds,
            no_stop_on_success,
            max_problems,
            resume,
            repl_path,
            project_dir,
        } => {
            pipeline::run_generate(RunArgs {
                config,
                benchmark,
                checkpoint,
                server_url,
                checker_url,
                model_id,
                attempts,
                micro_batch_size,
                temperature,
                top_p,
                max_new_tokens,
                rounds,
                no_stop_on_success,
                max_problems,
                resume,
                checker: CheckerCli {
                    project_dir,
                    repl_path,
                },
            })
            .await
        }
        Command::Check {
            config,
            header_file,
            timeout,
            allow_incomplete,
            repl_path,
            project_dir,
            proof_file,
        } => {
            pipeline::run_check(CheckArgs {
                config,
                proof_file,
                header_file,
                timeout,
                allow_incomplete,
                checker: CheckerCli {
                    project_dir,
                    repl_path,
                },
            })
            .await
        }
        Command::Summary { checkpoint, json } => {
            pipeline::run_summary(SummaryArgs { checkpoint, json })
        }
    }
}
