//! Micro-batched generate-and-verify scheduling for whole-proof synthesis.
//!
//! Wires together lean-repl (checking) and policy (generation) to sample up
//! to a fixed number of candidate proofs per problem. Uses trait-based
//! abstraction so the scheduling algorithm can be tested with mocks (no
//! Lean, no LLM).
//!
//! # Key types
//!
//! - [`Scheduler`] - fills micro-batches and records every attempt
//! - [`SchedulerConfig`] - configuration loaded from TOML
//! - [`Problem`] - rendered prompt, completion parser and record for one key
//! - [`SampleGenerator`] / [`ProofVerifier`] - traits for inference and checking
//! - [`InferenceGenerator`] - SGLang-backed generator
//! - [`RemoteBridge`] - checker reached over HTTP

pub mod adapters;
pub mod config;
pub mod engine;
pub mod mocks;
pub mod remote;

pub use adapters::InferenceGenerator;
pub use config::SchedulerConfig;
pub use engine::{
    NoopObserver, Problem, ProofVerifier, RoundObserver, RoundReport, RunResult, RunStats,
    SampleGenerator, Scheduler, SchedulerError,
};
pub use remote::RemoteBridge;
