//! Mock implementations of scheduler traits for testing without Lean or LLM.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lean_repl::{CheckOutcome, Diagnostic};

use crate::engine::{ProofVerifier, SampleGenerator, SchedulerError};

// ---------------------------------------------------------------------------
// MockGenerator
// ---------------------------------------------------------------------------

/// Scripted reply for one `generate_batch` call.
enum Reply {
    Outputs(Vec<String>),
    Fail(String),
}

/// Mock inference backend.
///
/// Scripted replies are consumed one per call. Once they run out, every
/// prompt is answered with a fenced copy of itself.
pub struct MockGenerator {
    script: Mutex<VecDeque<Reply>>,
    batches: Mutex<Vec<Vec<String>>>,
    delay: Duration,
}

impl MockGenerator {
    /// Generator that echoes each prompt inside a ```lean4 block.
    pub fn echo() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            batches: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Sleep this long in every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue the outputs for the next unscripted call.
    pub fn push_outputs<S: Into<String>>(&self, outputs: impl IntoIterator<Item = S>) {
        self.script
            .lock()
            .unwrap()
            .push_back(Reply::Outputs(outputs.into_iter().map(Into::into).collect()));
    }

    /// Queue a failure for the next unscripted call.
    pub fn push_failure(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Reply::Fail(message.to_string()));
    }

    /// Number of `generate_batch` calls made so far.
    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    /// Prompts of every call, in call order.
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl SampleGenerator for MockGenerator {
    async fn generate_batch(&self, prompts: &[String]) -> Result<Vec<String>, SchedulerError> {
        self.batches.lock().unwrap().push(prompts.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let reply = self.script.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Outputs(outputs)) => Ok(outputs),
            Some(Reply::Fail(message)) => {
                Err(SchedulerError::Generation(anyhow::anyhow!(message)))
            }
            None => Ok(prompts
                .iter()
                .map(|p| format!("```lean4\n{p}\n```"))
                .collect()),
        }
    }
}

// ---------------------------------------------------------------------------
// MockVerifier
// ---------------------------------------------------------------------------

/// Mock checker.
///
/// A candidate is accepted when the next scripted verdict says so, or, with
/// no script left, when it contains one of the accepting patterns.
pub struct MockVerifier {
    accept_patterns: Vec<String>,
    verdicts: Mutex<VecDeque<bool>>,
    calls: Mutex<Vec<String>>,
}

impl MockVerifier {
    /// Rejects everything.
    pub fn rejecting() -> Self {
        Self {
            accept_patterns: Vec::new(),
            verdicts: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Accepts candidates containing `pattern`.
    pub fn accepting_containing(pattern: &str) -> Self {
        let mut verifier = Self::rejecting();
        verifier.accept_patterns.push(pattern.to_string());
        verifier
    }

    /// Returns these verdicts in order, then falls back to patterns.
    pub fn with_verdicts(verdicts: impl IntoIterator<Item = bool>) -> Self {
        let verifier = Self::rejecting();
        verifier.verdicts.lock().unwrap().extend(verdicts);
        verifier
    }

    /// Candidates checked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProofVerifier for MockVerifier {
    async fn check_proof(
        &self,
        candidate: &str,
        _header: &str,
        _allow_incomplete: bool,
        _timeout: Duration,
    ) -> CheckOutcome {
        self.calls.lock().unwrap().push(candidate.to_string());
        let scripted = self.verdicts.lock().unwrap().pop_front();
        let accepted = scripted.unwrap_or_else(|| {
            self.accept_patterns
                .iter()
                .any(|p| candidate.contains(p.as_str()))
        });
        if accepted {
            CheckOutcome::verified()
        } else {
            CheckOutcome::rejected(Diagnostic::text("mock: rejected"))
        }
    }
}
