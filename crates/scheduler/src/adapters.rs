//! Bridges between scheduler traits and real crate types (lean-repl, policy).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lean_repl::{CheckOutcome, VerificationBridge};
use policy::{GenerationParams, SglangClient};

use crate::engine::{ProofVerifier, SampleGenerator, SchedulerError};

// ---------------------------------------------------------------------------
// SampleGenerator for SGLang
// ---------------------------------------------------------------------------

/// Sends each micro-batch to an SGLang server in one request.
pub struct InferenceGenerator {
    client: SglangClient,
    params: GenerationParams,
}

impl InferenceGenerator {
    pub fn new(client: SglangClient, params: GenerationParams) -> Self {
        Self { client, params }
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }
}

#[async_trait]
impl SampleGenerator for InferenceGenerator {
    async fn generate_batch(&self, prompts: &[String]) -> Result<Vec<String>, SchedulerError> {
        self.client
            .generate_batch(prompts, &self.params)
            .await
            .map_err(SchedulerError::Generation)
    }
}

// ---------------------------------------------------------------------------
// ProofVerifier for the local checker session
// ---------------------------------------------------------------------------

#[async_trait]
impl ProofVerifier for Arc<VerificationBridge> {
    async fn check_proof(
        &self,
        candidate: &str,
        header: &str,
        allow_incomplete: bool,
        timeout: Duration,
    ) -> CheckOutcome {
        VerificationBridge::check_proof(self, candidate, header, allow_incomplete, timeout).await
    }
}
