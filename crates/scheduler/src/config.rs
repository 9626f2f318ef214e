use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::SchedulerError;

/// Scheduler configuration loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Samples drawn per problem in one run.
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_problem: usize,

    /// Prompts sent to the inference server in one call.
    #[serde(default = "default_micro_batch_size")]
    pub micro_batch_size: usize,

    /// Stop sampling a problem once one attempt verifies.
    #[serde(default = "default_stop_on_success")]
    pub stop_on_success: bool,

    /// Per-candidate checker timeout in seconds.
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,

    /// Accept proofs that still contain `sorry`.
    #[serde(default)]
    pub allow_incomplete_proofs: bool,
}

fn default_max_attempts() -> usize {
    8
}
fn default_micro_batch_size() -> usize {
    8
}
fn default_stop_on_success() -> bool {
    true
}
fn default_verify_timeout() -> u64 {
    20
}

impl SchedulerConfig {
    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.micro_batch_size == 0 {
            return Err(SchedulerError::Config(
                "micro_batch_size must be at least 1".into(),
            ));
        }
        if self.verify_timeout_secs == 0 {
            return Err(SchedulerError::Config(
                "verify_timeout_secs must be at least 1".into(),
            ));
        }
        if self.max_attempts_per_problem == 0 {
            tracing::warn!("max_attempts_per_problem = 0, no samples will be generated");
        }
        Ok(())
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_problem: default_max_attempts(),
            micro_batch_size: default_micro_batch_size(),
            stop_on_success: default_stop_on_success(),
            verify_timeout_secs: default_verify_timeout(),
            allow_incomplete_proofs: false,
        }
    }
}
