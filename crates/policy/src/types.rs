//! Configuration and data types for the policy crate.

use serde::{Deserialize, Serialize};

/// Sampling settings for whole-proof generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    /// Sampling temperature. Defaults to 1.0.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Top-p (nucleus) sampling threshold. Defaults to 0.95.
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    /// Maximum tokens to generate per sample. Defaults to 8192.
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,
}

fn default_temperature() -> f64 {
    1.0
}
fn default_top_p() -> f64 {
    0.95
}
fn default_max_new_tokens() -> usize {
    8192
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_new_tokens: default_max_new_tokens(),
        }
    }
}

/// Configuration for connecting to an SGLang server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SglangConfig {
    /// Base URL of the SGLang server (e.g., "http://localhost:30000").
    pub server_url: String,
    /// Upper bound on one batch request. Long proofs at 8k tokens are slow.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Attempts per request on 5xx responses.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

fn default_request_timeout() -> u64 {
    1800
}
fn default_max_attempts() -> usize {
    3
}

impl SglangConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            request_timeout_secs: default_request_timeout(),
            max_attempts: default_max_attempts(),
        }
    }
}
