//! SGLang HTTP client for whole-proof generation.
//!
//! Provides [`SglangClient`] which sends one micro-batch of prompts per
//! request to SGLang's native `/generate` endpoint and returns one
//! completion per prompt, in order.
//!
//! # Server Setup
//!
//! ```bash
//! python -m sglang.launch_server \
//!     --model-path deepseek-ai/DeepSeek-Prover-V2-7B \
//!     --port 30000
//! ```

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::Serialize;
use url::Url;

use crate::types::{GenerationParams, SglangConfig};

/// Consecutive transport failures after which requests stop going out.
const TRIP_AFTER: u32 = 3;
/// How long a tripped client refuses requests before trying again.
const COOLDOWN: Duration = Duration::from_secs(60);

/// Shared transport-failure tracker.
///
/// After `TRIP_AFTER` connection errors or timeouts in a row every request
/// fails fast until `COOLDOWN` has passed. Any HTTP response resets it.
#[derive(Debug, Clone, Default)]
struct FailFast {
    inner: Arc<Mutex<FailFastState>>,
}

#[derive(Debug, Default)]
struct FailFastState {
    streak: u32,
    open_until: Option<Instant>,
}

impl FailFast {
    fn guard(&self) -> anyhow::Result<()> {
        let mut state = self.inner.lock().unwrap();
        match state.open_until {
            Some(until) if Instant::now() < until => anyhow::bail!(
                "Inference server marked down after {} transport failures, retry in {}s",
                state.streak,
                until.saturating_duration_since(Instant::now()).as_secs()
            ),
            Some(_) => {
                tracing::info!("Inference server cooldown elapsed, sending requests again");
                *state = FailFastState::default();
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn reached(&self) {
        *self.inner.lock().unwrap() = FailFastState::default();
    }

    fn unreachable(&self) {
        let mut state = self.inner.lock().unwrap();
        state.streak += 1;
        if state.streak >= TRIP_AFTER && state.open_until.is_none() {
            state.open_until = Some(Instant::now() + COOLDOWN);
            tracing::error!(
                streak = state.streak,
                cooldown_s = COOLDOWN.as_secs(),
                "Inference server unreachable, failing requests fast"
            );
        }
    }
}

/// HTTP client for an SGLang inference server.
#[derive(Clone)]
pub struct SglangClient {
    client: Client,
    base_url: Url,
    config: SglangConfig,
    fail_fast: FailFast,
}

/// Body of a batched `/generate` call: one prompt per element of `text`.
#[derive(Serialize)]
struct BatchGenerateRequest<'a> {
    text: &'a [String],
    sampling_params: SamplingParams,
}

#[derive(Serialize)]
struct SamplingParams {
    max_new_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
}

impl From<&GenerationParams> for SamplingParams {
    fn from(params: &GenerationParams) -> Self {
        Self {
            max_new_tokens: params.max_new_tokens,
            temperature: Some(params.temperature),
            top_p: Some(params.top_p),
        }
    }
}

impl SglangClient {
    /// Connect and make sure the server answers.
    pub async fn new(config: SglangConfig) -> anyhow::Result<Self> {
        let client = Self::connect_lazy(config)?;
        client.health_check().await?;
        Ok(client)
    }

    /// Build a client without touching the network.
    pub fn connect_lazy(config: SglangConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.server_url)
            .map_err(|e| anyhow::anyhow!("Invalid server URL '{}': {e}", config.server_url))?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            config,
            fail_fast: FailFast::default(),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.config.server_url
    }

    /// `GET /health`, falling back to a one-token generation for servers
    /// without that route.
    pub async fn health_check(&self) -> anyhow::Result<()> {
        let url = self.base_url.join("/health")?;
        let resp = self
            .client
            .get(url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!("Inference server unreachable at {}: {e}", self.config.server_url)
            })?;

        if !resp.status().is_success() {
            tracing::debug!(status = %resp.status(), "No /health route, probing /generate");
            self.probe_generate().await?;
        }
        tracing::info!(url = %self.config.server_url, "Inference server is up");
        Ok(())
    }

    /// Generate one completion per prompt in a single request.
    ///
    /// Prompts must already carry the model's chat template. The result has
    /// the same length and order as `prompts`; a completion may be empty.
    pub async fn generate_batch(
        &self,
        prompts: &[String],
        params: &GenerationParams,
    ) -> anyhow::Result<Vec<String>> {
        if prompts.is_empty() {
            return Ok(vec![]);
        }

        let request = BatchGenerateRequest {
            text: prompts,
            sampling_params: SamplingParams::from(params),
        };

        let url = self.base_url.join("/generate")?;
        let resp = self.post_with_retry(&url, &request).await?;
        let body: serde_json::Value = resp.json().await.map_err(|e| {
            anyhow::anyhow!("Failed to decode SGLang batch generate response: {e}")
        })?;

        let outputs = parse_batch_response(&body, prompts.len())?;
        tracing::debug!(
            prompts = prompts.len(),
            empty = outputs.iter().filter(|o| o.is_empty()).count(),
            "SGLang batch generation complete"
        );
        Ok(outputs)
    }

    /// POST `body`, retrying 5xx answers with exponential backoff.
    ///
    /// 4xx answers and transport errors are not retried.
    async fn post_with_retry<T: Serialize>(
        &self,
        url: &Url,
        body: &T,
    ) -> anyhow::Result<reqwest::Response> {
        self.fail_fast.guard()?;

        let attempts = self.config.max_attempts.max(1);
        let mut backoff = Duration::from_secs(1);
        let mut attempt = 1;
        loop {
            let resp = match self.client.post(url.clone()).json(body).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!(error = %e, url = %url, "Inference request did not reach the server");
                    self.fail_fast.unreachable();
                    anyhow::bail!("Inference request failed: {e}");
                }
            };
            self.fail_fast.reached();

            let status = resp.status();
            if status.is_success() {
                return Ok(resp);
            }
            let detail = resp.text().await.unwrap_or_default();
            if !status.is_server_error() || attempt >= attempts {
                anyhow::bail!("{} from inference server: {detail}", describe(status));
            }
            tracing::debug!(
                attempt,
                status = %status,
                backoff_ms = backoff.as_millis() as u64,
                "Retrying inference request"
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2;
            attempt += 1;
        }
    }

    /// Ask for a single token to confirm `/generate` works.
    async fn probe_generate(&self) -> anyhow::Result<()> {
        let prompts = ["ping".to_string()];
        let request = BatchGenerateRequest {
            text: &prompts,
            sampling_params: SamplingParams {
                max_new_tokens: 1,
                temperature: Some(0.0),
                top_p: None,
            },
        };
        let url = self.base_url.join("/generate")?;
        let resp = self.client.post(url).json(&request).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            anyhow::bail!("Generate probe got {}: {detail}", describe(status));
        }
        Ok(())
    }
}

fn describe(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("HTTP {} {reason}", status.as_u16()),
        None => format!("HTTP {}", status.as_u16()),
    }
}

/// Pull the `text` field out of each item of a batch response.
fn parse_batch_response(body: &serde_json::Value, expected: usize) -> anyhow::Result<Vec<String>> {
    let items = body.as_array().ok_or_else(|| {
        let preview: String = body.to_string().chars().take(200).collect();
        anyhow::anyhow!("Expected JSON array for batch generate response, got: {preview}")
    })?;

    if items.len() != expected {
        anyhow::bail!(
            "Batch generate response length mismatch: expected {expected}, got {}",
            items.len()
        );
    }

    Ok(items
        .iter()
        .map(|item| {
            item.get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        })
        .collect())
}
