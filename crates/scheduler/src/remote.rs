//! HTTP client for a checker served by `lean-synth serve`.
//!
//! [`RemoteBridge`] speaks the `/status`, `/reinitialize` and `/verify`
//! endpoints and composes programs client-side exactly as the local
//! [`VerificationBridge`](lean_repl::VerificationBridge) does.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use lean_repl::{
    classify_response, compose_program, CheckOutcome, CheckerError, Diagnostic, ReplResponse,
};

use crate::engine::ProofVerifier;

/// Added to the check timeout for the HTTP round trip.
const REQUEST_MARGIN: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct VerifyRequest<'a> {
    theorem: &'a str,
    timeout: u64,
}

/// Subset of the `/status` body the client needs.
#[derive(Debug, Deserialize)]
struct RemoteStatus {
    #[serde(default)]
    ready: bool,
}

#[derive(Debug, Deserialize)]
struct ReinitializeResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// Checker reached over HTTP.
#[derive(Clone)]
pub struct RemoteBridge {
    client: Client,
    base_url: Url,
}

impl RemoteBridge {
    /// Create a client for the server at `url`. No request is made.
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let base_url =
            Url::parse(url).map_err(|e| anyhow::anyhow!("Invalid checker URL '{url}': {e}"))?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, base_url })
    }

    pub fn url(&self) -> &Url {
        &self.base_url
    }

    /// Whether the remote session reports ready.
    pub async fn is_ready(&self) -> anyhow::Result<bool> {
        let url = self.base_url.join("/status")?;
        let resp = self
            .client
            .get(url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Checker unreachable at {}: {e}", self.base_url))?;
        let status: RemoteStatus = resp.json().await?;
        Ok(status.ready)
    }

    /// Ask the server to restart its checker session.
    pub async fn reinitialize(&self) -> anyhow::Result<()> {
        let url = self.base_url.join("/reinitialize")?;
        let resp = self.client.post(url).send().await?;
        let http_status = resp.status();
        let body: ReinitializeResponse = resp.json().await?;
        if http_status.is_success() && body.status == "success" {
            tracing::info!(url = %self.base_url, "Remote checker reinitialized");
            return Ok(());
        }
        anyhow::bail!(
            "{}",
            body.message
                .unwrap_or_else(|| format!("reinitialize returned HTTP {http_status}"))
        )
    }

    /// Submit a program as-is and return the server's response body.
    ///
    /// Error bodies (`{"status": "error", "message": ...}` and the like)
    /// parse into a response whose failure message is set.
    pub async fn verify(&self, program: &str, timeout: Duration) -> anyhow::Result<ReplResponse> {
        let url = self.base_url.join("/verify")?;
        let request = VerifyRequest {
            theorem: program,
            timeout: timeout.as_secs().max(1),
        };
        let resp = self
            .client
            .post(url)
            .json(&request)
            .timeout(timeout + REQUEST_MARGIN)
            .send()
            .await?;
        let http_status = resp.status();
        let body: ReplResponse = resp.json().await.map_err(|e| {
            anyhow::anyhow!("Failed to decode /verify response (HTTP {http_status}): {e}")
        })?;
        Ok(body)
    }

    /// Check one candidate: readiness, at most one reinitialize, verify,
    /// then classify. Every failure becomes a rejected outcome.
    pub async fn check_proof(
        &self,
        candidate: &str,
        header: &str,
        allow_incomplete: bool,
        timeout: Duration,
    ) -> CheckOutcome {
        if candidate.trim().is_empty() {
            return CheckOutcome::from_error(&CheckerError::EmptyCandidate);
        }
        if header.trim().is_empty() {
            return CheckOutcome::from_error(&CheckerError::MissingHeader);
        }
        let program = compose_program(candidate, header);

        let ready = match self.is_ready().await {
            Ok(ready) => ready,
            Err(e) => {
                tracing::warn!(error = %e, "Remote checker status failed");
                return CheckOutcome::rejected(Diagnostic::text(e.to_string()));
            }
        };
        if !ready {
            tracing::info!("Remote checker not ready, reinitializing before check");
            if let Err(e) = self.reinitialize().await {
                return CheckOutcome::from_error(&CheckerError::ReinitializeFailed(e.to_string()));
            }
        }

        match self.verify(&program, timeout).await {
            Ok(response) => classify_response(&response, allow_incomplete),
            Err(e) => {
                tracing::warn!(error = %e, "Remote proof check failed");
                CheckOutcome::rejected(Diagnostic::text(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl ProofVerifier for RemoteBridge {
    async fn check_proof(
        &self,
        candidate: &str,
        header: &str,
        allow_incomplete: bool,
        timeout: Duration,
    ) -> CheckOutcome {
        RemoteBridge::check_proof(self, candidate, header, allow_incomplete, timeout).await
    }
}
