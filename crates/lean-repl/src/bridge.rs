//! Verification bridge: the single shared checker session.
//!
//! All verification goes through one [`ReplProcess`] held behind an async
//! mutex, so at most one command is in flight. Callers own the bridge
//! explicitly (typically as `Arc<VerificationBridge>`).

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::{watch, Mutex};

use crate::protocol::ReplResponse;
use crate::types::{CheckOutcome, CheckerConfig, CheckerError, Diagnostic, SessionStatus};
use crate::worker::ReplProcess;

pub struct VerificationBridge {
    config: CheckerConfig,
    session: Mutex<Option<ReplProcess>>,
    /// Last published status, read when the session is busy with a check.
    status_rx: StdMutex<Option<watch::Receiver<SessionStatus>>>,
}

impl VerificationBridge {
    /// Create a bridge without starting the checker. Call [`init`] before use.
    ///
    /// [`init`]: VerificationBridge::init
    pub fn new(config: CheckerConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
            status_rx: StdMutex::new(None),
        }
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Start the checker session if it is not already ready.
    pub async fn init(&self) -> Result<SessionStatus, CheckerError> {
        let mut guard = self.session.lock().await;
        if let Some(repl) = guard.as_mut() {
            if repl.is_ready() {
                return Ok(repl.status());
            }
        }
        let repl = self.restart(&mut guard).await?;
        Ok(repl.status())
    }

    /// Shut the session down. Safe to call repeatedly.
    pub async fn teardown(&self) {
        let mut guard = self.session.lock().await;
        if let Some(mut repl) = guard.take() {
            repl.shutdown().await;
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Current session status without waiting for an in-flight check.
    ///
    /// An absent session reports `SessionState::Uninitialized`.
    pub fn status(&self) -> SessionStatus {
        match self.session.try_lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(repl) => repl.status(),
                None => SessionStatus::default(),
            },
            Err(_) => self
                .status_rx
                .lock()
                .unwrap()
                .as_ref()
                .map(|rx| rx.borrow().clone())
                .unwrap_or_default(),
        }
    }

    /// Submit `proof_text` and return the raw checker response.
    ///
    /// Programs run in the base environment. A program starting with
    /// `import` lines has them removed when the preamble already imported
    /// every listed module, and otherwise runs unmodified in a fresh
    /// environment.
    pub async fn verify(
        &self,
        proof_text: &str,
        timeout: Duration,
    ) -> Result<ReplResponse, CheckerError> {
        let mut guard = self.session.lock().await;
        let repl = guard.as_mut().ok_or(CheckerError::NotInitialized)?;
        if !repl.status().ready {
            return Err(CheckerError::NotReady);
        }
        submit_program(repl, proof_text, timeout).await
    }

    /// Tear down the current process (if any) and start a fresh one.
    pub async fn reinitialize(&self) -> Result<SessionStatus, CheckerError> {
        let mut guard = self.session.lock().await;
        let repl = self.restart(&mut guard).await?;
        Ok(repl.status())
    }

    /// Check one candidate against `header`, reinitializing a failed
    /// session at most once.
    pub async fn try_check_proof(
        &self,
        candidate: &str,
        header: &str,
        allow_incomplete: bool,
        timeout: Duration,
    ) -> Result<CheckOutcome, CheckerError> {
        if candidate.trim().is_empty() {
            return Err(CheckerError::EmptyCandidate);
        }
        if header.trim().is_empty() {
            return Err(CheckerError::MissingHeader);
        }
        let program = compose_program(candidate, header);

        let mut guard = self.session.lock().await;
        let needs_restart = match guard.as_mut() {
            Some(repl) => !repl.status().ready,
            None => true,
        };
        if needs_restart {
            tracing::info!("Checker not ready, reinitializing before check");
            if let Err(e) = self.restart(&mut guard).await {
                return Err(CheckerError::ReinitializeFailed(e.to_string()));
            }
        }
        let repl = guard.as_mut().ok_or(CheckerError::NotInitialized)?;

        let response = submit_program(repl, &program, timeout).await?;
        Ok(classify_response(&response, allow_incomplete))
    }

    /// Like [`try_check_proof`], with every error turned into a rejection.
    ///
    /// [`try_check_proof`]: VerificationBridge::try_check_proof
    pub async fn check_proof(
        &self,
        candidate: &str,
        header: &str,
        allow_incomplete: bool,
        timeout: Duration,
    ) -> CheckOutcome {
        match self
            .try_check_proof(candidate, header, allow_incomplete, timeout)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "Proof check failed");
                CheckOutcome::from_error(&e)
            }
        }
    }

    /// Reinitialize the session held in `slot`, creating it if absent.
    async fn restart<'a>(
        &self,
        slot: &'a mut Option<ReplProcess>,
    ) -> Result<&'a mut ReplProcess, CheckerError> {
        if slot.is_none() {
            let repl = ReplProcess::new(self.config.clone());
            *self.status_rx.lock().unwrap() = Some(repl.subscribe());
            *slot = Some(repl);
        }
        let repl = slot.as_mut().ok_or(CheckerError::NotInitialized)?;
        repl.reinitialize().await?;
        Ok(repl)
    }
}

async fn submit_program(
    repl: &mut ReplProcess,
    program: &str,
    timeout: Duration,
) -> Result<ReplResponse, CheckerError> {
    if !is_self_contained(program) {
        let env = repl.base_env();
        return repl.submit(program, env, timeout).await;
    }
    if imports_covered(program, &repl.config().imports) {
        let body = strip_import_directives(program);
        let env = repl.base_env();
        return repl.submit(body, env, timeout).await;
    }
    tracing::debug!("Program imports modules outside the preamble, using a fresh environment");
    repl.submit(program, None, timeout).await
}

/// Module names listed on the leading `import` lines of `text`.
fn leading_imports(text: &str) -> Vec<&str> {
    let mut modules = Vec::new();
    for line in text.lines() {
        let mut words = line.split_whitespace();
        match words.next() {
            None => continue,
            Some("import") => modules.extend(words),
            Some(_) => break,
        }
    }
    modules
}

/// Whether every module imported at the top of `program` is in `imports`.
pub fn imports_covered(program: &str, imports: &[String]) -> bool {
    let modules = leading_imports(program);
    !modules.is_empty() && modules.iter().all(|m| imports.iter().any(|i| i == m))
}

/// Whether `candidate` carries its own `import` directives.
pub fn is_self_contained(candidate: &str) -> bool {
    candidate.split_whitespace().next() == Some("import")
}

/// Remove the leading `import` lines (and blank lines among them) from a
/// header. The base environment already holds the imported modules.
pub fn strip_import_directives(header: &str) -> &str {
    let mut rest = header;
    while !rest.is_empty() {
        let (line, tail) = match rest.find('\n') {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, ""),
        };
        let first = line.split_whitespace().next();
        if first.is_some() && first != Some("import") {
            break;
        }
        rest = tail;
    }
    rest
}

/// Build the program submitted for `candidate`.
///
/// Self-contained candidates are returned unchanged. Otherwise the header,
/// minus its import lines, is prepended.
pub fn compose_program(candidate: &str, header: &str) -> String {
    if is_self_contained(candidate) {
        return candidate.to_string();
    }
    let preamble = strip_import_directives(header);
    format!("{preamble}\n{candidate}")
}

/// Decide whether a checker response means the proof is accepted.
pub fn classify_response(response: &ReplResponse, allow_incomplete: bool) -> CheckOutcome {
    if let Some(failure) = response.failure_message() {
        return CheckOutcome::rejected(Diagnostic::text(failure));
    }
    if !response.sorries.is_empty() && !allow_incomplete {
        return CheckOutcome::rejected(Diagnostic::text("Proof contains unresolved goals"));
    }
    if response.errors().next().is_some() {
        return CheckOutcome::rejected(Diagnostic::Messages(response.messages.clone()));
    }
    CheckOutcome::verified()
}
