use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;

use crate::process_tree;
use crate::protocol::{ReplCommand, ReplResponse};
use crate::reader::{ReaderStatus, ResponseReader};
use crate::types::{CheckerConfig, CheckerError, SessionState, SessionStatus};

/// Owns one REPL child process and its session state.
///
/// Exactly one command is in flight at a time (`submit` takes `&mut self`).
/// Failures never trigger an internal retry: after a timeout, crash, or
/// malformed response the session is `Failed` until [`reinitialize`] is
/// called.
///
/// [`reinitialize`]: ReplProcess::reinitialize
pub struct ReplProcess {
    config: CheckerConfig,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    state: SessionState,
    base_env: Option<u64>,
    last_exit: Option<i32>,
    requests_handled: u64,
    started_at: Option<Instant>,
    status_tx: watch::Sender<SessionStatus>,
}

impl ReplProcess {
    /// Create an unstarted session. No process is spawned until [`start`].
    ///
    /// [`start`]: ReplProcess::start
    pub fn new(config: CheckerConfig) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::default());
        Self {
            config,
            child: None,
            stdin: None,
            stdout: None,
            state: SessionState::Uninitialized,
            base_env: None,
            last_exit: None,
            requests_handled: 0,
            started_at: None,
            status_tx,
        }
    }

    /// Subscribe to status snapshots published on every state transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Launch the REPL and import the preamble to obtain the base environment.
    ///
    /// Uses the extended startup timeout since importing Mathlib can take
    /// over a minute on a cold cache.
    pub async fn start(&mut self) -> Result<(), CheckerError> {
        self.set_state(SessionState::Starting);
        self.base_env = None;

        let (child, stdin, stdout) = match self.spawn_process() {
            Ok(parts) => parts,
            Err(e) => {
                self.set_state(SessionState::Failed);
                return Err(CheckerError::StartupFailure(format!(
                    "could not spawn {}: {e}",
                    self.config.repl_path.display()
                )));
            }
        };
        let pid = child.id();
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout = Some(stdout);
        self.last_exit = None;
        self.publish();

        tracing::info!(
            pid,
            project_dir = %self.config.project_dir.display(),
            "Spawned REPL process, loading preamble"
        );

        let preamble = ReplCommand::new(self.config.preamble(), None);
        let timeout = self.config.startup_timeout();
        let load_start = Instant::now();
        let response = match self.exchange(&preamble, timeout).await {
            Ok(response) => response,
            Err(e) => {
                self.kill_tree().await;
                self.set_state(SessionState::Failed);
                return Err(CheckerError::StartupFailure(e.to_string()));
            }
        };

        let Some(env) = response.env else {
            tracing::error!(?response, "Preamble returned no environment id");
            self.kill_tree().await;
            self.set_state(SessionState::Failed);
            return Err(CheckerError::StartupFailure(
                "preamble did not return an environment id".into(),
            ));
        };

        self.base_env = Some(env);
        self.requests_handled = 0;
        self.started_at = Some(Instant::now());
        self.set_state(SessionState::Ready);
        tracing::info!(
            base_env = env,
            load_ms = load_start.elapsed().as_millis() as u64,
            "REPL ready"
        );
        Ok(())
    }

    /// Spawn the underlying OS process.
    ///
    /// With `lake_path` set the REPL runs as `lake env <repl> <args>` from
    /// the project directory so `LEAN_PATH` is configured.
    fn spawn_process(&self) -> std::io::Result<(Child, ChildStdin, ChildStdout)> {
        let mut cmd = match &self.config.lake_path {
            Some(lake) => {
                let mut cmd = Command::new(lake);
                cmd.arg("env").arg(&self.config.repl_path);
                cmd
            }
            None => Command::new(&self.config.repl_path),
        };
        cmd.args(&self.config.repl_args);
        cmd.current_dir(&self.config.project_dir);

        let mut child = cmd
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("Failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("Failed to capture stdout"))?;

        Ok((child, stdin, stdout))
    }

    /// Submit one command and wait at most `timeout` for its response.
    ///
    /// `env` selects the environment to elaborate in; `None` starts from a
    /// fresh environment (for self-contained programs with their own imports).
    pub async fn submit(
        &mut self,
        command_text: &str,
        env: Option<u64>,
        timeout: Duration,
    ) -> Result<ReplResponse, CheckerError> {
        if self.child.is_none() {
            return Err(match self.state {
                SessionState::Uninitialized => CheckerError::NotInitialized,
                _ => CheckerError::NotReady,
            });
        }
        if self.state != SessionState::Ready {
            return Err(CheckerError::NotReady);
        }

        let command = ReplCommand::new(command_text, env);
        let result = self.exchange(&command, timeout).await;
        if result.is_ok() {
            self.requests_handled += 1;
        }
        result
    }

    /// Write one framed command and read one response.
    ///
    /// Any failure leaves the session `Failed`; timeouts and malformed
    /// output additionally kill the process tree.
    async fn exchange(
        &mut self,
        command: &ReplCommand,
        timeout: Duration,
    ) -> Result<ReplResponse, CheckerError> {
        if let Some(code) = self.exited() {
            tracing::warn!(exit_code = ?code, "REPL process exited before command was sent");
            self.fail_after_exit(code);
            return Err(CheckerError::ProcessExited(code));
        }

        let frame = command
            .to_frame()
            .map_err(|e| CheckerError::Protocol(format!("Serialization error: {e}")))?;

        if let Err(e) = self.write_frame(&frame).await {
            tracing::warn!(error = %e, "Failed to write command to REPL");
            let code = self.reap(self.config.kill_grace()).await;
            if self.child.is_none() {
                return Err(CheckerError::ProcessExited(code));
            }
            self.kill_tree().await;
            self.set_state(SessionState::Failed);
            return Err(CheckerError::Io(e));
        }

        let stdout = self
            .stdout
            .take()
            .ok_or_else(|| CheckerError::Protocol("stdout not available".into()))?;
        let mut reader = ResponseReader::spawn(stdout);

        match reader.wait(timeout).await {
            ReaderStatus::Completed(outcome) => match outcome.result {
                Ok(response) => {
                    self.stdout = Some(outcome.stdout);
                    Ok(response)
                }
                Err(CheckerError::ProcessExited(_)) => {
                    drop(outcome.stdout);
                    let code = self.reap(self.config.kill_grace()).await;
                    if self.child.is_some() {
                        // Closed its stdout but kept running
                        self.kill_tree().await;
                        self.set_state(SessionState::Failed);
                    }
                    tracing::warn!(exit_code = ?code, "REPL process exited while handling a command");
                    Err(CheckerError::ProcessExited(code))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed REPL response, killing process");
                    drop(outcome.stdout);
                    self.kill_tree().await;
                    self.set_state(SessionState::Failed);
                    Err(e)
                }
            },
            ReaderStatus::TimedOut => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs_f64(),
                    "REPL command timed out, killing process tree"
                );
                reader.stop();
                self.kill_tree().await;
                self.set_state(SessionState::Failed);
                Err(CheckerError::Timeout(timeout))
            }
            ReaderStatus::Lost => {
                self.kill_tree().await;
                self.set_state(SessionState::Failed);
                Err(CheckerError::Protocol("Reader task ended without a result".into()))
            }
        }
    }

    async fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| std::io::Error::other("stdin not available"))?;
        stdin.write_all(frame).await?;
        stdin.flush().await
    }

    /// Tear down any running process (idempotent), then [`start`] again.
    ///
    /// [`start`]: ReplProcess::start
    pub async fn reinitialize(&mut self) -> Result<(), CheckerError> {
        if self.child.is_some() {
            tracing::info!("Tearing down existing REPL process before reinitializing");
            self.kill_tree().await;
        }
        self.start().await
    }

    /// Report session status. Only reaps an already-exited child.
    pub fn status(&mut self) -> SessionStatus {
        if let Some(code) = self.exited() {
            self.fail_after_exit(code);
        }
        self.snapshot()
    }

    /// Kill the process tree and mark the session `Terminated`.
    pub async fn shutdown(&mut self) {
        self.kill_tree().await;
        self.set_state(SessionState::Terminated);
        tracing::info!("REPL session shut down");
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Environment produced by the preamble, reused by every check.
    pub fn base_env(&self) -> Option<u64> {
        self.base_env
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Number of commands answered since the last (re)start.
    pub fn requests_handled(&self) -> u64 {
        self.requests_handled
    }

    /// Time since the session last became ready.
    pub fn uptime(&self) -> Option<Duration> {
        self.started_at.map(|t| t.elapsed())
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// `Some(exit_code)` if the child has exited; reaps it.
    fn exited(&mut self) -> Option<Option<i32>> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => Some(status.code()),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to poll REPL process");
                None
            }
        }
    }

    fn fail_after_exit(&mut self, code: Option<i32>) {
        self.child = None;
        self.stdin = None;
        self.stdout = None;
        self.last_exit = code;
        if self.state != SessionState::Terminated {
            self.set_state(SessionState::Failed);
        } else {
            self.publish();
        }
    }

    /// Wait up to `grace` for the child to exit on its own.
    async fn reap(&mut self, grace: Duration) -> Option<i32> {
        let child = self.child.as_mut()?;
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                let code = status.code();
                self.fail_after_exit(code);
                code
            }
            _ => None,
        }
    }

    /// Terminate the whole process tree: SIGTERM, grace window, SIGKILL.
    async fn kill_tree(&mut self) {
        self.stdin = None;
        self.stdout = None;
        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Ok(Some(status)) = child.try_wait() {
            self.last_exit = status.code();
            self.publish();
            return;
        }

        let grace = self.config.kill_grace();
        if let Some(root) = child.id() {
            let tree = process_tree::collect_tree(root);
            tracing::debug!(root, processes = tree.len(), "Terminating REPL process tree");
            let forced = process_tree::terminate(&tree, grace).await;
            if forced > 0 {
                tracing::info!(root, forced, "Force killed processes from REPL tree");
            }
        }

        let _ = child.start_kill();
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => self.last_exit = status.code(),
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to reap REPL process"),
            Err(_) => tracing::warn!("REPL process still running after kill"),
        }
        self.publish();
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.publish();
    }

    fn snapshot(&self) -> SessionStatus {
        let pid = self.pid();
        SessionStatus {
            ready: self.state == SessionState::Ready,
            process_running: self.child.is_some(),
            pid,
            exit_code: if self.child.is_some() { None } else { self.last_exit },
            state: self.state,
        }
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.snapshot());
    }
}
