use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::ReplMessage;

/// Errors that can occur while driving the checker session.
#[derive(Debug, thiserror::Error)]
pub enum CheckerError {
    /// No checker session has been created yet.
    #[error("REPL not initialized")]
    NotInitialized,

    /// The session exists but is not in the `Ready` state.
    #[error("REPL not ready")]
    NotReady,

    /// A command did not produce a complete response in time. The process
    /// tree has been killed.
    #[error("Command timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// The checker process exited (code is `None` when killed by a signal).
    #[error("REPL process not running (exit code: {0:?})")]
    ProcessExited(Option<i32>),

    /// Spawning the process or loading the preamble failed.
    #[error("Failed to initialize REPL: {0}")]
    StartupFailure(String),

    /// A transparent reinitialize attempt failed.
    #[error("Failed to reinitialize REPL: {0}")]
    ReinitializeFailed(String),

    /// The candidate proof text was empty.
    #[error("Proof provided was an empty string (probably a generation error)")]
    EmptyCandidate,

    /// No program preamble was supplied for the candidate.
    #[error("A non-empty header is required to check a proof")]
    MissingHeader,

    /// Malformed response or unexpected stream state.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// IO error from process communication.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CheckerError {
    /// Whether this error leaves the session in the `Failed` state.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            CheckerError::Timeout(_)
                | CheckerError::ProcessExited(_)
                | CheckerError::Protocol(_)
                | CheckerError::Io(_)
        )
    }
}

/// Lifecycle of the single checker session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Uninitialized,
    Starting,
    Ready,
    Failed,
    Terminated,
}

/// Side-effect free snapshot of the session, as reported by `status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub ready: bool,
    pub process_running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub state: SessionState,
}

/// Checker feedback attached to a verification outcome.
///
/// Either the structured message list returned by the REPL or a plain
/// text explanation (timeouts, input rejections, success notes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Diagnostic {
    Messages(Vec<ReplMessage>),
    Text(String),
}

impl Diagnostic {
    pub fn text(message: impl Into<String>) -> Self {
        Diagnostic::Text(message.into())
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::Text(text) => write!(f, "{text}"),
            Diagnostic::Messages(messages) => {
                let rendered: Vec<String> = messages
                    .iter()
                    .map(|m| format!("{}: {}", m.severity, m.data))
                    .collect();
                write!(f, "{}", rendered.join("; "))
            }
        }
    }
}

/// Result of checking one candidate proof.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub verified: bool,
    pub diagnostic: Diagnostic,
}

impl CheckOutcome {
    pub fn verified() -> Self {
        Self {
            verified: true,
            diagnostic: Diagnostic::text("Proof verified successfully"),
        }
    }

    pub fn rejected(diagnostic: Diagnostic) -> Self {
        Self {
            verified: false,
            diagnostic,
        }
    }

    /// Convert a session or input error into a failed outcome.
    pub fn from_error(err: &CheckerError) -> Self {
        Self::rejected(Diagnostic::text(err.to_string()))
    }
}

/// Configuration for the checker process.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckerConfig {
    /// REPL executable. Run through `lake env` when `lake_path` is set.
    #[serde(default = "default_repl_path")]
    pub repl_path: PathBuf,

    /// Extra arguments passed to the REPL executable.
    #[serde(default)]
    pub repl_args: Vec<String>,

    /// `lake` binary used to set up `LEAN_PATH`. `None` runs `repl_path` directly.
    #[serde(default = "default_lake_path")]
    pub lake_path: Option<PathBuf>,

    /// Lean project directory (working directory of the process).
    pub project_dir: PathBuf,

    /// Modules imported once at startup to build the base environment.
    #[serde(default = "default_imports")]
    pub imports: Vec<String>,

    /// Default timeout in seconds for a single check.
    #[serde(default = "default_check_timeout")]
    pub check_timeout_secs: u64,

    /// Timeout in seconds for the preamble on startup (loading Mathlib is slow).
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Grace window in ms between SIGTERM and SIGKILL when killing the tree.
    ///
    /// Reaping the root after SIGKILL is bounded by the same window, so a
    /// timed-out check returns within the check timeout plus twice this.
    #[serde(default = "default_kill_grace")]
    pub kill_grace_ms: u64,
}

impl CheckerConfig {
    /// Create a config for the given project directory with default settings.
    pub fn new(project_dir: PathBuf) -> Self {
        Self {
            repl_path: default_repl_path(),
            repl_args: Vec::new(),
            lake_path: default_lake_path(),
            project_dir,
            imports: default_imports(),
            check_timeout_secs: default_check_timeout(),
            startup_timeout_secs: default_startup_timeout(),
            kill_grace_ms: default_kill_grace(),
        }
    }

    /// Create a config using the auto-discovered Lean project.
    ///
    /// Returns `None` if no project can be found. `LEAN_REPL_BIN`, when set,
    /// overrides the REPL executable.
    pub fn with_discovered_project() -> Option<Self> {
        let project_dir = discover_lean_project()?;
        let mut config = Self::new(project_dir);
        if let Ok(bin) = std::env::var("LEAN_REPL_BIN") {
            config.repl_path = PathBuf::from(bin);
        }
        Some(config)
    }

    /// The preamble submitted once at startup.
    pub fn preamble(&self) -> String {
        self.imports
            .iter()
            .map(|module| format!("import {module}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    /// Startup timeout, never shorter than the check timeout.
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs.max(self.check_timeout_secs))
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// Auto-discover the Lean project directory.
///
/// Discovery chain (first match wins):
/// 1. `LEAN_REPL_PROJECT` environment variable
/// 2. `vendor/lean-project/` under the workspace root (exported by build.rs)
///
/// A directory counts when it contains `lakefile.lean` or `lakefile.toml`.
pub fn discover_lean_project() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("LEAN_REPL_PROJECT") {
        let p = PathBuf::from(path);
        if has_lakefile(&p) {
            return Some(p);
        }
        tracing::warn!(
            "LEAN_REPL_PROJECT={} set but no lakefile found there",
            p.display()
        );
    }

    if let Some(root) = option_env!("LEAN_REPL_WORKSPACE_ROOT") {
        let vendor = PathBuf::from(root).join("vendor").join("lean-project");
        if let Ok(canonical) = vendor.canonicalize() {
            if has_lakefile(&canonical) {
                return Some(canonical);
            }
        }
    }

    None
}

fn has_lakefile(dir: &std::path::Path) -> bool {
    dir.join("lakefile.lean").is_file() || dir.join("lakefile.toml").is_file()
}

fn default_repl_path() -> PathBuf {
    PathBuf::from("repl")
}
fn default_lake_path() -> Option<PathBuf> {
    Some(PathBuf::from("lake"))
}
fn default_imports() -> Vec<String> {
    vec!["Mathlib".to_string(), "Aesop".to_string()]
}
fn default_check_timeout() -> u64 {
    20
}
fn default_startup_timeout() -> u64 {
    120
}
fn default_kill_grace() -> u64 {
    200
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preamble_lists_imports_in_order() {
        let config = CheckerConfig::new(PathBuf::from("/tmp/project"));
        assert_eq!(config.preamble(), "import Mathlib\nimport Aesop");
    }

    #[test]
    fn startup_timeout_never_below_check_timeout() {
        let mut config = CheckerConfig::new(PathBuf::from("/tmp/project"));
        config.check_timeout_secs = 300;
        config.startup_timeout_secs = 60;
        assert_eq!(config.startup_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn config_deserialize_defaults() {
        let json = r#"{"project_dir": "/tmp/project"}"#;
        let config: CheckerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.repl_path, PathBuf::from("repl"));
        assert_eq!(config.lake_path, Some(PathBuf::from("lake")));
        assert_eq!(config.check_timeout_secs, 20);
        assert_eq!(config.startup_timeout_secs, 120);
        assert_eq!(config.kill_grace_ms, 200);
        assert_eq!(config.imports, vec!["Mathlib", "Aesop"]);
    }

    #[test]
    fn status_omits_absent_pid() {
        let status = SessionStatus::default();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["ready"], false);
        assert_eq!(json["state"], "uninitialized");
        assert!(json.get("pid").is_none());
        assert!(json.get("exit_code").is_none());
    }

    #[test]
    fn timeout_error_message() {
        let err = CheckerError::Timeout(Duration::from_secs(20));
        assert_eq!(err.to_string(), "Command timed out after 20s");
        assert!(err.is_session_fatal());
        assert!(!CheckerError::MissingHeader.is_session_fatal());
    }

    #[test]
    fn diagnostic_text_roundtrip() {
        let diag = Diagnostic::text("Proof contains sorries");
        let json = serde_json::to_string(&diag).unwrap();
        assert_eq!(json, "\"Proof contains sorries\"");
        let back: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(back, diag);
    }
}
