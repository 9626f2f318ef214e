//! TOML config loading for the `lean-synth` CLI.
//!
//! Deserializes `configs/synth.toml` which has `[generation]`, `[scheduler]`
//! and `[checker]` sections, then merges with CLI overrides.

use std::path::{Path, PathBuf};

use anyhow::Context;
use lean_repl::CheckerConfig;
use policy::GenerationParams;
use scheduler::SchedulerConfig;
use serde::Deserialize;

/// Top-level structure matching `configs/synth.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct SynthToml {
    /// Sampling parameters sent to the inference server.
    #[serde(default)]
    pub generation: GenerationParams,
    /// Micro-batching and budget settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Checker overrides (the project dir comes from auto-discovery).
    #[serde(default)]
    pub checker: CheckerOverrides,
}

/// Optional overrides for `CheckerConfig` fields.
///
/// All fields are `Option` because the Lean project is normally found by
/// `CheckerConfig::with_discovered_project()`.
#[derive(Debug, Default, Deserialize)]
pub struct CheckerOverrides {
    /// Lean project directory the REPL runs in.
    pub project_dir: Option<PathBuf>,
    /// REPL executable.
    pub repl_path: Option<PathBuf>,
    /// `lake` binary; an empty string runs the REPL directly.
    pub lake_path: Option<PathBuf>,
    /// Modules imported once at startup.
    pub imports: Option<Vec<String>>,
    /// Timeout in seconds for the startup preamble.
    pub startup_timeout_secs: Option<u64>,
    /// Default timeout in seconds for one check.
    pub check_timeout_secs: Option<u64>,
    /// Grace window in ms between SIGTERM and SIGKILL.
    pub kill_grace_ms: Option<u64>,
}

/// Load a `SynthToml` from a TOML file.
pub fn load_synth_toml(path: &Path) -> anyhow::Result<SynthToml> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: SynthToml = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    tracing::info!(path = %path.display(), "Loaded synth config");
    Ok(config)
}

/// Like [`load_synth_toml`], but a missing file yields the defaults.
pub fn load_or_default(path: &Path) -> anyhow::Result<SynthToml> {
    if path.exists() {
        load_synth_toml(path)
    } else {
        tracing::warn!(path = %path.display(), "Config not found, using defaults");
        Ok(SynthToml::default())
    }
}

/// CLI flags that override checker settings.
#[derive(Debug, Default, Clone)]
pub struct CheckerCli {
    pub project_dir: Option<PathBuf>,
    pub repl_path: Option<PathBuf>,
}

/// Build a `CheckerConfig` from auto-discovery, TOML overrides, and CLI flags.
///
/// Priority chain: discovered project < TOML values < CLI flags.
pub fn build_checker_config(
    overrides: &CheckerOverrides,
    cli: &CheckerCli,
) -> anyhow::Result<CheckerConfig> {
    let project_dir = cli
        .project_dir
        .clone()
        .or_else(|| overrides.project_dir.clone());

    let mut config = match project_dir {
        Some(dir) => CheckerConfig::new(dir),
        None => CheckerConfig::with_discovered_project().ok_or_else(|| {
            anyhow::anyhow!(
                "Lean project not found. Set LEAN_REPL_PROJECT, pass --project-dir, \
                 or set checker.project_dir in the config"
            )
        })?,
    };

    if let Some(path) = &overrides.repl_path {
        config.repl_path = path.clone();
    }
    if let Some(lake) = &overrides.lake_path {
        config.lake_path = if lake.as_os_str().is_empty() {
            None
        } else {
            Some(lake.clone())
        };
    }
    if let Some(imports) = &overrides.imports {
        config.imports = imports.clone();
    }
    if let Some(n) = overrides.startup_timeout_secs {
        config.startup_timeout_secs = n;
    }
    if let Some(n) = overrides.check_timeout_secs {
        config.check_timeout_secs = n;
    }
    if let Some(n) = overrides.kill_grace_ms {
        config.kill_grace_ms = n;
    }

    // CLI override takes highest priority
    if let Some(path) = &cli.repl_path {
        config.repl_path = path.clone();
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_full_synth_toml() {
        let toml_str = r#"
[generation]
temperature = 0.7
top_p = 0.9
max_new_tokens = 4096

[scheduler]
max_attempts_per_problem = 32
micro_batch_size = 16
stop_on_success = false
verify_timeout_secs = 60

[checker]
project_dir = "/opt/lean-project"
imports = ["Mathlib"]
startup_timeout_secs = 300
check_timeout_secs = 45
"#;
        let config: SynthToml = toml::from_str(toml_str).unwrap();
        assert!((config.generation.temperature - 0.7).abs() < 1e-9);
        assert_eq!(config.generation.max_new_tokens, 4096);
        assert_eq!(config.scheduler.max_attempts_per_problem, 32);
        assert_eq!(config.scheduler.micro_batch_size, 16);
        assert!(!config.scheduler.stop_on_success);
        assert_eq!(config.scheduler.verify_timeout_secs, 60);
        assert_eq!(
            config.checker.project_dir,
            Some(PathBuf::from("/opt/lean-project"))
        );
        assert_eq!(config.checker.imports, Some(vec!["Mathlib".to_string()]));
        assert_eq!(config.checker.startup_timeout_secs, Some(300));
    }

    #[test]
    fn test_deserialize_empty_toml() {
        let config: SynthToml = toml::from_str("").unwrap();
        assert_eq!(config.scheduler.micro_batch_size, 8);
        assert!(config.scheduler.stop_on_success);
        assert!((config.generation.top_p - 0.95).abs() < 1e-9);
        assert!(config.checker.project_dir.is_none());
    }

    #[test]
    fn test_cli_override_priority() {
        let overrides = CheckerOverrides {
            project_dir: Some(PathBuf::from("/from/toml")),
            repl_path: Some(PathBuf::from("toml-repl")),
            lake_path: Some(PathBuf::new()),
            check_timeout_secs: Some(45),
            ..CheckerOverrides::default()
        };
        let cli = CheckerCli {
            project_dir: Some(PathBuf::from("/from/cli")),
            repl_path: Some(PathBuf::from("cli-repl")),
        };

        let config = build_checker_config(&overrides, &cli).unwrap();
        assert_eq!(config.project_dir, PathBuf::from("/from/cli"));
        assert_eq!(config.repl_path, PathBuf::from("cli-repl"));
        assert!(config.lake_path.is_none());
        assert_eq!(config.check_timeout_secs, 45);
        assert_eq!(config.imports, vec!["Mathlib", "Aesop"]);
    }

    #[test]
    fn test_toml_project_dir_used_without_cli() {
        let overrides = CheckerOverrides {
            project_dir: Some(PathBuf::from("/from/toml")),
            ..CheckerOverrides::default()
        };
        let config = build_checker_config(&overrides, &CheckerCli::default()).unwrap();
        assert_eq!(config.project_dir, PathBuf::from("/from/toml"));
        assert_eq!(config.lake_path, Some(PathBuf::from("lake")));
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.scheduler.max_attempts_per_problem, 8);
    }
}
