//! Async client for the Lean 4 REPL used as a whole-proof checker.
//!
//! One long-lived REPL process imports the preamble once and then checks
//! candidate programs against the resulting base environment. The crate
//! handles spawning, framing, bounded waits, process-tree kills on timeout,
//! and reinitialization after failures.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use lean_repl::{CheckerConfig, VerificationBridge};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CheckerConfig::with_discovered_project()
//!     .expect("Lean project not found, set LEAN_REPL_PROJECT");
//!
//! let bridge = VerificationBridge::new(config);
//! bridge.init().await?;
//!
//! let header = "import Mathlib\nimport Aesop\n\nset_option maxHeartbeats 400000\n";
//! let outcome = bridge
//!     .check_proof("theorem t : 2 + 2 = 4 := by norm_num", header, false, Duration::from_secs(20))
//!     .await;
//! println!("verified: {} ({})", outcome.verified, outcome.diagnostic);
//!
//! bridge.teardown().await;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod process_tree;
pub mod protocol;
pub mod reader;
pub mod types;
pub mod worker;

pub use bridge::{
    classify_response, compose_program, imports_covered, is_self_contained, VerificationBridge,
};
pub use protocol::{Pos, ReplCommand, ReplMessage, ReplResponse, ResponseAccumulator, Sorry};
pub use types::{
    discover_lean_project, CheckOutcome, CheckerConfig, CheckerError, Diagnostic, SessionState,
    SessionStatus,
};
pub use worker::ReplProcess;
