//! Proof attempts and per-problem records, with benchmark loading and
//! JSON checkpoints.
//!
//! A [`ProofRecord`] collects every [`Attempt`] made for one problem (or
//! problem variant) in generation order and tracks the first verified
//! proof as its solution.

pub mod benchmark;
pub mod checkpoint;
pub mod types;

pub use benchmark::{load_benchmark, parse_benchmark};
pub use checkpoint::{read_checkpoint, write_checkpoint};
pub use types::{Attempt, ProofRecord, RecordError};
