//! Application layer for `lean-synth`: config loading, the generation
//! pipeline, the HTTP checker service and checkpoint summaries.

pub mod config;
pub mod pipeline;
pub mod results;
pub mod server;
pub mod uploads;
