//! Whole-proof generation: prompt styles and remote inference.
//!
//! Uses an SGLang HTTP server for inference. Prompts are built per model
//! family and completions are parsed back into checkable Lean programs.
//!
//! # Key types
//!
//! - [`PromptStyle`] - closed set of prompt families, selected by model id
//! - [`PromptConfig`] - builds the prompt for one problem and parses completions
//! - [`SglangClient`] - HTTP client sending one micro-batch per request
//! - [`GenerationParams`] - sampling settings

pub mod prompt;
pub mod sglang;
pub mod types;

pub use prompt::{extract_last_lean_block, PromptConfig, PromptStyle, DEFAULT_HEADER};
pub use sglang::SglangClient;
pub use types::{GenerationParams, SglangConfig};
