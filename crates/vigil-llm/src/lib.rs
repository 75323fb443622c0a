//! # vigil-llm
//!
//! LLM provider abstraction for Vigil: a chat-completions trait with
//! function-calling and streaming, an OpenAI-compatible adapter that
//! accumulates tool-call deltas by index, and a deterministic token counter
//! with a pluggable exact encoder.

pub mod openai;
pub mod provider;
pub mod tokens;

pub use openai::OpenAiCompatProvider;
pub use provider::{LlmProvider, LlmRequest, LlmResponse, StopReason, StreamChunk, Usage};
pub use tokens::{CounterMode, TokenCounter};
