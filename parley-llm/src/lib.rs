//! HTTP client for an OpenAI-compatible chat completions endpoint.
//!
//! Pure wire layer: request assembly, status-code mapping, response parsing.
//! Retry and tool-call orchestration live in the application crate.

mod client;
mod error;
mod openai;
mod types;

pub use client::{CompletionParams, LlmClient};
pub use error::{LlmError, Result};
pub use types::{ChatMessage, ChatResponse, Role, ToolCall, ToolDefinition, Usage};
