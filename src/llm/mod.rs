//! LLM integration module.
//!
//! Provides the [`Judge`] seam every grading component talks to, an
//! OpenAI-compatible client implementing it, the grading prompts, and the
//! helpers that pull structure out of free-form judge replies.

mod client;
pub mod parse;
mod prompts;

pub use client::{LlmClient, LlmResponse, Message, Role, TokenUsage};
pub use prompts::Prompts;

use crate::config::LlmConfig;
use crate::error::Result;
use async_trait::async_trait;

/// A text-generating judge.
///
/// Implementations make no promise about the shape of the returned text;
/// callers own all parsing.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, prompt: &str, model: &str, temperature: Option<f32>) -> Result<String>;
}

/// Model and temperature a component sends with every judge call.
#[derive(Debug, Clone)]
pub struct JudgeSettings {
    pub model: String,
    pub temperature: Option<f32>,
}

impl JudgeSettings {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: Some(config.temperature),
        }
    }
}
