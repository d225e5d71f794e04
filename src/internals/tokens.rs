//! Approximate token estimation and context-window validation.
//!
//! Estimates are character based, not a real tokenizer: expect them to be off
//! by 5-15% for English text. They are good enough to reject prompts that
//! clearly cannot fit before a provider is ever contacted.
//!
//! # Usage
//!
//! ```rust
//! use resilient_llm::tokens::{validate_tokens, CharacterTokenEstimator};
//! use resilient_llm::Message;
//!
//! let estimator = CharacterTokenEstimator::default();
//! let messages = vec![Message::user("Hello, world!")];
//!
//! let validation = validate_tokens(&estimator, "gpt-4", &messages, 1024)?;
//! assert!(!validation.exceeds_limit);
//! # Ok::<(), resilient_llm::LlmError>(())
//! ```
//!
//! # Context Window Lookup
//!
//! 1. [`TokenEstimatorConfig::custom_context_windows`]
//! 2. Built-in table of known models
//! 3. [`DEFAULT_CONTEXT_WINDOW`]

use crate::core_types::messages::Message;
use crate::error::LlmResult;
use crate::logging::log_debug;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Context window assumed for models missing from every lookup
pub const DEFAULT_CONTEXT_WINDOW: usize = 4096;

/// Fixed allowance for the reply priming the model adds to every prompt
const PRIMING_TOKENS: usize = 3;

/// Estimates prompt size and reports model context windows.
///
/// Implement this trait to plug in a real tokenizer.
pub trait TokenEstimator: Send + Sync + std::fmt::Debug {
    /// Estimate the prompt token count for `messages` sent to `model`.
    fn estimate_tokens(&self, model: &str, messages: &[Message]) -> LlmResult<usize>;

    /// Maximum context window (prompt + completion) for `model`.
    fn context_window(&self, model: &str) -> usize;
}

/// Token estimator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenEstimatorConfig {
    /// Average characters per token. Lower values estimate more conservatively.
    pub characters_per_token: f64,
    /// Per-model context window overrides
    pub custom_context_windows: HashMap<String, usize>,
    /// Formatting tokens added per message (role markers, separators)
    pub token_overhead_per_message: usize,
}

impl Default for TokenEstimatorConfig {
    fn default() -> Self {
        Self {
            characters_per_token: 4.0,
            custom_context_windows: HashMap::new(),
            token_overhead_per_message: 4,
        }
    }
}

impl TokenEstimatorConfig {
    /// Replace zero values with defaults
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.characters_per_token <= 0.0 {
            self.characters_per_token = defaults.characters_per_token;
        }
        if self.token_overhead_per_message == 0 {
            self.token_overhead_per_message = defaults.token_overhead_per_message;
        }
        self
    }
}

/// Character-count based [`TokenEstimator`]
#[derive(Debug, Clone, Default)]
pub struct CharacterTokenEstimator {
    config: TokenEstimatorConfig,
}

impl CharacterTokenEstimator {
    pub fn new(config: TokenEstimatorConfig) -> Self {
        Self {
            config: config.normalized(),
        }
    }

    pub fn config(&self) -> &TokenEstimatorConfig {
        &self.config
    }

    fn message_chars(message: &Message) -> usize {
        let tool_calls: usize = message
            .tool_calls
            .iter()
            .map(|tc| {
                tc.id.chars().count()
                    + tc.call_type.chars().count()
                    + tc.function.name.chars().count()
                    + tc.function.arguments.chars().count()
            })
            .sum();

        message.role.as_str().len()
            + message.content.chars().count()
            + tool_calls
            + message.tool_call_id.as_deref().map_or(0, |id| id.chars().count())
            + message.name.as_deref().map_or(0, |name| name.chars().count())
    }
}

impl TokenEstimator for CharacterTokenEstimator {
    fn estimate_tokens(&self, model: &str, messages: &[Message]) -> LlmResult<usize> {
        if messages.is_empty() {
            return Ok(0);
        }

        let total_chars: usize = messages.iter().map(Self::message_chars).sum();
        let base = (total_chars as f64 / self.config.characters_per_token) as usize;
        let tokens =
            base + messages.len() * self.config.token_overhead_per_message + PRIMING_TOKENS;

        log_debug!(
            model = %model,
            message_count = messages.len(),
            total_chars = total_chars,
            estimated_tokens = tokens,
            "Estimated prompt tokens"
        );
        Ok(tokens)
    }

    fn context_window(&self, model: &str) -> usize {
        if let Some(window) = self.config.custom_context_windows.get(model) {
            return *window;
        }
        known_context_window(model).unwrap_or(DEFAULT_CONTEXT_WINDOW)
    }
}

static MODEL_CONTEXT_WINDOWS: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    HashMap::from([
        // OpenAI
        ("gpt-4o", 128_000),
        ("gpt-4o-mini", 128_000),
        ("gpt-4o-2024-05-13", 128_000),
        ("gpt-4o-2024-08-06", 128_000),
        ("gpt-4-turbo", 128_000),
        ("gpt-4-turbo-preview", 128_000),
        ("gpt-4-1106-preview", 128_000),
        ("gpt-4", 8192),
        ("gpt-4-32k", 32_768),
        ("gpt-3.5-turbo", 16_385),
        ("gpt-3.5-turbo-16k", 16_385),
        ("gpt-3.5-turbo-1106", 16_385),
        ("o1", 200_000),
        ("o1-preview", 128_000),
        ("o1-mini", 128_000),
        // Anthropic
        ("claude-opus-4", 200_000),
        ("claude-sonnet-4", 200_000),
        ("claude-opus-4-1", 200_000),
        ("claude-sonnet-4-5", 200_000),
        ("claude-haiku-4-5", 200_000),
        ("claude-3-opus", 200_000),
        ("claude-3-opus-20240229", 200_000),
        ("claude-3-sonnet", 200_000),
        ("claude-3-sonnet-20240229", 200_000),
        ("claude-3-haiku", 200_000),
        ("claude-3-haiku-20240307", 200_000),
        ("claude-3.5-sonnet", 200_000),
        ("claude-3.5-haiku", 200_000),
        ("claude-2.1", 200_000),
        ("claude-2", 100_000),
        ("claude-instant-1.2", 100_000),
        // Google Gemini
        ("gemini-2.5-pro", 1_000_000),
        ("gemini-2.5-flash", 1_000_000),
        ("gemini-1.5-pro", 2_000_000),
        ("gemini-1.5-pro-latest", 2_000_000),
        ("gemini-1.5-flash", 1_000_000),
        ("gemini-1.5-flash-latest", 1_000_000),
        ("gemini-1.0-pro", 32_768),
        ("gemini-pro", 32_768),
        // xAI Grok
        ("grok-4", 128_000),
        ("grok-4-fast", 128_000),
        ("grok-3", 128_000),
        ("grok-3-fast", 128_000),
        ("grok-2", 128_000),
        ("grok-beta", 128_000),
        // Local models (common defaults)
        ("llama3", 8192),
        ("llama3:8b", 8192),
        ("llama3:70b", 8192),
        ("llama2", 4096),
        ("llama2:7b", 4096),
        ("llama2:13b", 4096),
        ("llama2:70b", 4096),
        ("mistral", 32_768),
        ("mistral:7b", 32_768),
        ("mixtral", 32_768),
        ("mixtral:8x7b", 32_768),
        ("codellama", 16_384),
        ("codellama:7b", 16_384),
        ("codellama:13b", 16_384),
        ("codellama:34b", 16_384),
        ("gemma", 8192),
        ("gemma:2b", 8192),
        ("gemma:7b", 8192),
        ("qwen", 32_768),
        ("qwen:7b", 32_768),
        ("qwen:14b", 32_768),
        ("deepseek-coder", 16_384),
        ("phi", 2048),
        ("phi:2.7b", 2048),
    ])
});

/// Context window from the built-in table, if the model is known
pub fn known_context_window(model: &str) -> Option<usize> {
    MODEL_CONTEXT_WINDOWS.get(model).copied()
}

/// Result of checking a prompt against a model's context window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenValidation {
    pub estimated_tokens: usize,
    pub context_window: usize,
    pub max_completion_tokens: usize,
    /// `context_window - estimated_tokens`, negative when over the limit
    pub available_tokens: i64,
    /// Prompt alone exceeds the window
    pub exceeds_limit: bool,
    /// Prompt plus requested completion exceeds the window
    pub exceeds_with_completion: bool,
}

/// Check whether `messages` fit `model`'s context window.
///
/// `exceeds_with_completion` is only evaluated when `max_completion_tokens`
/// is non-zero.
pub fn validate_tokens(
    estimator: &dyn TokenEstimator,
    model: &str,
    messages: &[Message],
    max_completion_tokens: usize,
) -> LlmResult<TokenValidation> {
    let estimated_tokens = estimator.estimate_tokens(model, messages)?;
    let context_window = estimator.context_window(model);

    Ok(TokenValidation {
        estimated_tokens,
        context_window,
        max_completion_tokens,
        available_tokens: context_window as i64 - estimated_tokens as i64,
        exceeds_limit: estimated_tokens > context_window,
        exceeds_with_completion: max_completion_tokens > 0
            && estimated_tokens.saturating_add(max_completion_tokens) > context_window,
    })
}

/// Estimate prompt tokens with a default [`CharacterTokenEstimator`]
pub fn estimate_prompt_tokens(model: &str, messages: &[Message]) -> LlmResult<usize> {
    CharacterTokenEstimator::default().estimate_tokens(model, messages)
}

/// Context window for `model` using the default lookup
pub fn model_context_window(model: &str) -> usize {
    CharacterTokenEstimator::default().context_window(model)
}
