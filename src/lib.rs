//! # resilient-llm
//!
//! Resilience and caching layer for multi-provider LLM chat completions.
//!
//! ## Key Features
//!
//! - **Fallback chains**: Try a primary provider, then fallbacks in order
//! - **Circuit breakers**: Skip providers that keep failing until they recover
//! - **Error classification**: Route failures as retryable, non-retryable or unknown
//! - **Response caching**: Deduplicate identical requests through any key-value store
//! - **Context-window validation**: Reject prompts that cannot fit before calling out
//!
//! ## Example
//!
//! ```rust,no_run
//! use resilient_llm::{
//!     ChatClient, ChatCompletionRequest, LlmProvider, Message, RequestContext, ResilienceConfig,
//! };
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     primary: Arc<dyn LlmProvider>,
//! #     backup: Arc<dyn LlmProvider>,
//! # ) -> resilient_llm::LlmResult<()> {
//! let config = ResilienceConfig::from_env()?;
//! let client = ChatClient::from_config(&config, primary, vec![backup], None)?;
//!
//! let request = ChatCompletionRequest::new("gpt-4o", vec![Message::user("Hello!")]);
//! let response = client.create_completion(&RequestContext::new(), &request).await?;
//! println!("served by {:?}", response.served_by());
//! # Ok(())
//! # }
//! ```

#![allow(clippy::missing_errors_doc)]

pub mod core_types;

// Logging utilities (re-exports tracing with log_* naming) - internal only
pub(crate) mod logging;

pub mod classifier;
pub mod client;
pub mod config;
pub mod error;
pub(crate) mod internals;

pub use internals::{cache, circuit_breaker, fallback, store, tokens};

#[cfg(test)]
pub mod tests;

pub use cache::{CacheConfig, CacheEntry, CacheManager};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
pub use classifier::{
    classify, classify_status_code, is_non_retryable_error, is_retryable_error, ErrorCategory,
};
pub use client::ChatClient;
pub use config::ResilienceConfig;
pub use error::{
    CircuitOpenError, ErrorSeverity, FallbackAttempt, FallbackError, LlmError, LlmResult,
    NetworkFaultKind, TokenLimitError,
};
pub use fallback::{FallbackConfig, FallbackProvider};
pub use store::{KeyValueStore, MemoryStore};
pub use tokens::{
    estimate_prompt_tokens, model_context_window, validate_tokens, CharacterTokenEstimator,
    TokenEstimator, TokenEstimatorConfig, TokenValidation,
};

pub use core_types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, Choice, ChunkChoice,
    CompletionStream, FunctionCall, LlmProvider, Message, MessageRole, RequestContext, ToolCall,
    Usage,
};
