//! Provider capability and the uniform request/response types
//!
//! Defines the `LlmProvider` trait that every backend adapter implements. The
//! resilience layer treats implementations as black boxes: it never looks at
//! vendor-specific fields beyond what these types expose.

use crate::core_types::context::RequestContext;
use crate::core_types::messages::Message;
use crate::error::LlmResult;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;

/// Metadata key naming the provider that served a response
pub const METADATA_PROVIDER_USED: &str = "fallback_provider_used";
/// Metadata key holding the 1-based attempt that produced a response
pub const METADATA_ATTEMPT_COUNT: &str = "fallback_attempt_count";
/// Metadata key set to `true` when a response came from the cache
pub const METADATA_CACHE_HIT: &str = "cache_hit";
/// Metadata key holding the RFC 3339 time a cached response was stored
pub const METADATA_CACHED_AT: &str = "cached_at";

/// Chat completion request in the uniform shape
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Model identifier
    pub model: String,
    /// Conversation, oldest first
    pub messages: Vec<Message>,
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Top-p sampling parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Top-k sampling parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Deterministic sampling seed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Whether the caller asked for a streamed response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// End-user identifier forwarded to the vendor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ChatCompletionRequest {
    /// Create a request for `model` with the given messages
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            ..Self::default()
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream = Some(true);
        self
    }

    /// True when the request asks for a streamed response
    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One generated alternative
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Chat completion response in the uniform shape
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Provenance and cache annotations added by this layer
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub provider_metadata: HashMap<String, serde_json::Value>,
}

impl ChatCompletionResponse {
    /// Text of the first choice, if any
    pub fn content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }

    /// Provider that ultimately served this response (fallback chains only)
    pub fn served_by(&self) -> Option<&str> {
        self.provider_metadata
            .get(METADATA_PROVIDER_USED)
            .and_then(|v| v.as_str())
    }

    /// 1-based attempt that produced this response (fallback chains only)
    pub fn attempt_count(&self) -> Option<usize> {
        self.provider_metadata
            .get(METADATA_ATTEMPT_COUNT)
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
    }

    /// Whether this response was served from the cache
    pub fn is_cache_hit(&self) -> bool {
        self.provider_metadata
            .get(METADATA_CACHE_HIT)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Record provenance: which provider served the response and on which attempt
    pub(crate) fn stamp_provenance(&mut self, provider: &str, attempt: usize) {
        self.provider_metadata.insert(
            METADATA_PROVIDER_USED.to_string(),
            serde_json::Value::from(provider),
        );
        self.provider_metadata.insert(
            METADATA_ATTEMPT_COUNT.to_string(),
            serde_json::Value::from(attempt),
        );
    }
}

/// Incremental piece of a streamed choice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// One chunk of a streamed completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

impl ChatCompletionChunk {
    /// Text carried by the first choice's delta
    pub fn delta_content(&self) -> &str {
        self.choices
            .first()
            .map(|c| c.delta.content.as_str())
            .unwrap_or("")
    }
}

/// Stream of completion chunks. The stream ending (`None`) is the
/// end-of-stream signal; `Some(Err(_))` is a genuine read failure.
pub type CompletionStream = Pin<Box<dyn Stream<Item = LlmResult<ChatCompletionChunk>> + Send>>;

/// Build a `CompletionStream` from already materialized chunk results
pub fn stream_from_chunks(chunks: Vec<LlmResult<ChatCompletionChunk>>) -> CompletionStream {
    Box::pin(tokio_stream::iter(chunks))
}

/// Capability implemented by every backend adapter
///
/// Implementations must honor `ctx` where they can; the resilience layer also
/// races every call against the context's cancellation signal.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name used for circuit breaker state and provenance metadata
    fn provider_name(&self) -> &str;

    /// Issue a chat completion
    async fn create_completion(
        &self,
        ctx: &RequestContext,
        request: &ChatCompletionRequest,
    ) -> LlmResult<ChatCompletionResponse>;

    /// Issue a streamed chat completion
    async fn create_completion_stream(
        &self,
        ctx: &RequestContext,
        request: &ChatCompletionRequest,
    ) -> LlmResult<CompletionStream>;

    /// Release provider resources
    async fn close(&self) -> LlmResult<()>;
}
