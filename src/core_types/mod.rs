//! Core types shared by every layer of the crate
//!
//! ## Organization
//! - `messages` - Uniform chat message shape
//! - `provider` - Request/response types and the `LlmProvider` capability
//! - `context` - Per-request cancellation and deadline

pub mod context;
pub mod messages;
pub mod provider;

pub use context::RequestContext;
pub use messages::{FunctionCall, Message, MessageRole, ToolCall};
pub use provider::{
    stream_from_chunks, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
    Choice, ChunkChoice, CompletionStream, LlmProvider, Usage, METADATA_ATTEMPT_COUNT,
    METADATA_CACHED_AT, METADATA_CACHE_HIT, METADATA_PROVIDER_USED,
};
