//! Test helper utilities shared by the unit test modules
//!
//! IMPORTANT: These helpers are test-only and should NEVER be used in production code.

#![allow(dead_code)]

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::core_types::context::RequestContext;
use crate::core_types::messages::Message;
use crate::core_types::provider::{
    stream_from_chunks, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
    Choice, ChunkChoice, CompletionStream, LlmProvider, Usage,
};
use crate::error::{LlmError, LlmResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a scripted provider does on one call
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Succeed with this content
    Respond(String),
    /// Fail with this error
    Fail(LlmError),
    /// Never complete (until the request is cancelled)
    Hang,
}

/// Provider that replays scripted outcomes and counts calls
///
/// The last outcome repeats once the script is exhausted.
#[derive(Debug)]
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Outcome>>,
    last: Mutex<Outcome>,
    stream_items: Mutex<Option<Vec<LlmResult<ChatCompletionChunk>>>>,
    close_error: Option<LlmError>,
    calls: AtomicUsize,
    closed: AtomicBool,
}

impl ScriptedProvider {
    pub fn new(name: &str, script: Vec<Outcome>) -> Self {
        let last = script
            .last()
            .cloned()
            .unwrap_or_else(|| Outcome::Respond(format!("response from {name}")));
        Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            last: Mutex::new(last),
            stream_items: Mutex::new(None),
            close_error: None,
            calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn succeeding(name: &str) -> Arc<Self> {
        Arc::new(Self::new(name, vec![Outcome::Respond(format!("response from {name}"))]))
    }

    pub fn failing(name: &str, error: LlmError) -> Arc<Self> {
        Arc::new(Self::new(name, vec![Outcome::Fail(error)]))
    }

    pub fn hanging(name: &str) -> Arc<Self> {
        Arc::new(Self::new(name, vec![Outcome::Hang]))
    }

    /// Stream these items instead of a single chunk on successful stream calls
    pub fn with_stream_items(self, items: Vec<LlmResult<ChatCompletionChunk>>) -> Self {
        *self.stream_items.lock() = Some(items);
        self
    }

    pub fn with_close_error(mut self, error: LlmError) -> Self {
        self.close_error = Some(error);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().pop_front() {
            Some(outcome) => outcome,
            None => self.last.lock().clone(),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    async fn create_completion(
        &self,
        _ctx: &RequestContext,
        request: &ChatCompletionRequest,
    ) -> LlmResult<ChatCompletionResponse> {
        match self.next_outcome() {
            Outcome::Respond(content) => Ok(text_response(&request.model, &content)),
            Outcome::Fail(error) => Err(error),
            Outcome::Hang => std::future::pending().await,
        }
    }

    async fn create_completion_stream(
        &self,
        _ctx: &RequestContext,
        _request: &ChatCompletionRequest,
    ) -> LlmResult<CompletionStream> {
        match self.next_outcome() {
            Outcome::Respond(content) => {
                let items = self
                    .stream_items
                    .lock()
                    .clone()
                    .unwrap_or_else(|| vec![Ok(chunk(&content))]);
                Ok(stream_from_chunks(items))
            }
            Outcome::Fail(error) => Err(error),
            Outcome::Hang => std::future::pending().await,
        }
    }

    async fn close(&self) -> LlmResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        match &self.close_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Single-choice assistant response
pub fn text_response(model: &str, content: &str) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: "resp-1".to_string(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: Message::assistant(content),
            finish_reason: Some("stop".to_string()),
        }],
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        provider_metadata: Default::default(),
    }
}

pub fn chunk(content: &str) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: "chunk-1".to_string(),
        model: "gpt-4".to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta: Message::assistant(content),
            finish_reason: None,
        }],
    }
}

/// Simple user request against gpt-4
pub fn user_request(content: &str) -> ChatCompletionRequest {
    ChatCompletionRequest::new("gpt-4", vec![Message::user(content)])
}

/// Breaker config with a 30s open timeout and the given consecutive threshold
pub fn breaker_config(failure_threshold: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold,
        success_threshold: 2,
        timeout: Duration::from_secs(30),
        failure_rate_threshold: 0.5,
        minimum_requests: 10,
    }
}

pub fn server_error(provider: &str) -> LlmError {
    LlmError::api(provider, 503, "service unavailable")
}

pub fn auth_error(provider: &str) -> LlmError {
    LlmError::api(provider, 401, "invalid api key")
}

pub fn as_dyn(provider: Arc<ScriptedProvider>) -> Arc<dyn LlmProvider> {
    provider
}
