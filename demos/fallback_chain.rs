//! Fallback chain example demonstrating circuit breakers and response caching.
//!
//! This example shows how to:
//! - Compose a primary and a backup provider behind one client
//! - Watch a circuit breaker open after repeated provider failures
//! - Serve repeated requests from the response cache
//! - Classify failures to decide whether a fallback makes sense
//!
//! # Running
//!
//! ```bash
//! cargo run --example fallback_chain
//! ```
//!
//! The providers here are in-process stand-ins so the example runs offline.
//! Swap them for real adapters implementing `LlmProvider`.

use async_trait::async_trait;
use resilient_llm::core_types::stream_from_chunks;
use resilient_llm::{
    CacheConfig, CacheManager, ChatClient, ChatCompletionChunk, ChatCompletionRequest,
    ChatCompletionResponse, Choice, ChunkChoice, CircuitBreakerConfig, CompletionStream,
    FallbackConfig, FallbackProvider, LlmError, LlmProvider, LlmResult, MemoryStore, Message,
    RequestContext,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Provider that fails its first `failures` calls with a 503
struct FlakyProvider {
    name: &'static str,
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyProvider {
    fn new(name: &'static str, failures: usize) -> Self {
        Self {
            name,
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    fn respond(&self, request: &ChatCompletionRequest) -> LlmResult<ChatCompletionResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(LlmError::api(self.name, 503, "service unavailable"));
        }
        Ok(ChatCompletionResponse {
            id: format!("{}-{call}", self.name),
            model: request.model.clone(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(format!("hello from {}", self.name)),
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
            provider_metadata: Default::default(),
        })
    }
}

#[async_trait]
impl LlmProvider for FlakyProvider {
    fn provider_name(&self) -> &str {
        self.name
    }

    async fn create_completion(
        &self,
        _ctx: &RequestContext,
        request: &ChatCompletionRequest,
    ) -> LlmResult<ChatCompletionResponse> {
        self.respond(request)
    }

    async fn create_completion_stream(
        &self,
        _ctx: &RequestContext,
        request: &ChatCompletionRequest,
    ) -> LlmResult<CompletionStream> {
        let response = self.respond(request)?;
        let chunks = response
            .choices
            .into_iter()
            .map(|choice| {
                Ok(ChatCompletionChunk {
                    id: response.id.clone(),
                    model: response.model.clone(),
                    choices: vec![ChunkChoice {
                        index: choice.index,
                        delta: choice.message,
                        finish_reason: choice.finish_reason,
                    }],
                })
            })
            .collect();
        Ok(stream_from_chunks(chunks))
    }

    async fn close(&self) -> LlmResult<()> {
        Ok(())
    }
}

/// Demonstrates the breaker opening and the backup taking over
async fn demonstrate_circuit_breaker() -> LlmResult<()> {
    println!("=== Fallback with Circuit Breaker ===\n");

    let primary = Arc::new(FlakyProvider::new("primary", usize::MAX));
    let backup: Arc<dyn LlmProvider> = Arc::new(FlakyProvider::new("backup", 0));
    let chain = Arc::new(FallbackProvider::new(
        primary.clone(),
        vec![backup],
        FallbackConfig {
            circuit_breaker: Some(CircuitBreakerConfig {
                failure_threshold: 2,
                timeout: Duration::from_secs(30),
                ..CircuitBreakerConfig::default()
            }),
            ..FallbackConfig::default()
        },
    ));
    let client = ChatClient::new(chain.clone());
    let ctx = RequestContext::new();

    for i in 1..=4 {
        let request = ChatCompletionRequest::new("gpt-4o", vec![Message::user(format!("ping {i}"))]);
        let response = client.create_completion(&ctx, &request).await?;
        let stats = chain
            .circuit_breaker("primary")
            .map(|breaker| breaker.stats());
        println!(
            "request {i}: served by {:?} on attempt {:?}, primary circuit {}",
            response.served_by(),
            response.attempt_count(),
            stats.map_or("disabled".to_string(), |s| s.state.to_string()),
        );
    }
    println!(
        "primary was called {} times\n",
        primary.calls.load(Ordering::SeqCst)
    );
    Ok(())
}

/// Demonstrates cache hits on repeated requests
async fn demonstrate_cache() -> LlmResult<()> {
    println!("=== Response Cache ===\n");

    let provider = Arc::new(FlakyProvider::new("openai", 0));
    let cache = CacheManager::new(
        Arc::new(MemoryStore::new()),
        CacheConfig {
            ttl: Duration::from_secs(600),
            ..CacheConfig::default()
        },
    );
    let client = ChatClient::new(provider.clone()).with_cache(cache);
    let ctx = RequestContext::new();
    let request = ChatCompletionRequest::new("gpt-4o", vec![Message::user("What is 2+2?")]);

    for i in 1..=3 {
        let response = client.create_completion(&ctx, &request).await?;
        println!("request {i}: cache hit = {}", response.is_cache_hit());
    }
    println!(
        "provider was called {} time(s)\n",
        provider.calls.load(Ordering::SeqCst)
    );
    Ok(())
}

/// Print how the fallback chain would route a few typical failures
fn demonstrate_classification() {
    println!("=== Error Classification ===\n");

    let errors = vec![
        LlmError::api("openai", 429, "rate limit reached"),
        LlmError::api("openai", 401, "invalid api key"),
        LlmError::timeout(30),
        LlmError::response_parsing_error("unexpected payload"),
    ];

    for error in errors {
        println!("{error}");
        println!("  Category: {}", error.category());
        println!("  Falls back: {}", error.is_retryable());
        println!("  User message: {}", error.user_message());
        println!();
    }
}

#[tokio::main]
async fn main() -> LlmResult<()> {
    demonstrate_circuit_breaker().await?;
    demonstrate_cache().await?;
    demonstrate_classification();
    Ok(())
}
