//! Test helper utilities for resilient-llm integration tests
//!
//! Provides an OpenAI-style HTTP provider that talks to a wiremock server, so
//! fallback, classification and caching run against real HTTP status codes
//! and transport failures.
//!
//! IMPORTANT: These helpers are test-only and should NEVER be used in production code.

// Allow dead code in test utilities - functions are used across different test files
#![allow(dead_code)]

use async_trait::async_trait;
use resilient_llm::core_types::stream_from_chunks;
use resilient_llm::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, Choice, ChunkChoice,
    CompletionStream, LlmError, LlmProvider, LlmResult, Message, RequestContext, Usage,
};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Minimal OpenAI-compatible provider backed by reqwest
#[derive(Debug)]
pub struct HttpProvider {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(name: &str, base_url: &str) -> Self {
        Self::with_timeout(name, base_url, Duration::from_secs(5))
    }

    pub fn with_timeout(name: &str, base_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client should build");
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    async fn create_completion(
        &self,
        _ctx: &RequestContext,
        request: &ChatCompletionRequest,
    ) -> LlmResult<ChatCompletionResponse> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, COMPLETIONS_PATH))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::api(&self.name, status.as_u16(), body));
        }

        Ok(response.json::<ChatCompletionResponse>().await?)
    }

    async fn create_completion_stream(
        &self,
        ctx: &RequestContext,
        request: &ChatCompletionRequest,
    ) -> LlmResult<CompletionStream> {
        let response = self.create_completion(ctx, request).await?;
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

/// Successful completion body as the mock server returns it
pub fn completion_body(model: &str, content: &str) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: "chatcmpl-test".to_string(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: Message::assistant(content),
            finish_reason: Some("stop".to_string()),
        }],
        usage: Some(Usage {
            prompt_tokens: 12,
            completion_tokens: 7,
            total_tokens: 19,
        }),
        provider_metadata: Default::default(),
    }
}

/// Mount a successful completion and expect exactly `times` calls
pub async fn mount_success(server: &MockServer, content: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("gpt-4", content)))
        .expect(times)
        .mount(server)
        .await;
}

/// Mount an error status and expect exactly `times` calls
pub async fn mount_status(server: &MockServer, status: u16, body: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path(COMPLETIONS_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .expect(times)
        .mount(server)
        .await;
}

pub fn user_request(content: &str) -> ChatCompletionRequest {
    ChatCompletionRequest::new("gpt-4", vec![Message::user(content)])
}

/// Base URL of a local port with nothing listening on it
pub fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}
