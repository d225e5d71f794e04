//! Chat client composing validation, caching and provider fallback
//!
//! Per request: token validation (optional) -> cache lookup (optional) ->
//! provider call (a plain provider or a [`FallbackProvider`]) -> cache store.
//! Streaming requests are validated but never cached.

use crate::cache::CacheManager;
use crate::config::ResilienceConfig;
use crate::core_types::context::RequestContext;
use crate::core_types::provider::{
    ChatCompletionRequest, ChatCompletionResponse, CompletionStream, LlmProvider,
    METADATA_CACHED_AT, METADATA_CACHE_HIT,
};
use crate::error::{LlmError, LlmResult};
use crate::fallback::FallbackProvider;
use crate::logging::{log_debug, log_info, log_warn};
use crate::store::{KeyValueStore, MemoryStore};
use crate::tokens::{validate_tokens, CharacterTokenEstimator, TokenEstimator, TokenValidation};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Entry point for resilient chat completions
pub struct ChatClient {
    provider: Arc<dyn LlmProvider>,
    cache: Option<CacheManager>,
    token_estimator: Option<Arc<dyn TokenEstimator>>,
    validate_tokens: bool,
    default_max_completion_tokens: usize,
    reject_when_completion_exceeds: bool,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("provider", &self.provider.provider_name())
            .field("cache", &self.cache)
            .field("token_estimator", &self.token_estimator)
            .field("validate_tokens", &self.validate_tokens)
            .finish()
    }
}

impl ChatClient {
    /// Client over a single provider with caching and validation disabled
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            cache: None,
            token_estimator: None,
            validate_tokens: false,
            default_max_completion_tokens: 4096,
            reject_when_completion_exceeds: false,
        }
    }

    /// Build a client from configuration
    ///
    /// Providers are wrapped in a [`FallbackProvider`] when fallbacks are
    /// given or circuit breakers are configured. A configured cache without a
    /// store uses an in-process [`MemoryStore`].
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ConfigurationError`] if `config` fails validation.
    pub fn from_config(
        config: &ResilienceConfig,
        primary: Arc<dyn LlmProvider>,
        fallbacks: Vec<Arc<dyn LlmProvider>>,
        store: Option<Arc<dyn KeyValueStore>>,
    ) -> LlmResult<Self> {
        config.validate()?;

        let provider: Arc<dyn LlmProvider> =
            if fallbacks.is_empty() && config.circuit_breaker.is_none() {
                primary
            } else {
                Arc::new(FallbackProvider::new(
                    primary,
                    fallbacks,
                    config.fallback_config(),
                ))
            };

        let mut client = Self::new(provider);
        client.default_max_completion_tokens = config.default_max_completion_tokens;
        client.reject_when_completion_exceeds = config.reject_when_completion_exceeds;

        if let Some(cache_config) = &config.cache {
            let store = store.unwrap_or_else(|| {
                log_info!("No cache store supplied, using in-memory store");
                Arc::new(MemoryStore::new())
            });
            client.cache = Some(CacheManager::new(store, cache_config.clone()));
        }

        if config.validate_tokens {
            client = client.with_token_validation(Arc::new(CharacterTokenEstimator::new(
                config.token_estimator.clone(),
            )));
        }

        log_debug!(
            provider = %client.provider.provider_name(),
            cache = client.cache.is_some(),
            validate_tokens = client.validate_tokens,
            "ChatClient created"
        );
        Ok(client)
    }

    pub fn with_cache(mut self, cache: CacheManager) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the estimator without enabling validation
    pub fn with_token_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.token_estimator = Some(estimator);
        self
    }

    /// Reject requests whose prompt exceeds the model's context window
    pub fn with_token_validation(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.token_estimator = Some(estimator);
        self.validate_tokens = true;
        self
    }

    /// Completion budget used when a request omits `max_tokens`, and whether
    /// exceeding the window with that budget is also rejected
    pub fn with_completion_budget(mut self, default_max: usize, reject_when_exceeded: bool) -> Self {
        self.default_max_completion_tokens = default_max;
        self.reject_when_completion_exceeds = reject_when_exceeded;
        self
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn cache(&self) -> Option<&CacheManager> {
        self.cache.as_ref()
    }

    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    pub fn token_estimator(&self) -> Option<&Arc<dyn TokenEstimator>> {
        self.token_estimator.as_ref()
    }

    /// Pre-flight token check
    ///
    /// Returns `Ok(None)` when validation is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::TokenLimitExceeded`] when the prompt exceeds the
    /// context window, or when prompt plus completion budget exceeds it and
    /// the client rejects on completion overflow.
    pub fn validate_request(
        &self,
        request: &ChatCompletionRequest,
    ) -> LlmResult<Option<TokenValidation>> {
        let estimator = match &self.token_estimator {
            Some(estimator) if self.validate_tokens => estimator,
            _ => return Ok(None),
        };

        let max_completion = request
            .max_tokens
            .map_or(self.default_max_completion_tokens, |n| n as usize);
        let validation = validate_tokens(
            estimator.as_ref(),
            &request.model,
            &request.messages,
            max_completion,
        )?;

        if validation.exceeds_limit
            || (self.reject_when_completion_exceeds && validation.exceeds_with_completion)
        {
            return Err(LlmError::token_limit_exceeded(
                &request.model,
                validation.estimated_tokens,
                validation.context_window,
            ));
        }
        if validation.exceeds_with_completion {
            log_warn!(
                model = %request.model,
                estimated_tokens = validation.estimated_tokens,
                max_completion_tokens = max_completion,
                context_window = validation.context_window,
                "Prompt plus completion budget exceeds context window"
            );
        }
        Ok(Some(validation))
    }

    /// Create a chat completion
    pub async fn create_completion(
        &self,
        ctx: &RequestContext,
        request: &ChatCompletionRequest,
    ) -> LlmResult<ChatCompletionResponse> {
        let span = tracing::info_span!(
            "chat_completion",
            call_id = %Uuid::new_v4(),
            model = %request.model,
            provider = %self.provider.provider_name(),
        );
        self.complete(ctx, request).instrument(span).await
    }

    /// Create a streamed chat completion. Streams bypass the cache.
    pub async fn create_completion_stream(
        &self,
        ctx: &RequestContext,
        request: &ChatCompletionRequest,
    ) -> LlmResult<CompletionStream> {
        let span = tracing::info_span!(
            "chat_completion_stream",
            call_id = %Uuid::new_v4(),
            model = %request.model,
            provider = %self.provider.provider_name(),
        );
        async {
            ctx.check()?;
            self.validate_request(request)?;
            ctx.run(self.provider.create_completion_stream(ctx, request))
                .await
        }
        .instrument(span)
        .await
    }

    /// Release provider resources
    pub async fn close(&self) -> LlmResult<()> {
        self.provider.close().await
    }

    async fn complete(
        &self,
        ctx: &RequestContext,
        request: &ChatCompletionRequest,
    ) -> LlmResult<ChatCompletionResponse> {
        ctx.check()?;
        self.validate_request(request)?;

        let cache = self.cache.as_ref().filter(|c| c.should_cache(request));
        if let Some(cache) = cache {
            if let Some(entry) = cache.get(ctx, request).await? {
                let mut response = entry.response;
                response
                    .provider_metadata
                    .insert(METADATA_CACHE_HIT.to_string(), serde_json::Value::Bool(true));
                response.provider_metadata.insert(
                    METADATA_CACHED_AT.to_string(),
                    serde_json::Value::String(entry.cached_at.to_rfc3339()),
                );
                log_debug!(cached_at = %entry.cached_at, "Serving cached response");
                return Ok(response);
            }
        }

        let response = ctx
            .run(self.provider.create_completion(ctx, request))
            .await?;

        if let Some(cache) = cache {
            if let Err(e) = cache.set(ctx, request, &response).await {
                log_warn!(error = %e, "Failed to cache response");
            }
        }

        Ok(response)
    }
}
