//! Primary -> fallback provider chain with per-provider circuit breakers
//!
//! Candidates are tried strictly in order, one attempt each, never in
//! parallel. The chain stops on the first success, on a NonRetryable failure,
//! or on cancellation; otherwise it runs out of candidates and raises
//! [`LlmError::FallbackExhausted`] with every attempt recorded.
//!
//! Circuit breakers only count failures the provider is plausibly responsible
//! for: Retryable failures always, Unknown failures when
//! [`FallbackConfig::count_unknown_failures`] is set. NonRetryable and
//! cancelled calls never count.

use crate::classifier::ErrorCategory;
use crate::core_types::context::RequestContext;
use crate::core_types::provider::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, CompletionStream,
    LlmProvider,
};
use crate::error::{ErrorSeverity, FallbackAttempt, LlmError, LlmResult};
use crate::internals::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::logging::{log_debug, log_error, log_info, log_warn};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::time::Instant;

/// Fallback chain behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Circuit breaker settings applied to every provider. `None` disables breakers.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Count Unknown-classified failures against a provider's breaker
    pub count_unknown_failures: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: None,
            count_unknown_failures: true,
        }
    }
}

/// Provider that tries a primary, then each fallback in order
pub struct FallbackProvider {
    name: String,
    primary: Arc<dyn LlmProvider>,
    fallbacks: Vec<Arc<dyn LlmProvider>>,
    breakers: HashMap<String, Arc<CircuitBreaker>>,
    config: FallbackConfig,
}

impl std::fmt::Debug for FallbackProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackProvider")
            .field("name", &self.name)
            .field(
                "fallbacks",
                &self
                    .fallbacks
                    .iter()
                    .map(|p| p.provider_name())
                    .collect::<Vec<_>>(),
            )
            .field("config", &self.config)
            .finish()
    }
}

/// Successful chain outcome before provenance is applied
struct Served<T> {
    value: T,
    provider: String,
    attempt: usize,
}

impl FallbackProvider {
    pub fn new(
        primary: Arc<dyn LlmProvider>,
        fallbacks: Vec<Arc<dyn LlmProvider>>,
        config: FallbackConfig,
    ) -> Self {
        let mut breakers = HashMap::new();
        if let Some(breaker_config) = &config.circuit_breaker {
            for provider in std::iter::once(&primary).chain(fallbacks.iter()) {
                let name = provider.provider_name().to_string();
                breakers
                    .entry(name.clone())
                    .or_insert_with(|| Arc::new(CircuitBreaker::new(name, breaker_config.clone())));
            }
        }

        Self {
            name: format!("{}+fallback", primary.provider_name()),
            primary,
            fallbacks,
            breakers,
            config,
        }
    }

    pub fn primary(&self) -> &Arc<dyn LlmProvider> {
        &self.primary
    }

    pub fn fallbacks(&self) -> &[Arc<dyn LlmProvider>] {
        &self.fallbacks
    }

    /// Circuit breaker for `provider`, if breakers are enabled
    pub fn circuit_breaker(&self, provider: &str) -> Option<&Arc<CircuitBreaker>> {
        self.breakers.get(provider)
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    fn candidates(&self) -> impl Iterator<Item = &Arc<dyn LlmProvider>> {
        std::iter::once(&self.primary).chain(self.fallbacks.iter())
    }

    async fn run_chain<T, F, Fut>(&self, ctx: &RequestContext, call: F) -> LlmResult<Served<T>>
    where
        F: Fn(Arc<dyn LlmProvider>) -> Fut,
        Fut: Future<Output = LlmResult<T>>,
    {
        let mut attempts: Vec<FallbackAttempt> = Vec::with_capacity(1 + self.fallbacks.len());
        let mut last_error = None;

        for (index, provider) in self.candidates().enumerate() {
            ctx.check()?;
            let name = provider.provider_name().to_string();
            let breaker = self.breakers.get(&name);

            if let Some(breaker) = breaker {
                if !breaker.allow_request() {
                    let error = LlmError::circuit_open(breaker.open_error());
                    attempts.push(FallbackAttempt {
                        provider: name,
                        error: Some(error.clone()),
                        duration: Duration::ZERO,
                        skipped: true,
                    });
                    last_error = Some(error);
                    continue;
                }
            }

            let started = Instant::now();
            let result = ctx.run(call(Arc::clone(provider))).await;
            let duration = started.elapsed();

            match result {
                Ok(value) => {
                    if let Some(breaker) = breaker {
                        breaker.record_success();
                    }
                    let attempt = attempts.len() + 1;
                    log_debug!(
                        provider = %name,
                        attempt = attempt,
                        duration_ms = duration.as_millis() as u64,
                        "Provider request succeeded"
                    );
                    return Ok(Served {
                        value,
                        provider: name,
                        attempt,
                    });
                }
                Err(error) if error.is_cancelled() => {
                    log_debug!(
                        provider = %name,
                        attempt = attempts.len() + 1,
                        "Request cancelled, not trying further providers"
                    );
                    return Err(error);
                }
                Err(error) => {
                    let category = error.category();
                    if let Some(breaker) = breaker {
                        if counts_against_breaker(category, self.config.count_unknown_failures) {
                            breaker.record_failure();
                        }
                    }
                    log_provider_failure(&name, attempts.len() + 1, duration, category, &error);
                    attempts.push(FallbackAttempt {
                        provider: name,
                        error: Some(error.clone()),
                        duration,
                        skipped: false,
                    });

                    if category == ErrorCategory::NonRetryable {
                        if index == 0 {
                            log_debug!("Non-retryable error from primary, not attempting fallback");
                            return Err(error);
                        }
                        log_debug!("Non-retryable error from fallback, stopping chain");
                        last_error = Some(error);
                        break;
                    }
                    last_error = Some(error);
                }
            }
        }

        let last_error = last_error.unwrap_or_else(|| {
            LlmError::configuration_error("fallback chain has no providers to try")
        });
        Err(LlmError::fallback_exhausted(attempts, last_error))
    }
}

#[async_trait::async_trait]
impl LlmProvider for FallbackProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    async fn create_completion(
        &self,
        ctx: &RequestContext,
        request: &ChatCompletionRequest,
    ) -> LlmResult<ChatCompletionResponse> {
        let served = self
            .run_chain(ctx, |provider| async move {
                provider.create_completion(ctx, request).await
            })
            .await?;

        let mut response = served.value;
        response.stamp_provenance(&served.provider, served.attempt);
        Ok(response)
    }

    async fn create_completion_stream(
        &self,
        ctx: &RequestContext,
        request: &ChatCompletionRequest,
    ) -> LlmResult<CompletionStream> {
        let served = self
            .run_chain(ctx, |provider| async move {
                provider.create_completion_stream(ctx, request).await
            })
            .await?;

        match self.breakers.get(&served.provider) {
            Some(breaker) => Ok(Box::pin(CircuitAwareStream {
                inner: served.value,
                breaker: Arc::clone(breaker),
                count_unknown_failures: self.config.count_unknown_failures,
            })),
            None => Ok(served.value),
        }
    }

    async fn close(&self) -> LlmResult<()> {
        let mut last_error = None;
        for provider in self.candidates() {
            if let Err(e) = provider.close().await {
                log_warn!(provider = %provider.provider_name(), error = %e, "Provider close failed");
                last_error = Some(e);
            }
        }
        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn log_provider_failure(
    provider: &str,
    attempt: usize,
    duration: Duration,
    category: ErrorCategory,
    error: &LlmError,
) {
    let duration_ms = duration.as_millis() as u64;
    match error.severity() {
        ErrorSeverity::Critical | ErrorSeverity::Error => log_error!(
            provider = %provider,
            attempt = attempt,
            duration_ms = duration_ms,
            category = %category,
            error = %error,
            "Provider request failed"
        ),
        ErrorSeverity::Warning => log_warn!(
            provider = %provider,
            attempt = attempt,
            duration_ms = duration_ms,
            category = %category,
            error = %error,
            "Provider request failed"
        ),
        ErrorSeverity::Info => log_info!(
            provider = %provider,
            attempt = attempt,
            duration_ms = duration_ms,
            category = %category,
            error = %error,
            "Provider request failed"
        ),
    }
}

/// Whether a failure in `category` should trip the provider's breaker
fn counts_against_breaker(category: ErrorCategory, count_unknown_failures: bool) -> bool {
    match category {
        ErrorCategory::Retryable => true,
        ErrorCategory::Unknown => count_unknown_failures,
        ErrorCategory::NonRetryable => false,
    }
}

/// Forwards a provider stream, reporting every read failure to the breaker
struct CircuitAwareStream {
    inner: CompletionStream,
    breaker: Arc<CircuitBreaker>,
    count_unknown_failures: bool,
}

impl Stream for CircuitAwareStream {
    type Item = LlmResult<ChatCompletionChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let item = ready!(this.inner.as_mut().poll_next(cx));

        if let Some(Err(error)) = &item {
            if counts_against_breaker(error.category(), this.count_unknown_failures) {
                this.breaker.record_failure();
            }
            log_warn!(
                provider = %this.breaker.name(),
                error = %error,
                "Stream read failed"
            );
        }

        Poll::Ready(item)
    }
}
