//! Error types for resilient LLM operations.
//!
//! [`LlmError`] covers every failure this crate produces or passes through:
//! - Provider failures (HTTP status errors, network faults, rate limits)
//! - Caller errors (authentication, malformed requests, unknown models)
//! - The three request-level shapes raised by the resilience layer itself:
//!   [`CircuitOpenError`], [`FallbackError`] and [`TokenLimitError`]
//!
//! Every error can be classified with [`LlmError::category()`], which drives
//! fallback and circuit breaker decisions.
//!
//! # Error Handling Example
//!
//! ```rust,no_run
//! use resilient_llm::{ErrorCategory, LlmError};
//!
//! fn handle_error(err: LlmError) {
//!     match err {
//!         LlmError::FallbackExhausted(ref exhausted) => {
//!             for attempt in &exhausted.attempts {
//!                 println!("{} skipped={}", attempt.provider, attempt.skipped);
//!             }
//!         }
//!         LlmError::TokenLimitExceeded(ref limit) => {
//!             println!("prompt too long by {} tokens", -limit.available_tokens);
//!         }
//!         _ => {}
//!     }
//!
//!     if err.category() == ErrorCategory::NonRetryable {
//!         println!("Tell user: {}", err.user_message());
//!     }
//! }
//! ```

use crate::classifier::{self, ErrorCategory};
use crate::internals::circuit_breaker::CircuitState;
use crate::logging::{log_debug, log_error, log_warn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Underlying error attached to [`LlmError::RequestFailed`].
///
/// Held behind `Arc` so `LlmError` stays `Clone`.
pub type ErrorSource = Arc<dyn std::error::Error + Send + Sync>;

/// Convenient result type for LLM operations.
pub type LlmResult<T> = std::result::Result<T, LlmError>;

// ============================================================================
// Supporting types
// ============================================================================

/// Severity level for logging and alerting decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// System is unusable or data integrity is at risk.
    Critical,
    /// Action failed but system is stable.
    Error,
    /// Unexpected but recoverable situation.
    Warning,
    /// Expected failure, normal operation.
    Info,
}

impl ErrorSeverity {
    /// Tracing level a failure of this severity is logged at
    pub fn level(self) -> tracing::Level {
        match self {
            Self::Critical | Self::Error => tracing::Level::ERROR,
            Self::Warning => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
        }
    }
}

/// Recognized network-layer fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkFaultKind {
    Timeout,
    ConnectionReset,
    ConnectionRefused,
    Dns,
    Tls,
    UnexpectedEof,
}

impl fmt::Display for NetworkFaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timeout => "timeout",
            Self::ConnectionReset => "connection reset",
            Self::ConnectionRefused => "connection refused",
            Self::Dns => "dns failure",
            Self::Tls => "tls handshake failure",
            Self::UnexpectedEof => "unexpected eof",
        })
    }
}

/// A provider was not attempted because its circuit breaker is open
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitOpenError {
    /// Provider whose circuit rejected the request
    pub provider: String,
    /// Circuit state at rejection time
    pub state: CircuitState,
    /// Wall-clock time of the failure that last fed the circuit
    pub last_failure: Option<DateTime<Utc>>,
    /// Remaining wait before the circuit admits a probe
    pub retry_after: Duration,
}

impl fmt::Display for CircuitOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "circuit breaker {} for provider {}, retry after {}ms",
            self.state,
            self.provider,
            self.retry_after.as_millis()
        )
    }
}

impl std::error::Error for CircuitOpenError {}

/// One provider considered by a fallback chain
#[derive(Debug, Clone)]
pub struct FallbackAttempt {
    /// Provider name
    pub provider: String,
    /// Failure, or `None` if the attempt succeeded
    pub error: Option<LlmError>,
    /// Wall-clock time spent on the attempt (zero when skipped)
    pub duration: Duration,
    /// True when the provider was not called because its circuit was open
    pub skipped: bool,
}

/// Every candidate in a fallback chain failed, or the chain stopped early
#[derive(Debug, Clone)]
pub struct FallbackError {
    /// Attempts in the order they were made, oldest first
    pub attempts: Vec<FallbackAttempt>,
    /// Error of the final attempt
    pub last_error: Box<LlmError>,
}

impl fmt::Display for FallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "all providers failed after {} attempts: {}",
            self.attempts.len(),
            self.last_error
        )
    }
}

impl std::error::Error for FallbackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.last_error.as_ref())
    }
}

/// The estimated prompt does not fit the model's context window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenLimitError {
    pub estimated_tokens: usize,
    pub context_window: usize,
    /// `context_window - estimated_tokens`, negative when over the limit
    pub available_tokens: i64,
    pub model: String,
}

impl fmt::Display for TokenLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "token limit exceeded for model {}: estimated {} tokens, context window {}, available {}",
            self.model, self.estimated_tokens, self.context_window, self.available_tokens
        )
    }
}

impl std::error::Error for TokenLimitError {}

// ============================================================================
// LlmError
// ============================================================================

/// Errors that can occur during resilient LLM operations.
///
/// Use the constructor methods, which log at creation time.
///
/// | Variant | Category |
/// |---------|----------|
/// | `Api` | by HTTP status |
/// | `Network` | Retryable |
/// | `RateLimitExceeded` | Retryable |
/// | `Timeout` | Retryable |
/// | `CircuitOpen` | Retryable |
/// | `AuthenticationFailed` | NonRetryable |
/// | `InvalidRequest` | NonRetryable |
/// | `ModelNotFound` | NonRetryable |
/// | `ConfigurationError` | NonRetryable |
/// | `TokenLimitExceeded` | NonRetryable |
/// | `Cancelled` | NonRetryable |
/// | `FallbackExhausted` | category of the last error |
/// | `RequestFailed` | by source chain, then message |
/// | `ResponseParsingError` / `CacheStore` | by message |
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    /// The provider answered with a non-success HTTP status.
    #[error("{provider} API error (status {status}): {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    /// The request could not be completed. Inspect `source` for the cause.
    #[error("Request failed: {message}")]
    RequestFailed {
        message: String,
        #[source]
        source: Option<ErrorSource>,
    },

    /// A recognized network-layer fault.
    #[error("Network error ({kind}): {message}")]
    Network {
        kind: NetworkFaultKind,
        message: String,
    },

    #[error("Rate limit exceeded, retry after {retry_after_seconds}s")]
    RateLimitExceeded { retry_after_seconds: u64 },

    #[error("Request timed out after {timeout_seconds}s")]
    Timeout { timeout_seconds: u64 },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Response parsing failed: {message}")]
    ResponseParsingError { message: String },

    /// Key-value store failure. The cache absorbs these on reads.
    #[error("Cache store error: {message}")]
    CacheStore { message: String },

    /// The request was cancelled or its deadline passed.
    #[error("Request cancelled: {reason}")]
    Cancelled { reason: String },

    #[error(transparent)]
    CircuitOpen(CircuitOpenError),

    #[error(transparent)]
    FallbackExhausted(FallbackError),

    #[error(transparent)]
    TokenLimitExceeded(TokenLimitError),
}

impl LlmError {
    /// Classify this error for fallback and circuit breaker decisions.
    pub fn category(&self) -> ErrorCategory {
        classifier::classify_llm_error(self)
    }

    /// True for Retryable **and** Unknown errors.
    ///
    /// Unrecognized failures are treated as worth trying another provider.
    pub fn is_retryable(&self) -> bool {
        self.category() != ErrorCategory::NonRetryable
    }

    /// True only for errors classified NonRetryable
    pub fn is_non_retryable(&self) -> bool {
        self.category() == ErrorCategory::NonRetryable
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// HTTP status carried by the error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::FallbackExhausted(e) => e.last_error.status_code(),
            _ => None,
        }
    }

    /// Get the error severity for logging and alerting.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Api { status, .. } if *status >= 500 => ErrorSeverity::Error,
            Self::Api { .. } => ErrorSeverity::Warning,
            Self::RequestFailed { .. } => ErrorSeverity::Error,
            Self::Network { .. } => ErrorSeverity::Warning,
            Self::RateLimitExceeded { .. } => ErrorSeverity::Warning,
            Self::Timeout { .. } => ErrorSeverity::Warning,
            Self::AuthenticationFailed { .. } => ErrorSeverity::Error,
            Self::InvalidRequest { .. } => ErrorSeverity::Info,
            Self::ModelNotFound { .. } => ErrorSeverity::Error,
            Self::ConfigurationError { .. } => ErrorSeverity::Error,
            Self::ResponseParsingError { .. } => ErrorSeverity::Warning,
            Self::CacheStore { .. } => ErrorSeverity::Warning,
            Self::Cancelled { .. } => ErrorSeverity::Info,
            Self::CircuitOpen(_) => ErrorSeverity::Warning,
            Self::FallbackExhausted(_) => ErrorSeverity::Critical,
            Self::TokenLimitExceeded(_) => ErrorSeverity::Info,
        }
    }

    /// Convert to a message that's safe to show to end users.
    pub fn user_message(&self) -> String {
        match self {
            Self::Api { status, .. } if *status >= 500 => {
                "The AI service is having problems. Please try again later".to_string()
            }
            Self::Api { .. } | Self::InvalidRequest { .. } => {
                "The AI service rejected the request".to_string()
            }
            Self::RequestFailed { .. } | Self::Network { .. } => {
                "Unable to communicate with AI service. Please try again".to_string()
            }
            Self::RateLimitExceeded {
                retry_after_seconds,
            } => {
                format!("Service is busy. Please wait {retry_after_seconds} seconds and try again")
            }
            Self::Timeout { .. } => "Request timed out. Please try again".to_string(),
            Self::AuthenticationFailed { .. } => {
                "Authentication failed. Please check your credentials".to_string()
            }
            Self::ModelNotFound { .. } => "The requested model is not available".to_string(),
            Self::ConfigurationError { .. } => {
                "AI service configuration issue. Please check your settings".to_string()
            }
            Self::ResponseParsingError { .. } => {
                "Received an invalid response from AI service".to_string()
            }
            Self::CacheStore { .. } => "Response cache is unavailable".to_string(),
            Self::Cancelled { .. } => "The request was cancelled".to_string(),
            Self::CircuitOpen(e) => format!(
                "The AI service is temporarily unavailable. Please retry in {} seconds",
                e.retry_after.as_secs().max(1)
            ),
            Self::FallbackExhausted(_) => {
                "All AI services are currently unavailable. Please try again later".to_string()
            }
            Self::TokenLimitExceeded(_) => {
                "Your request is too long. Please shorten it and try again".to_string()
            }
        }
    }

    // =========================================================================
    // Constructor methods with automatic logging
    // =========================================================================

    pub fn api(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        let provider = provider.into();
        let message = message.into();
        log_warn!(
            error_type = "api_error",
            provider = %provider,
            status = status,
            message = %message,
            "LLM provider returned an error status"
        );
        Self::Api {
            provider,
            status,
            message,
        }
    }

    pub fn request_failed(message: impl Into<String>, source: Option<ErrorSource>) -> Self {
        let message = message.into();
        log_error!(
            error_type = "request_failed",
            message = %message,
            has_source = source.is_some(),
            "LLM request execution failed"
        );
        Self::RequestFailed { message, source }
    }

    pub fn network(kind: NetworkFaultKind, message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(
            error_type = "network",
            fault = %kind,
            message = %message,
            "LLM request hit a network fault"
        );
        Self::Network { kind, message }
    }

    pub fn rate_limit_exceeded(retry_after_seconds: u64) -> Self {
        log_warn!(
            error_type = "rate_limit_exceeded",
            retry_after_seconds = retry_after_seconds,
            "LLM provider rate limit exceeded"
        );
        Self::RateLimitExceeded {
            retry_after_seconds,
        }
    }

    pub fn timeout(timeout_seconds: u64) -> Self {
        log_warn!(
            error_type = "timeout",
            timeout_seconds = timeout_seconds,
            "LLM request timed out"
        );
        Self::Timeout { timeout_seconds }
    }

    pub fn authentication_failed(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(
            error_type = "authentication_failed",
            message = %message,
            "LLM provider authentication failed"
        );
        Self::AuthenticationFailed { message }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(
            error_type = "invalid_request",
            message = %message,
            "LLM request rejected as invalid"
        );
        Self::InvalidRequest { message }
    }

    pub fn model_not_found(model: impl Into<String>) -> Self {
        let model = model.into();
        log_error!(
            error_type = "model_not_found",
            model = %model,
            "LLM model not found"
        );
        Self::ModelNotFound { model }
    }

    pub fn configuration_error(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(
            error_type = "configuration_error",
            message = %message,
            "Resilience configuration validation failed"
        );
        Self::ConfigurationError { message }
    }

    pub fn response_parsing_error(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(
            error_type = "response_parsing_error",
            message = %message,
            "LLM response format invalid"
        );
        Self::ResponseParsingError { message }
    }

    pub fn cache_store(message: impl Into<String>) -> Self {
        let message = message.into();
        log_debug!(
            error_type = "cache_store",
            message = %message,
            "Cache store operation failed"
        );
        Self::CacheStore { message }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        log_debug!(error_type = "cancelled", reason = %reason, "LLM request cancelled");
        Self::Cancelled { reason }
    }

    pub fn circuit_open(error: CircuitOpenError) -> Self {
        log_debug!(
            error_type = "circuit_open",
            provider = %error.provider,
            retry_after_ms = error.retry_after.as_millis() as u64,
            "Provider skipped, circuit breaker open"
        );
        Self::CircuitOpen(error)
    }

    pub fn fallback_exhausted(attempts: Vec<FallbackAttempt>, last_error: LlmError) -> Self {
        log_error!(
            error_type = "fallback_exhausted",
            attempts = attempts.len(),
            last_error = %last_error,
            "All fallback providers failed"
        );
        Self::FallbackExhausted(FallbackError {
            attempts,
            last_error: Box::new(last_error),
        })
    }

    pub fn token_limit_exceeded(
        model: impl Into<String>,
        estimated_tokens: usize,
        context_window: usize,
    ) -> Self {
        let model = model.into();
        let available_tokens = context_window as i64 - estimated_tokens as i64;
        log_warn!(
            error_type = "token_limit_exceeded",
            model = %model,
            estimated_tokens = estimated_tokens,
            context_window = context_window,
            "Request exceeds model context window"
        );
        Self::TokenLimitExceeded(TokenLimitError {
            estimated_tokens,
            context_window,
            available_tokens,
            model,
        })
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::network(NetworkFaultKind::Timeout, err.to_string());
        }
        if err.is_connect() {
            let kind =
                classifier::network_fault(&err).unwrap_or(NetworkFaultKind::ConnectionRefused);
            return Self::network(kind, err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::api("http", status.as_u16(), err.to_string());
        }
        Self::request_failed(err.to_string(), Some(Arc::new(err)))
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::response_parsing_error(err.to_string())
    }
}
