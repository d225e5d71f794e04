//! Failure classification for fallback and circuit breaker decisions
//!
//! Maps any failure to [`ErrorCategory`], checking in priority order:
//! 1. HTTP status code
//! 2. Recognized network-layer faults (typed `reqwest`/`std::io` errors anywhere
//!    in the `source()` chain)
//! 3. Substring patterns in the lower-cased error text
//!
//! Anything else is `Unknown`, which callers treat as retryable.

use crate::error::{CircuitOpenError, FallbackError, LlmError, NetworkFaultKind, TokenLimitError};
use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

/// Whether trying another provider could plausibly succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Transient provider-side failure: rate limit, 5xx, network fault
    Retryable,
    /// Caller-side failure that would recur on every provider
    NonRetryable,
    /// Unrecognized failure
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Retryable => "retryable",
            Self::NonRetryable => "non-retryable",
            Self::Unknown => "unknown",
        })
    }
}

// Checked before the non-retryable set, so "authentication timeout" is retryable.
static RETRYABLE_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"rate limit",
        r"too many requests",
        r"timeout",
        r"timed out",
        r"connection refused",
        r"connection reset",
        r"no such host",
        r"network is unreachable",
        r"tls handshake",
        r"\beof\b",
        r"service unavailable",
        r"overloaded",
    ])
    .expect("retryable patterns are valid regexes")
});

static NON_RETRYABLE_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"unauthorized",
        r"forbidden",
        r"invalid api key",
        r"invalid_api_key",
        r"authentication",
    ])
    .expect("non-retryable patterns are valid regexes")
});

/// Classify an HTTP status code
///
/// 429, 408 and every 5xx are retryable; every other 4xx is not. Anything
/// outside those ranges says nothing about the failure.
pub fn classify_status_code(status: u16) -> ErrorCategory {
    match status {
        408 | 429 => ErrorCategory::Retryable,
        500..=599 => ErrorCategory::Retryable,
        400..=499 => ErrorCategory::NonRetryable,
        _ => ErrorCategory::Unknown,
    }
}

/// Classify lower-cased error text against the known substring patterns
pub fn classify_message(message: &str) -> ErrorCategory {
    let message = message.to_lowercase();
    if RETRYABLE_PATTERNS.is_match(&message) {
        ErrorCategory::Retryable
    } else if NON_RETRYABLE_PATTERNS.is_match(&message) {
        ErrorCategory::NonRetryable
    } else {
        ErrorCategory::Unknown
    }
}

/// Classify an arbitrary error, walking its `source()` chain
pub fn classify(err: &(dyn Error + 'static)) -> ErrorCategory {
    if let Some(llm) = err.downcast_ref::<LlmError>() {
        return classify_llm_error(llm);
    }
    classify_chain(err, None)
}

/// True for Retryable and Unknown failures
pub fn is_retryable_error(err: &(dyn Error + 'static)) -> bool {
    classify(err) != ErrorCategory::NonRetryable
}

/// True only for NonRetryable failures
pub fn is_non_retryable_error(err: &(dyn Error + 'static)) -> bool {
    classify(err) == ErrorCategory::NonRetryable
}

pub(crate) fn classify_llm_error(err: &LlmError) -> ErrorCategory {
    match err {
        LlmError::Api {
            status, message, ..
        } => match classify_status_code(*status) {
            ErrorCategory::Unknown => classify_message(message),
            category => category,
        },
        LlmError::Network { .. }
        | LlmError::RateLimitExceeded { .. }
        | LlmError::Timeout { .. }
        | LlmError::CircuitOpen(_) => ErrorCategory::Retryable,
        LlmError::AuthenticationFailed { .. }
        | LlmError::InvalidRequest { .. }
        | LlmError::ModelNotFound { .. }
        | LlmError::ConfigurationError { .. }
        | LlmError::TokenLimitExceeded(_)
        | LlmError::Cancelled { .. } => ErrorCategory::NonRetryable,
        LlmError::FallbackExhausted(e) => classify_llm_error(&e.last_error),
        LlmError::RequestFailed { message, source } => match source {
            Some(source) => classify_chain(source.as_ref(), Some(message)),
            None => classify_message(message),
        },
        LlmError::ResponseParsingError { message } | LlmError::CacheStore { message } => {
            classify_message(message)
        }
    }
}

/// Detect a recognized network fault anywhere in the error chain
pub fn network_fault(err: &(dyn Error + 'static)) -> Option<NetworkFaultKind> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(LlmError::Network { kind, .. }) = e.downcast_ref::<LlmError>() {
            return Some(*kind);
        }
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if let Some(kind) = fault_from_io_kind(io.kind()) {
                return Some(kind);
            }
        }
        if let Some(r) = e.downcast_ref::<reqwest::Error>() {
            if r.is_timeout() {
                return Some(NetworkFaultKind::Timeout);
            }
        }
        current = e.source();
    }
    fault_from_message(&chain_text(err))
}

fn classify_chain(err: &(dyn Error + 'static), context: Option<&str>) -> ErrorCategory {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(category) = classify_typed(e) {
            return category;
        }
        current = e.source();
    }

    let text = match context {
        Some(context) => format!("{context}: {}", chain_text(err)),
        None => chain_text(err),
    };
    classify_message(&text)
}

/// Classification from the concrete error type alone, if it is conclusive
fn classify_typed(e: &(dyn Error + 'static)) -> Option<ErrorCategory> {
    let category = if let Some(llm) = e.downcast_ref::<LlmError>() {
        classify_llm_error(llm)
    } else if let Some(r) = e.downcast_ref::<reqwest::Error>() {
        classify_reqwest(r)
    } else if let Some(io) = e.downcast_ref::<std::io::Error>() {
        match fault_from_io_kind(io.kind()) {
            Some(_) => ErrorCategory::Retryable,
            None => ErrorCategory::Unknown,
        }
    } else if e.is::<tokio::time::error::Elapsed>() || e.is::<CircuitOpenError>() {
        ErrorCategory::Retryable
    } else if e.is::<TokenLimitError>() {
        ErrorCategory::NonRetryable
    } else if let Some(fallback) = e.downcast_ref::<FallbackError>() {
        classify_llm_error(&fallback.last_error)
    } else {
        ErrorCategory::Unknown
    };

    (category != ErrorCategory::Unknown).then_some(category)
}

fn classify_reqwest(err: &reqwest::Error) -> ErrorCategory {
    if let Some(status) = err.status() {
        let category = classify_status_code(status.as_u16());
        if category != ErrorCategory::Unknown {
            return category;
        }
    }
    if err.is_timeout() || err.is_connect() {
        return ErrorCategory::Retryable;
    }
    ErrorCategory::Unknown
}

fn fault_from_io_kind(kind: std::io::ErrorKind) -> Option<NetworkFaultKind> {
    use std::io::ErrorKind;
    match kind {
        ErrorKind::TimedOut => Some(NetworkFaultKind::Timeout),
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
            Some(NetworkFaultKind::ConnectionReset)
        }
        ErrorKind::ConnectionRefused => Some(NetworkFaultKind::ConnectionRefused),
        ErrorKind::UnexpectedEof => Some(NetworkFaultKind::UnexpectedEof),
        _ => None,
    }
}

fn fault_from_message(text: &str) -> Option<NetworkFaultKind> {
    let text = text.to_lowercase();
    if text.contains("no such host")
        || text.contains("dns")
        || text.contains("failed to lookup address")
    {
        Some(NetworkFaultKind::Dns)
    } else if text.contains("tls") || text.contains("certificate") {
        Some(NetworkFaultKind::Tls)
    } else if text.contains("connection reset") {
        Some(NetworkFaultKind::ConnectionReset)
    } else if text.contains("connection refused") {
        Some(NetworkFaultKind::ConnectionRefused)
    } else if text.contains("timed out") || text.contains("timeout") {
        Some(NetworkFaultKind::Timeout)
    } else if text.split(|c: char| !c.is_alphanumeric()).any(|w| w == "eof") {
        Some(NetworkFaultKind::UnexpectedEof)
    } else {
        None
    }
}

fn chain_text(err: &(dyn Error + 'static)) -> String {
    let mut parts = Vec::new();
    let mut current = Some(err);
    while let Some(e) = current {
        parts.push(e.to_string());
        current = e.source();
    }
    parts.join(": ")
}
