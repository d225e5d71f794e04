//! Resilience configuration
//!
//! [`ResilienceConfig`] gathers the settings for every layer the client
//! composes. It can be built in code, deserialized with serde, parsed from a
//! flat key/value section, or read from `LLM_RESILIENCE_*` environment
//! variables.
//!
//! # Section keys
//!
//! | Key | Type |
//! |-----|------|
//! | `circuit_breaker_enabled` | bool |
//! | `circuit_breaker_failure_threshold` | u32 |
//! | `circuit_breaker_success_threshold` | u32 |
//! | `circuit_breaker_timeout_secs` | f64 |
//! | `circuit_breaker_failure_rate_threshold` | f64 |
//! | `circuit_breaker_minimum_requests` | u32 |
//! | `count_unknown_failures` | bool |
//! | `cache_enabled` | bool |
//! | `cache_ttl_secs` | u64 |
//! | `cache_key_prefix` | string |
//! | `cache_skip_streaming` | bool |
//! | `cache_cacheable_models` | comma list |
//! | `cache_exclude_parameters` | comma list |
//! | `cache_include_temperature` | bool |
//! | `cache_include_seed` | bool |
//! | `tokens_characters_per_token` | f64 |
//! | `tokens_overhead_per_message` | usize |
//! | `tokens_context_windows` | `model=window,...` |
//! | `validate_tokens` | bool |
//! | `default_max_completion_tokens` | usize |
//! | `reject_when_completion_exceeds` | bool |
//!
//! Setting any `circuit_breaker_*` or `cache_*` key enables that layer unless
//! its `*_enabled` key is `false`.

use crate::cache::{CacheConfig, CACHE_KEY_PARAMETERS};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{LlmError, LlmResult};
use crate::fallback::FallbackConfig;
use crate::logging::log_debug;
use crate::tokens::TokenEstimatorConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Prefix of the environment variables read by [`ResilienceConfig::from_env`]
pub const ENV_PREFIX: &str = "LLM_RESILIENCE_";

/// Settings for every resilience layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Per-provider circuit breakers. `None` disables them.
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Count Unknown-classified failures against circuit breakers
    pub count_unknown_failures: bool,
    /// Response cache. `None` disables caching.
    pub cache: Option<CacheConfig>,
    /// Token estimator used when `validate_tokens` is set
    pub token_estimator: TokenEstimatorConfig,
    /// Reject prompts that exceed the model's context window before sending
    pub validate_tokens: bool,
    /// Completion budget assumed when a request omits `max_tokens`
    pub default_max_completion_tokens: usize,
    /// Also reject when prompt plus completion budget exceeds the window
    pub reject_when_completion_exceeds: bool,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: None,
            count_unknown_failures: true,
            cache: None,
            token_estimator: TokenEstimatorConfig::default(),
            validate_tokens: false,
            default_max_completion_tokens: 4096,
            reject_when_completion_exceeds: false,
        }
    }
}

impl ResilienceConfig {
    /// Fallback chain settings derived from this configuration
    pub fn fallback_config(&self) -> FallbackConfig {
        FallbackConfig {
            circuit_breaker: self.circuit_breaker.clone(),
            count_unknown_failures: self.count_unknown_failures,
        }
    }

    /// Validate value ranges
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ConfigurationError`] if:
    /// - The failure rate threshold is outside (0, 1]
    /// - The cache TTL is zero
    /// - A cache parameter exclusion names an unknown parameter
    /// - Characters per token is not positive
    pub fn validate(&self) -> LlmResult<()> {
        if let Some(breaker) = &self.circuit_breaker {
            let rate = breaker.failure_rate_threshold;
            if !(rate > 0.0 && rate <= 1.0) {
                return Err(LlmError::configuration_error(format!(
                    "circuit breaker failure rate threshold must be in (0, 1], got {rate}"
                )));
            }
        }

        if let Some(cache) = &self.cache {
            if cache.ttl.is_zero() {
                return Err(LlmError::configuration_error("cache TTL must be non-zero"));
            }
            if let Some(unknown) = cache
                .exclude_parameters
                .iter()
                .find(|p| !CACHE_KEY_PARAMETERS.contains(&p.as_str()))
            {
                return Err(LlmError::configuration_error(format!(
                    "unknown cache key parameter '{unknown}', expected one of {}",
                    CACHE_KEY_PARAMETERS.join(", ")
                )));
            }
        }

        let cpt = self.token_estimator.characters_per_token;
        if !(cpt.is_finite() && cpt > 0.0) {
            return Err(LlmError::configuration_error(format!(
                "characters per token must be positive, got {cpt}"
            )));
        }

        Ok(())
    }

    /// Build configuration from a flat key/value section
    ///
    /// Keys are matched case-insensitively; unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::ConfigurationError`] if a value cannot be parsed
    /// or the result fails [`validate`](Self::validate).
    pub fn from_section(section: &HashMap<String, String>) -> LlmResult<Self> {
        let section: HashMap<String, String> = section
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
            .collect();
        let mut config = Self::default();

        if Self::layer_enabled(&section, "circuit_breaker_")? {
            let mut breaker = CircuitBreakerConfig::default();
            if let Some(v) = parse_param(&section, "circuit_breaker_failure_threshold")? {
                breaker.failure_threshold = v;
            }
            if let Some(v) = parse_param(&section, "circuit_breaker_success_threshold")? {
                breaker.success_threshold = v;
            }
            if let Some(v) = parse_param::<f64>(&section, "circuit_breaker_timeout_secs")? {
                breaker.timeout = Duration::try_from_secs_f64(v).map_err(|e| {
                    LlmError::configuration_error(format!(
                        "invalid circuit_breaker_timeout_secs '{v}': {e}"
                    ))
                })?;
            }
            if let Some(v) = parse_param(&section, "circuit_breaker_failure_rate_threshold")? {
                breaker.failure_rate_threshold = v;
            }
            if let Some(v) = parse_param(&section, "circuit_breaker_minimum_requests")? {
                breaker.minimum_requests = v;
            }
            config.circuit_breaker = Some(breaker);
        }

        if let Some(v) = parse_bool(&section, "count_unknown_failures")? {
            config.count_unknown_failures = v;
        }

        if Self::layer_enabled(&section, "cache_")? {
            let mut cache = CacheConfig::default();
            if let Some(v) = parse_param(&section, "cache_ttl_secs")? {
                cache.ttl = Duration::from_secs(v);
            }
            if let Some(v) = section.get("cache_key_prefix") {
                cache.key_prefix = v.clone();
            }
            if let Some(v) = parse_bool(&section, "cache_skip_streaming")? {
                cache.skip_streaming = v;
            }
            if let Some(v) = section.get("cache_cacheable_models") {
                cache.cacheable_models = parse_list(v);
            }
            if let Some(v) = section.get("cache_exclude_parameters") {
                cache.exclude_parameters = parse_list(v);
            }
            if let Some(v) = parse_bool(&section, "cache_include_temperature")? {
                cache.include_temperature = v;
            }
            if let Some(v) = parse_bool(&section, "cache_include_seed")? {
                cache.include_seed = v;
            }
            config.cache = Some(cache);
        }

        if let Some(v) = parse_param(&section, "tokens_characters_per_token")? {
            config.token_estimator.characters_per_token = v;
        }
        if let Some(v) = parse_param(&section, "tokens_overhead_per_message")? {
            config.token_estimator.token_overhead_per_message = v;
        }
        if let Some(v) = section.get("tokens_context_windows") {
            config.token_estimator.custom_context_windows = parse_windows(v)?;
        }
        if let Some(v) = parse_bool(&section, "validate_tokens")? {
            config.validate_tokens = v;
        }
        if let Some(v) = parse_param(&section, "default_max_completion_tokens")? {
            config.default_max_completion_tokens = v;
        }
        if let Some(v) = parse_bool(&section, "reject_when_completion_exceeds")? {
            config.reject_when_completion_exceeds = v;
        }

        config.validate()?;
        log_debug!(
            circuit_breaker = config.circuit_breaker.is_some(),
            cache = config.cache.is_some(),
            validate_tokens = config.validate_tokens,
            "Resilience configuration loaded"
        );
        Ok(config)
    }

    /// Build configuration from `LLM_RESILIENCE_*` environment variables
    ///
    /// `LLM_RESILIENCE_CACHE_TTL_SECS=600` maps to the section key
    /// `cache_ttl_secs`, and so on.
    ///
    /// # Errors
    ///
    /// Same as [`from_section`](Self::from_section).
    pub fn from_env() -> LlmResult<Self> {
        let section: HashMap<String, String> = std::env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(ENV_PREFIX)
                    .map(|rest| (rest.to_lowercase(), value))
            })
            .collect();
        Self::from_section(&section)
    }

    fn layer_enabled(section: &HashMap<String, String>, prefix: &str) -> LlmResult<bool> {
        let enabled_key = format!("{prefix}enabled");
        if let Some(enabled) = parse_bool(section, &enabled_key)? {
            return Ok(enabled);
        }
        Ok(section.keys().any(|k| k.starts_with(prefix)))
    }
}

fn parse_param<T>(section: &HashMap<String, String>, key: &str) -> LlmResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    section
        .get(key)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| {
                LlmError::configuration_error(format!("invalid value '{raw}' for {key}: {e}"))
            })
        })
        .transpose()
}

fn parse_bool(section: &HashMap<String, String>, key: &str) -> LlmResult<Option<bool>> {
    section
        .get(key)
        .map(|raw| match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(LlmError::configuration_error(format!(
                "invalid boolean '{raw}' for {key}"
            ))),
        })
        .transpose()
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_windows(raw: &str) -> LlmResult<HashMap<String, usize>> {
    parse_list(raw)
        .into_iter()
        .map(|pair| {
            let (model, window) = pair.split_once('=').ok_or_else(|| {
                LlmError::configuration_error(format!(
                    "invalid context window entry '{pair}', expected model=window"
                ))
            })?;
            let window = window.trim().parse::<usize>().map_err(|e| {
                LlmError::configuration_error(format!(
                    "invalid context window for model '{}': {e}",
                    model.trim()
                ))
            })?;
            Ok((model.trim().to_string(), window))
        })
        .collect()
}
