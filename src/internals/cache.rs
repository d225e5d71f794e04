//! Response cache keyed by normalized request content
//!
//! Keys are `prefix:hex(sha256(normalized request)[..16])`. The normalized
//! projection keeps model, messages (role, content, name, tool call id, in
//! order) and the optional sampling parameters that are present and not
//! excluded by configuration, so field ordering or transport-only metadata
//! never changes a key.
//!
//! The cache is best-effort: store failures, undecodable entries and expired
//! entries all read as a miss. Cancellation is the exception and is returned
//! to the caller.

use crate::core_types::context::RequestContext;
use crate::core_types::messages::MessageRole;
use crate::core_types::provider::{ChatCompletionRequest, ChatCompletionResponse};
use crate::error::{LlmError, LlmResult};
use crate::internals::circuit_breaker::duration_secs;
use crate::internals::store::KeyValueStore;
use crate::logging::log_debug;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Parameter names accepted in [`CacheConfig::exclude_parameters`]
pub const CACHE_KEY_PARAMETERS: &[&str] = &[
    "max_tokens",
    "temperature",
    "top_p",
    "top_k",
    "seed",
    "stop",
    "user",
];

/// Response cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of a cached response
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    /// Prefix for every key written to the store
    pub key_prefix: String,
    /// Never cache streaming requests
    pub skip_streaming: bool,
    /// Only cache these models. Empty means every model.
    pub cacheable_models: Vec<String>,
    /// Parameters left out of the cache key
    pub exclude_parameters: Vec<String>,
    /// Whether temperature fragments the cache
    pub include_temperature: bool,
    /// Whether seed fragments the cache
    pub include_seed: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            key_prefix: "llm:cache".to_string(),
            skip_streaming: true,
            cacheable_models: Vec::new(),
            exclude_parameters: vec!["user".to_string()],
            include_temperature: true,
            include_seed: true,
        }
    }
}

impl CacheConfig {
    /// Replace zero values with defaults
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.ttl.is_zero() {
            self.ttl = defaults.ttl;
        }
        if self.key_prefix.is_empty() {
            self.key_prefix = defaults.key_prefix;
        }
        self
    }

    fn includes(&self, parameter: &str) -> bool {
        match parameter {
            "temperature" if !self.include_temperature => false,
            "seed" if !self.include_seed => false,
            _ => !self.exclude_parameters.iter().any(|p| p == parameter),
        }
    }
}

/// A cached response as persisted in the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub response: ChatCompletionResponse,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub model: String,
    /// Hex digest of the normalized request the key was derived from
    pub request_hash: String,
}

impl CacheEntry {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Serialize)]
struct NormalizedMessage<'a> {
    role: MessageRole,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

// Field order is the hash input order.
#[derive(Serialize)]
struct NormalizedRequest<'a> {
    model: &'a str,
    messages: Vec<NormalizedMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

/// Best-effort response cache over a [`KeyValueStore`]
pub struct CacheManager {
    store: Arc<dyn KeyValueStore>,
    config: CacheConfig,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config: config.normalized(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether responses to `request` may be cached
    pub fn should_cache(&self, request: &ChatCompletionRequest) -> bool {
        if self.config.skip_streaming && request.is_streaming() {
            return false;
        }
        self.config.cacheable_models.is_empty()
            || self.config.cacheable_models.contains(&request.model)
    }

    /// Deterministic store key for `request`
    pub fn build_key(&self, request: &ChatCompletionRequest) -> LlmResult<String> {
        Ok(format!(
            "{}:{}",
            self.config.key_prefix,
            self.request_hash(request)?
        ))
    }

    /// Look up a live entry for `request`
    ///
    /// Returns `Ok(None)` for a missing, undecodable or expired entry and for
    /// any store failure. Returns `Err` only when `ctx` is cancelled.
    pub async fn get(
        &self,
        ctx: &RequestContext,
        request: &ChatCompletionRequest,
    ) -> LlmResult<Option<CacheEntry>> {
        let key = match self.build_key(request) {
            Ok(key) => key,
            Err(e) => {
                log_debug!(error = %e, "Cache key derivation failed, treating as miss");
                return Ok(None);
            }
        };

        let raw = match ctx
            .run(async {
                self.store
                    .get(&key)
                    .await
                    .map_err(|e| LlmError::cache_store(format!("{e:#}")))
            })
            .await
        {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                log_debug!(cache_key = %key, "Cache miss");
                return Ok(None);
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                log_debug!(cache_key = %key, error = %e, "Cache read failed, treating as miss");
                return Ok(None);
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                log_debug!(cache_key = %key, error = %e, "Cache entry undecodable, treating as miss");
                return Ok(None);
            }
        };

        if entry.is_expired() {
            log_debug!(
                cache_key = %key,
                expires_at = %entry.expires_at,
                "Cache entry expired"
            );
            return Ok(None);
        }

        log_debug!(cache_key = %key, cached_at = %entry.cached_at, "Cache hit");
        Ok(Some(entry))
    }

    /// Store `response` for `request` with the configured TTL
    pub async fn set(
        &self,
        ctx: &RequestContext,
        request: &ChatCompletionRequest,
        response: &ChatCompletionResponse,
    ) -> LlmResult<()> {
        let request_hash = self.request_hash(request)?;
        let key = format!("{}:{}", self.config.key_prefix, request_hash);
        let ttl = chrono::Duration::from_std(self.config.ttl)
            .map_err(|e| LlmError::configuration_error(format!("cache ttl out of range: {e}")))?;
        let cached_at = Utc::now();
        let entry = CacheEntry {
            response: response.clone(),
            cached_at,
            expires_at: cached_at + ttl,
            model: request.model.clone(),
            request_hash,
        };
        let raw = serde_json::to_string(&entry)?;

        ctx.run(async {
            self.store
                .set(&key, raw)
                .await
                .map_err(|e| LlmError::cache_store(format!("{e:#}")))
        })
        .await?;

        log_debug!(
            cache_key = %key,
            ttl_seconds = self.config.ttl.as_secs(),
            "Response cached"
        );
        Ok(())
    }

    /// Remove any entry for `request`
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        request: &ChatCompletionRequest,
    ) -> LlmResult<()> {
        let key = self.build_key(request)?;
        ctx.run(async {
            self.store
                .delete(&key)
                .await
                .map_err(|e| LlmError::cache_store(format!("{e:#}")))
        })
        .await
    }

    fn request_hash(&self, request: &ChatCompletionRequest) -> LlmResult<String> {
        let bytes = serde_json::to_vec(&self.normalize(request))?;
        let digest = Sha256::digest(&bytes);
        Ok(hex::encode(&digest[..16]))
    }

    fn normalize<'a>(&self, request: &'a ChatCompletionRequest) -> NormalizedRequest<'a> {
        let config = &self.config;
        NormalizedRequest {
            model: &request.model,
            messages: request
                .messages
                .iter()
                .map(|m| NormalizedMessage {
                    role: m.role,
                    content: &m.content,
                    name: m.name.as_deref(),
                    tool_call_id: m.tool_call_id.as_deref(),
                })
                .collect(),
            max_tokens: request.max_tokens.filter(|_| config.includes("max_tokens")),
            temperature: request.temperature.filter(|_| config.includes("temperature")),
            top_p: request.top_p.filter(|_| config.includes("top_p")),
            top_k: request.top_k.filter(|_| config.includes("top_k")),
            seed: request.seed.filter(|_| config.includes("seed")),
            stop: Some(request.stop.as_slice())
                .filter(|stop| !stop.is_empty() && config.includes("stop")),
            user: request.user.as_deref().filter(|_| config.includes("user")),
        }
    }
}
