use crate::cache::{CacheConfig, CacheEntry, CacheManager};
use crate::core_types::context::RequestContext;
use crate::core_types::messages::Message;
use crate::core_types::provider::ChatCompletionRequest;
use crate::error::LlmError;
use crate::store::{KeyValueStore, MemoryStore, MockKeyValueStore};
use crate::tests::helpers::{text_response, user_request};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_cache(config: CacheConfig) -> (Arc<MemoryStore>, CacheManager) {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheManager::new(store.clone(), config);
        (store, cache)
    }

    // Unit Tests for cache eligibility
    //
    // UNIT UNDER TEST: CacheManager::should_cache
    //
    // BUSINESS RESPONSIBILITY:
    //   - Keeps streamed responses out of the cache by default
    //   - Restricts caching to an allowlist of models when one is configured
    //
    // TEST COVERAGE:
    //   - Streaming skip on and off
    //   - Model allowlist

    #[test]
    fn test_streaming_requests_are_not_cached_by_default() {
        // Arrange
        let (_, cache) = memory_cache(CacheConfig::default());
        let request = user_request("hi").streaming();

        // Act & Assert
        assert!(!cache.should_cache(&request), "Streaming requests should be skipped");
        assert!(cache.should_cache(&user_request("hi")));
    }

    #[test]
    fn test_streaming_requests_cached_when_skip_disabled() {
        let (_, cache) = memory_cache(CacheConfig {
            skip_streaming: false,
            ..CacheConfig::default()
        });
        assert!(cache.should_cache(&user_request("hi").streaming()));
    }

    #[test]
    fn test_model_allowlist_restricts_caching() {
        // Arrange
        let (_, cache) = memory_cache(CacheConfig {
            cacheable_models: vec!["gpt-4o-mini".to_string()],
            ..CacheConfig::default()
        });
        let allowed = ChatCompletionRequest::new("gpt-4o-mini", vec![Message::user("hi")]);

        // Act & Assert
        assert!(cache.should_cache(&allowed));
        assert!(
            !cache.should_cache(&user_request("hi")),
            "Models outside the allowlist should not be cached"
        );
    }

    // Unit Tests for key derivation
    //
    // UNIT UNDER TEST: CacheManager::build_key
    //
    // BUSINESS RESPONSIBILITY:
    //   - Gives structurally identical requests the same key
    //   - Separates requests whose content or included parameters differ
    //   - Lets operators collapse parameters that should not fragment the cache
    //
    // TEST COVERAGE:
    //   - Key format and determinism
    //   - Content, order, and temperature sensitivity
    //   - Default user exclusion, include_temperature/include_seed, custom exclusions

    #[test]
    fn test_key_is_prefixed_truncated_sha256_hex() {
        // Arrange
        let (_, cache) = memory_cache(CacheConfig::default());

        // Act
        let key = cache.build_key(&user_request("hello")).unwrap();

        // Assert
        let (prefix, digest) = key.rsplit_once(':').unwrap();
        assert_eq!(prefix, "llm:cache");
        assert_eq!(digest.len(), 32, "16 bytes of digest should encode to 32 hex chars");
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_identical_requests_produce_identical_keys() {
        let (_, cache) = memory_cache(CacheConfig::default());
        let a = user_request("hello").with_temperature(0.2);
        let b = user_request("hello").with_temperature(0.2);
        assert_eq!(cache.build_key(&a).unwrap(), cache.build_key(&b).unwrap());
    }

    #[test]
    fn test_content_and_order_change_the_key() {
        // Arrange
        let (_, cache) = memory_cache(CacheConfig::default());
        let base = ChatCompletionRequest::new(
            "gpt-4",
            vec![Message::system("be brief"), Message::user("hello")],
        );
        let reordered = ChatCompletionRequest::new(
            "gpt-4",
            vec![Message::user("hello"), Message::system("be brief")],
        );
        let edited = ChatCompletionRequest::new(
            "gpt-4",
            vec![Message::system("be brief"), Message::user("hello!")],
        );

        // Act
        let base_key = cache.build_key(&base).unwrap();

        // Assert
        assert_ne!(base_key, cache.build_key(&reordered).unwrap(), "Order is significant");
        assert_ne!(base_key, cache.build_key(&edited).unwrap(), "Content is significant");
    }

    #[test]
    fn test_temperature_changes_key_when_included() {
        let (_, cache) = memory_cache(CacheConfig::default());
        let a = user_request("hello").with_temperature(0.2);
        let b = user_request("hello").with_temperature(0.9);
        assert_ne!(cache.build_key(&a).unwrap(), cache.build_key(&b).unwrap());
    }

    #[test]
    fn test_temperature_and_seed_collapse_when_not_included() {
        // Arrange
        let (_, cache) = memory_cache(CacheConfig {
            include_temperature: false,
            include_seed: false,
            ..CacheConfig::default()
        });
        let a = user_request("hello").with_temperature(0.2).with_seed(1);
        let b = user_request("hello").with_temperature(0.9).with_seed(2);

        // Act & Assert
        assert_eq!(
            cache.build_key(&a).unwrap(),
            cache.build_key(&b).unwrap(),
            "Excluded sampling parameters should not fragment the cache"
        );
    }

    #[test]
    fn test_user_is_excluded_by_default() {
        let (_, cache) = memory_cache(CacheConfig::default());
        let a = user_request("hello").with_user("alice");
        let b = user_request("hello").with_user("bob");
        assert_eq!(cache.build_key(&a).unwrap(), cache.build_key(&b).unwrap());
    }

    #[test]
    fn test_user_fragments_cache_when_not_excluded() {
        let (_, cache) = memory_cache(CacheConfig {
            exclude_parameters: vec![],
            ..CacheConfig::default()
        });
        let a = user_request("hello").with_user("alice");
        let b = user_request("hello").with_user("bob");
        assert_ne!(cache.build_key(&a).unwrap(), cache.build_key(&b).unwrap());
    }

    #[test]
    fn test_excluded_max_tokens_collides() {
        let (_, cache) = memory_cache(CacheConfig {
            exclude_parameters: vec!["max_tokens".to_string()],
            ..CacheConfig::default()
        });
        let a = user_request("hello").with_max_tokens(100);
        let b = user_request("hello").with_max_tokens(200);
        assert_eq!(cache.build_key(&a).unwrap(), cache.build_key(&b).unwrap());
    }

    // Unit Tests for cache reads and writes
    //
    // UNIT UNDER TEST: CacheManager::get / set / delete
    //
    // BUSINESS RESPONSIBILITY:
    //   - Returns previously stored responses until they expire
    //   - Absorbs every store failure as a miss
    //   - Propagates cancellation instead of reporting a miss
    //
    // TEST COVERAGE:
    //   - Round trip through MemoryStore with entry metadata
    //   - Lazy expiry of entries the store still holds
    //   - Store errors and corrupt entries as misses (mockall)
    //   - Cancellation during a store round-trip
    //   - delete

    #[tokio::test]
    async fn test_set_then_get_returns_entry_with_metadata() {
        // Arrange
        let (store, cache) = memory_cache(CacheConfig::default());
        let ctx = RequestContext::new();
        let request = user_request("hello");
        let response = text_response("gpt-4", "hi there");

        // Act
        cache.set(&ctx, &request, &response).await.unwrap();
        let entry = cache.get(&ctx, &request).await.unwrap();

        // Assert
        let entry = entry.expect("stored response should be found");
        assert_eq!(entry.response, response);
        assert_eq!(entry.model, "gpt-4");
        assert_eq!(
            entry.expires_at - entry.cached_at,
            ChronoDuration::seconds(3600),
            "Entry should live for the configured TTL"
        );
        let key = cache.build_key(&request).unwrap();
        assert!(
            key.ends_with(&entry.request_hash),
            "Request hash should be the digest used in the key"
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_entry_is_a_miss() {
        let (_, cache) = memory_cache(CacheConfig::default());
        let entry = cache
            .get(&RequestContext::new(), &user_request("never stored"))
            .await
            .unwrap();
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent_even_if_store_still_holds_it() {
        // Arrange
        let (store, cache) = memory_cache(CacheConfig::default());
        let request = user_request("stale");
        let key = cache.build_key(&request).unwrap();
        let cached_at = Utc::now() - ChronoDuration::hours(2);
        let entry = CacheEntry {
            response: text_response("gpt-4", "old"),
            cached_at,
            expires_at: cached_at + ChronoDuration::hours(1),
            model: "gpt-4".to_string(),
            request_hash: "ignored".to_string(),
        };
        store
            .set(&key, serde_json::to_string(&entry).unwrap())
            .await
            .unwrap();

        // Act
        let result = cache.get(&RequestContext::new(), &request).await.unwrap();

        // Assert
        assert!(result.is_none(), "Expired entry should read as a miss");
        assert_eq!(store.len(), 1, "Expiry is lazy: the store is not swept");
        assert!(entry.is_expired());
    }

    #[tokio::test]
    async fn test_store_error_is_treated_as_miss() {
        // Arrange
        let mut store = MockKeyValueStore::new();
        store
            .expect_get()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("redis connection lost")));
        let cache = CacheManager::new(Arc::new(store), CacheConfig::default());

        // Act
        let result = cache.get(&RequestContext::new(), &user_request("hello")).await;

        // Assert
        assert!(
            matches!(result, Ok(None)),
            "Store failures should never surface from get"
        );
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_treated_as_miss() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_get()
            .returning(|_| Ok(Some("{not an entry".to_string())));
        let cache = CacheManager::new(Arc::new(store), CacheConfig::default());

        let result = cache.get(&RequestContext::new(), &user_request("hello")).await;

        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_set_surfaces_store_error_to_caller() {
        // Arrange
        let mut store = MockKeyValueStore::new();
        store
            .expect_set()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("disk full")));
        let cache = CacheManager::new(Arc::new(store), CacheConfig::default());

        // Act
        let result = cache
            .set(
                &RequestContext::new(),
                &user_request("hello"),
                &text_response("gpt-4", "hi"),
            )
            .await;

        // Assert
        assert!(
            matches!(result, Err(LlmError::CacheStore { .. })),
            "set should report the store failure so the caller can log it"
        );
    }

    #[tokio::test]
    async fn test_cancelled_context_is_propagated_not_treated_as_miss() {
        // Arrange
        let mut store = MockKeyValueStore::new();
        store.expect_get().never();
        let cache = CacheManager::new(Arc::new(store), CacheConfig::default());
        let ctx = RequestContext::new();
        ctx.cancel();

        // Act
        let result = cache.get(&ctx, &user_request("hello")).await;

        // Assert
        assert!(
            matches!(result, Err(LlmError::Cancelled { .. })),
            "Cancellation should propagate instead of reading as a miss"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_aborts_slow_store_round_trip() {
        // Arrange
        struct SlowStore;

        #[async_trait::async_trait]
        impl KeyValueStore for SlowStore {
            async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(None)
            }
            async fn set(&self, _key: &str, _value: String) -> anyhow::Result<()> {
                Ok(())
            }
            async fn delete(&self, _key: &str) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let cache = CacheManager::new(Arc::new(SlowStore), CacheConfig::default());
        let ctx = RequestContext::new().with_timeout(Duration::from_secs(1));

        // Act
        let result = cache.get(&ctx, &user_request("hello")).await;

        // Assert
        assert!(matches!(result, Err(LlmError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_delete_removes_entry() {
        // Arrange
        let (store, cache) = memory_cache(CacheConfig::default());
        let ctx = RequestContext::new();
        let request = user_request("hello");
        cache
            .set(&ctx, &request, &text_response("gpt-4", "hi"))
            .await
            .unwrap();

        // Act
        cache.delete(&ctx, &request).await.unwrap();

        // Assert
        assert!(store.is_empty());
        assert!(cache.get(&ctx, &request).await.unwrap().is_none());
    }

    #[test]
    fn test_zero_ttl_and_empty_prefix_fall_back_to_defaults() {
        let (_, cache) = memory_cache(CacheConfig {
            ttl: Duration::ZERO,
            key_prefix: String::new(),
            ..CacheConfig::default()
        });
        assert_eq!(cache.config().ttl, Duration::from_secs(3600));
        assert_eq!(cache.config().key_prefix, "llm:cache");
    }
}
