use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::model::{CacheEntry, ProviderTag};
use crate::store::Store;

/// Compute the content-addressed cache key: SHA-256 over the provider tag,
/// endpoint kind, and normalized body, NUL-separated. Identical across
/// clients making structurally identical requests, distinct across
/// providers and endpoint kinds.
pub fn cache_key(provider: ProviderTag, endpoint_kind: &str, normalized_body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(endpoint_kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalized_body);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: i64,
    pub bytes_total: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_rate_60m: Option<f64>,
}

/// Content-addressed store of successful upstream responses, scoped per
/// proxy. Entries have no TTL; they persist until explicit invalidation.
/// Store failures abort the process inside the store layer, so these
/// operations return plain values.
#[derive(Clone)]
pub struct Cache {
    store: Arc<Store>,
}

impl Cache {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn get(&self, proxy_id: i64, key: &str) -> Option<CacheEntry> {
        self.store.get_cache_entry(proxy_id, key).await
    }

    /// Store a response, but only when it is a 2xx. Overwrites any prior
    /// entry at the same key for this proxy.
    pub async fn put(
        &self,
        proxy_id: i64,
        key: &str,
        status_code: u16,
        headers: &[(String, String)],
        body: &[u8],
    ) -> bool {
        if !(200..300).contains(&status_code) {
            return false;
        }
        self.store
            .upsert_cache_entry(proxy_id, key, status_code, headers, body)
            .await;
        true
    }

    /// Remove all entries for one proxy; returns the removed count.
    pub async fn invalidate(&self, proxy_id: i64) -> u64 {
        self.store.delete_cache_entries(proxy_id).await
    }

    /// Remove entries across every proxy; returns the removed count.
    pub async fn invalidate_all(&self) -> u64 {
        self.store.delete_all_cache_entries().await
    }

    pub async fn stats(&self, proxy_id: i64) -> CacheStats {
        let (entries, bytes_total) = self.store.cache_stats(proxy_id).await;
        let hit_rate_60m = self.store.cache_hit_rate_60m(proxy_id).await;
        CacheStats {
            entries,
            bytes_total,
            hit_rate_60m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> Vec<(String, String)> {
        vec![("content-type".to_string(), "application/json".to_string())]
    }

    #[test]
    fn key_is_stable_and_discriminates() {
        let a = cache_key(ProviderTag::OpenAi, "chat_completion", b"{\"model\":\"gpt-4\"}");
        let b = cache_key(ProviderTag::OpenAi, "chat_completion", b"{\"model\":\"gpt-4\"}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        // Same body, different provider or endpoint kind: different key
        let c = cache_key(ProviderTag::Deepseek, "chat_completion", b"{\"model\":\"gpt-4\"}");
        let d = cache_key(ProviderTag::OpenAi, "embedding", b"{\"model\":\"gpt-4\"}");
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn key_separator_prevents_concatenation_collisions() {
        let a = cache_key(ProviderTag::OpenAi, "chat", b"x");
        let b = cache_key(ProviderTag::OpenAi, "cha", b"tx");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn put_refuses_non_2xx() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let cache = Cache::new(store);

        assert!(!cache.put(1, "k", 404, &headers(), b"nope").await);
        assert!(!cache.put(1, "k", 500, &headers(), b"nope").await);
        assert!(cache.get(1, "k").await.is_none());

        assert!(cache.put(1, "k", 201, &headers(), b"yes").await);
        let entry = cache.get(1, "k").await.unwrap();
        assert_eq!(entry.status_code, 201);
        assert_eq!(entry.body, b"yes");
    }

    #[tokio::test]
    async fn invalidate_is_per_proxy() {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let cache = Cache::new(store);

        cache.put(1, "k1", 200, &headers(), b"a").await;
        cache.put(1, "k2", 200, &headers(), b"b").await;
        cache.put(2, "k1", 200, &headers(), b"c").await;

        assert_eq!(cache.invalidate(1).await, 2);
        assert_eq!(cache.stats(1).await.entries, 0);
        assert_eq!(cache.stats(2).await.entries, 1);

        assert_eq!(cache.invalidate_all().await, 1);
        assert_eq!(cache.stats(2).await.entries, 0);
    }
}
