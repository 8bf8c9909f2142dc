//! Metadata cache guarding remote lookups
//!
//! Entries are keyed by the exact `(ecosystem, name, version)` triple and
//! live as long as the cache does. There is no TTL because a published
//! version's metadata is looked up again on every save of the same manifest.
//!
//! Each key owns a [`OnceCell`], so lookups for the same key that race while
//! a fetch is in flight wait for that fetch instead of issuing their own.
//! Failed fetches drop the empty cell and the next lookup retries.

use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::error::LookupError;
use crate::file_types::Ecosystem;
use crate::registries::{Metadata, MetadataSource};

/// Composite key for one dependency version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub ecosystem: Ecosystem,
    pub name: String,
    pub version: String,
}

impl CacheKey {
    pub fn new(ecosystem: Ecosystem, name: &str, version: &str) -> Self {
        Self {
            ecosystem,
            name: name.to_string(),
            version: version.to_string(),
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {:?} {:?}", self.ecosystem, self.name, self.version)
    }
}

/// Process-wide memoization of metadata lookups
pub struct MetadataCache {
    source: Arc<dyn MetadataSource>,
    entries: DashMap<CacheKey, Arc<OnceCell<Arc<Metadata>>>>,
    hits: AtomicU64,
    fetches: AtomicU64,
}

impl MetadataCache {
    pub fn new(source: Arc<dyn MetadataSource>) -> Self {
        Self {
            source,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
        }
    }

    /// Return cached metadata or fetch it from the remote source.
    ///
    /// A hit returns without suspending. A miss stores the payload before
    /// returning it. Errors are passed through and never cached.
    pub async fn lookup(
        &self,
        ecosystem: Ecosystem,
        name: &str,
        version: &str,
    ) -> Result<Arc<Metadata>, LookupError> {
        let key = CacheKey::new(ecosystem, name, version);

        if let Some(metadata) = self.get_key(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("cache hit for {}", key);
            return Ok(metadata);
        }

        let cell = Arc::clone(&*self.entries.entry(key.clone()).or_default());
        let result = cell
            .get_or_try_init(|| async {
                self.fetches.fetch_add(1, Ordering::Relaxed);
                self.source
                    .fetch(ecosystem, name, version)
                    .await
                    .map(Arc::new)
            })
            .await;

        match result {
            Ok(metadata) => Ok(Arc::clone(metadata)),
            Err(e) => {
                self.entries.remove_if(&key, |_, cell| !cell.initialized());
                Err(e)
            }
        }
    }

    /// Cached payload for one dependency version, if a fetch has completed
    pub fn get(&self, ecosystem: Ecosystem, name: &str, version: &str) -> Option<Arc<Metadata>> {
        self.get_key(&CacheKey::new(ecosystem, name, version))
    }

    fn get_key(&self, key: &CacheKey) -> Option<Arc<Metadata>> {
        self.entries.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of stored payloads
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|cell| cell.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys tracked, in-flight fetches included
    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
        }
    }
}

/// Counters describing cache effectiveness
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Payloads currently stored
    pub entries: usize,
    /// Lookups answered without touching the remote source
    pub hits: u64,
    /// Remote fetches issued, failed ones included
    pub fetches: u64,
}

impl Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CacheStats {{ entries: {}, hits: {}, fetches: {} }}",
            self.entries, self.hits, self.fetches
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Source that counts calls and fails the first `failures` of them
    struct CountingSource {
        calls: AtomicUsize,
        failures: usize,
        delay: Duration,
    }

    impl CountingSource {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures: 0,
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MetadataSource for CountingSource {
        async fn fetch(
            &self,
            ecosystem: Ecosystem,
            name: &str,
            version: &str,
        ) -> Result<Metadata, LookupError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if call < self.failures {
                return Err(LookupError::Unauthorized);
            }
            Ok(json!({ "ecosystem": ecosystem.as_str(), "name": name, "version": version }))
        }
    }

    #[test]
    fn test_cache_key_format() {
        assert_eq!(
            CacheKey::new(Ecosystem::Npm, "lodash", "4.17.21").to_string(),
            r#"npm "lodash" "4.17.21""#
        );
        assert_ne!(
            CacheKey::new(Ecosystem::Npm, "a b", "c"),
            CacheKey::new(Ecosystem::Npm, "a", "b c")
        );
        assert_ne!(
            CacheKey::new(Ecosystem::Npm, "a ", "1.0"),
            CacheKey::new(Ecosystem::Npm, "a", " 1.0")
        );
    }

    #[tokio::test]
    async fn test_whitespace_variants_do_not_share_entries() {
        let source = Arc::new(CountingSource::new());
        let cache = MetadataCache::new(source.clone());

        let first = cache.lookup(Ecosystem::Npm, "a ", "1.0").await.unwrap();
        let second = cache.lookup(Ecosystem::Npm, "a", " 1.0").await.unwrap();

        assert_eq!(source.calls(), 2);
        assert_eq!(first["name"], "a ");
        assert_eq!(second["name"], "a");
        assert_eq!(second["version"], " 1.0");
    }

    #[tokio::test]
    async fn test_second_lookup_is_a_hit() {
        let source = Arc::new(CountingSource::new());
        let cache = MetadataCache::new(source.clone());

        let first = cache.lookup(Ecosystem::Npm, "lodash", "4.17.21").await.unwrap();
        let second = cache.lookup(Ecosystem::Npm, "lodash", "4.17.21").await.unwrap();

        assert_eq!(source.calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first["name"], "lodash");
        assert_eq!(
            cache.stats(),
            CacheStats {
                entries: 1,
                hits: 1,
                fetches: 1
            }
        );
    }

    #[tokio::test]
    async fn test_distinct_keys_fetch_separately() {
        let source = Arc::new(CountingSource::new());
        let cache = MetadataCache::new(source.clone());

        cache.lookup(Ecosystem::Npm, "a", "1.0").await.unwrap();
        cache.lookup(Ecosystem::Npm, "a", "2.0").await.unwrap();
        cache.lookup(Ecosystem::PyPI, "a", "1.0").await.unwrap();

        assert_eq!(source.calls(), 3);
        assert_eq!(cache.len(), 3);
        assert!(cache.get(Ecosystem::PyPI, "a", "1.0").is_some());
        assert!(cache.get(Ecosystem::Maven, "a", "1.0").is_none());
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let source = Arc::new(CountingSource {
            failures: 1,
            ..CountingSource::new()
        });
        let cache = MetadataCache::new(source.clone());

        let err = cache.lookup(Ecosystem::Maven, "g:a", "1.0").await.unwrap_err();
        assert!(matches!(err, LookupError::Unauthorized));
        assert!(cache.is_empty());
        assert_eq!(cache.tracked_keys(), 0);

        cache.lookup(Ecosystem::Maven, "g:a", "1.0").await.unwrap();
        assert_eq!(source.calls(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_are_coalesced() {
        let source = Arc::new(CountingSource {
            delay: Duration::from_millis(50),
            ..CountingSource::new()
        });
        let cache = Arc::new(MetadataCache::new(source.clone()));

        let lookups = (0..10).map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.lookup(Ecosystem::Npm, "react", "18.2.0").await })
        });
        for result in futures::future::join_all(lookups).await {
            assert!(result.unwrap().is_ok());
        }

        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn test_cache_stats_display() {
        let stats = CacheStats {
            entries: 2,
            hits: 5,
            fetches: 3,
        };
        assert_eq!(stats.to_string(), "CacheStats { entries: 2, hits: 5, fetches: 3 }");
    }
}
