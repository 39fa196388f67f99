use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tracing::trace;

use crate::http_client::UrlProbe;

/// Probe cache configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeCacheConfig {
    /// Maximum number of URLs remembered
    pub max_entries: u64,
    /// How long a probe result stays valid
    pub ttl: Duration,
}

impl Default for ProbeCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Memoises URL probe results.
///
/// `moka` coalesces concurrent lookups for the same URL, so a link referenced
/// by many documents in one harvest is requested once.
pub struct CachedUrlProbe {
    inner: Arc<dyn UrlProbe>,
    cache: Cache<String, bool>,
}

impl CachedUrlProbe {
    pub fn new(inner: Arc<dyn UrlProbe>, config: ProbeCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .build();

        Self { inner, cache }
    }

    pub async fn cached(&self, url: &str) -> Option<bool> {
        self.cache.get(url).await
    }
}

#[async_trait]
impl UrlProbe for CachedUrlProbe {
    async fn resolves(&self, url: &str) -> bool {
        let inner = Arc::clone(&self.inner);
        let target = url.to_string();
        self.cache
            .get_with(url.to_string(), async move {
                trace!(url = %target, "Probe cache miss");
                inner.resolves(&target).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProbe {
        calls: AtomicUsize,
        answer: bool,
    }

    #[async_trait]
    impl UrlProbe for CountingProbe {
        async fn resolves(&self, _url: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    #[tokio::test]
    async fn test_probe_is_memoised() {
        let counting = Arc::new(CountingProbe {
            calls: AtomicUsize::new(0),
            answer: true,
        });
        let probe = CachedUrlProbe::new(counting.clone(), ProbeCacheConfig::default());

        assert!(probe.resolves("http://example.com/a").await);
        assert!(probe.resolves("http://example.com/a").await);
        assert!(probe.resolves("http://example.com/b").await);

        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
        assert_eq!(probe.cached("http://example.com/a").await, Some(true));
        assert_eq!(probe.cached("http://example.com/c").await, None);
    }

    #[tokio::test]
    async fn test_negative_results_are_cached() {
        let counting = Arc::new(CountingProbe {
            calls: AtomicUsize::new(0),
            answer: false,
        });
        let probe = CachedUrlProbe::new(counting.clone(), ProbeCacheConfig::default());

        assert!(!probe.resolves("http://example.com/dead").await);
        assert!(!probe.resolves("http://example.com/dead").await);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_coalesce() {
        let counting = Arc::new(CountingProbe {
            calls: AtomicUsize::new(0),
            answer: true,
        });
        let probe = Arc::new(CachedUrlProbe::new(
            counting.clone(),
            ProbeCacheConfig::default(),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let probe = Arc::clone(&probe);
                tokio::spawn(async move { probe.resolves("http://example.com/same").await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }
}
