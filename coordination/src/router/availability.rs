//! Model availability cache.
//!
//! An explicitly constructed cache owned by whoever routes calls. Entries
//! expire after a TTL; expired or unknown tiers read as `None` and the
//! router treats them as available until a probe says otherwise.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use super::tier::ModelTier;

/// Checks whether a tier's backend is reachable.
#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    async fn probe(&self, tier: ModelTier) -> bool;
}

#[derive(Debug)]
pub struct ModelAvailabilityCache {
    ttl: Duration,
    entries: RwLock<HashMap<ModelTier, (bool, Instant)>>,
}

impl ModelAvailabilityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached availability, or `None` when unknown or expired.
    pub async fn get(&self, tier: ModelTier) -> Option<bool> {
        let entries = self.entries.read().await;
        entries
            .get(&tier)
            .filter(|(_, at)| at.elapsed() < self.ttl)
            .map(|(available, _)| *available)
    }

    pub async fn set(&self, tier: ModelTier, available: bool) {
        self.entries
            .write()
            .await
            .insert(tier, (available, Instant::now()));
    }

    pub async fn invalidate(&self, tier: ModelTier) -> bool {
        self.entries.write().await.remove(&tier).is_some()
    }

    pub async fn invalidate_all(&self) {
        self.entries.write().await.clear();
    }

    /// Probe every tier whose entry is missing or expired. Returns the
    /// number of tiers probed.
    pub async fn refresh(&self, probe: &dyn AvailabilityProbe) -> usize {
        let mut stale = Vec::new();
        for tier in ModelTier::ALL {
            if self.get(tier).await.is_none() {
                stale.push(tier);
            }
        }

        // Probes run concurrently; a slow endpoint does not delay the others.
        let results = join_all(stale.iter().map(|&tier| async move { (tier, probe.probe(tier).await) })).await;
        for &(tier, available) in &results {
            debug!(tier = %tier, available, "Availability probed");
            self.set(tier, available).await;
        }
        results.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProbe {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AvailabilityProbe for CountingProbe {
        async fn probe(&self, tier: ModelTier) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tier != ModelTier::Premium
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = ModelAvailabilityCache::new(Duration::from_secs(60));
        cache.set(ModelTier::Cloud, false).await;
        assert_eq!(cache.get(ModelTier::Cloud).await, Some(false));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get(ModelTier::Cloud).await, None);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = ModelAvailabilityCache::new(Duration::from_secs(60));
        cache.set(ModelTier::Cloud, true).await;
        cache.set(ModelTier::Premium, true).await;
        assert!(cache.invalidate(ModelTier::Cloud).await);
        assert!(!cache.invalidate(ModelTier::Cloud).await);
        cache.invalidate_all().await;
        assert_eq!(cache.get(ModelTier::Premium).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_probes_only_stale_tiers() {
        let cache = ModelAvailabilityCache::new(Duration::from_secs(30));
        let probe = CountingProbe {
            calls: AtomicUsize::new(0),
        };
        assert_eq!(cache.refresh(&probe).await, 3);
        assert_eq!(cache.get(ModelTier::Premium).await, Some(false));
        assert_eq!(cache.refresh(&probe).await, 0);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.refresh(&probe).await, 3);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 6);
    }
}
