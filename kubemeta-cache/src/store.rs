//! The three caches shared by the resolver and the reconciliation loops.

use std::time::Duration;

use kubemeta_core::{
    Gauge, IdentityRecord, MetadataConfig, NamespaceMetadata, PodMetadata, Stats,
};

use crate::bounded::BoundedCache;

/// Identity, pod and namespace caches.
///
/// Instances are independent: a slow compute on one cache never blocks the
/// other two.
#[derive(Debug)]
pub struct MetadataStore {
    pub identities: BoundedCache<String, IdentityRecord>,
    pub pods: BoundedCache<String, PodMetadata>,
    pub namespaces: BoundedCache<String, NamespaceMetadata>,
}

impl MetadataStore {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            identities: BoundedCache::new("identities", capacity, ttl),
            pods: BoundedCache::new("pods", capacity, ttl),
            namespaces: BoundedCache::new("namespaces", capacity, ttl),
        }
    }

    pub fn from_config(config: &MetadataConfig) -> Self {
        Self::new(config.cache_size, config.cache_ttl())
    }

    /// Publish current cache sizes into the size gauges.
    pub async fn report_sizes(&self, stats: &Stats) {
        stats.set(Gauge::IdCacheSize, self.identities.len().await as u64);
        stats.set(Gauge::PodCacheSize, self.pods.len().await as u64);
        stats.set(Gauge::NamespaceCacheSize, self.namespaces.len().await as u64);
    }
}
