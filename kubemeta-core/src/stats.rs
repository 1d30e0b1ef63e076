//! Named counters and gauges for cache and watch observability.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! named_set {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Stable snake_case name used in logs and snapshots.
            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            fn index(self) -> usize {
                self as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

named_set! {
    /// Monotonic event counters.
    Counter {
        IdCacheMiss => "id_cache_miss",
        PodCacheMiss => "pod_cache_miss",
        NamespaceCacheMiss => "namespace_cache_miss",
        IdCachePodNotFoundNamespace => "id_cache_pod_not_found_namespace",
        IdCacheNamespaceNotFoundPod => "id_cache_namespace_not_found_pod",
        IdCacheOrphanedRecord => "id_cache_orphaned_record",
        BatchMissCacheHits => "batch_miss_cache_hits",
        PodCacheApiUpdates => "pod_cache_api_updates",
        PodCacheApiNilNotFound => "pod_cache_api_nil_not_found",
        PodCacheApiNilBadRespPayload => "pod_cache_api_nil_bad_resp_payload",
        PodCacheApiNilError => "pod_cache_api_nil_error",
        NamespaceCacheApiUpdates => "namespace_cache_api_updates",
        NamespaceCacheApiNilNotFound => "namespace_cache_api_nil_not_found",
        NamespaceCacheApiNilBadRespPayload => "namespace_cache_api_nil_bad_resp_payload",
        NamespaceCacheApiNilError => "namespace_cache_api_nil_error",
        PodCacheHostUpdates => "pod_cache_host_updates",
        PodCacheWatchUpdates => "pod_cache_watch_updates",
        PodCacheWatchMisses => "pod_cache_watch_misses",
        PodCacheWatchDeleteIgnored => "pod_cache_watch_delete_ignored",
        PodCacheWatchIgnored => "pod_cache_watch_ignored",
        PodWatchFailures => "pod_watch_failures",
        PodWatchGoneErrors => "pod_watch_gone_errors",
        PodWatchAuthRefreshes => "pod_watch_auth_refreshes",
        NamespaceCacheHostUpdates => "namespace_cache_host_updates",
        NamespaceCacheWatchUpdates => "namespace_cache_watch_updates",
        NamespaceCacheWatchMisses => "namespace_cache_watch_misses",
        NamespaceCacheWatchDeletesIgnored => "namespace_cache_watch_deletes_ignored",
        NamespaceCacheWatchIgnored => "namespace_cache_watch_ignored",
        NamespaceWatchFailures => "namespace_watch_failures",
        NamespaceWatchGoneErrors => "namespace_watch_gone_errors",
        NamespaceWatchAuthRefreshes => "namespace_watch_auth_refreshes",
    }
}

named_set! {
    /// Last-set values.
    Gauge {
        IdCacheSize => "id_cache_size",
        PodCacheSize => "pod_cache_size",
        NamespaceCacheSize => "namespace_cache_size",
    }
}

/// Shared counter registry. Cheap to bump from any task.
#[derive(Debug)]
pub struct Stats {
    counters: Vec<AtomicU64>,
    gauges: Vec<AtomicU64>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            counters: Counter::ALL.iter().map(|_| AtomicU64::new(0)).collect(),
            gauges: Gauge::ALL.iter().map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn bump(&self, counter: Counter) {
        self.counters[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    pub fn set(&self, gauge: Gauge, value: u64) {
        self.gauges[gauge.index()].store(value, Ordering::Relaxed);
    }

    pub fn gauge(&self, gauge: Gauge) -> u64 {
        self.gauges[gauge.index()].load(Ordering::Relaxed)
    }

    /// Non-zero counters and gauges by name.
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        let counters = Counter::ALL.iter().map(|c| (c.name(), self.get(*c)));
        let gauges = Gauge::ALL.iter().map(|g| (g.name(), self.gauge(*g)));
        counters
            .chain(gauges)
            .filter(|(_, value)| *value > 0)
            .collect()
    }

    /// Fraction of identity lookups served without a remote fetch.
    pub fn id_cache_hit_rate(&self, lookups: u64) -> f64 {
        if lookups == 0 {
            0.0
        } else {
            let misses = self.get(Counter::IdCacheMiss).min(lookups);
            (lookups - misses) as f64 / lookups as f64
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("stats - ")?;
        let snapshot = self.snapshot();
        for (i, (name, value)) in snapshot.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_and_get() {
        let stats = Stats::new();
        stats.bump(Counter::PodCacheWatchMisses);
        stats.bump(Counter::PodCacheWatchMisses);
        assert_eq!(stats.get(Counter::PodCacheWatchMisses), 2);
        assert_eq!(stats.get(Counter::PodCacheWatchUpdates), 0);
    }

    #[test]
    fn test_gauge_keeps_last_value() {
        let stats = Stats::new();
        stats.set(Gauge::PodCacheSize, 10);
        stats.set(Gauge::PodCacheSize, 3);
        assert_eq!(stats.gauge(Gauge::PodCacheSize), 3);
    }

    #[test]
    fn test_snapshot_skips_zero_entries() {
        let stats = Stats::new();
        stats.bump(Counter::IdCacheMiss);
        stats.set(Gauge::IdCacheSize, 7);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("id_cache_miss"), Some(&1));
        assert_eq!(snapshot.get("id_cache_size"), Some(&7));
    }

    #[test]
    fn test_display_lists_entries() {
        let stats = Stats::new();
        stats.bump(Counter::NamespaceWatchFailures);
        stats.bump(Counter::IdCacheMiss);
        assert_eq!(
            stats.to_string(),
            "stats - id_cache_miss: 1, namespace_watch_failures: 1"
        );
    }

    #[test]
    fn test_names_are_unique() {
        let mut names: Vec<_> = Counter::ALL.iter().map(|c| c.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), Counter::ALL.len());
    }

    #[test]
    fn test_hit_rate() {
        let stats = Stats::new();
        assert_eq!(stats.id_cache_hit_rate(0), 0.0);
        stats.bump(Counter::IdCacheMiss);
        assert!((stats.id_cache_hit_rate(4) - 0.75).abs() < f64::EPSILON);
    }
}
