//! Namespace reconciliation.
//!
//! Namespaces have no node affinity, so a MODIFIED event for an uncached
//! namespace is always a miss.

use std::sync::Arc;

use async_trait::async_trait;
use kubemeta_cache::MetadataStore;
use kubemeta_core::{
    parse_namespace_metadata, ApiError, Counter, KubeApi, KubeMetaResult, ListParams,
    MetadataConfig, NamespaceMetadata, NamespaceObject, ObjectList, ParseOptions,
    ResolverStrategy, Stats, WatchParams, WatchStream,
};

use crate::reconciler::{LoopCounters, ResourceReconciler};

pub struct NamespaceReconciler {
    store: Arc<MetadataStore>,
    stats: Arc<Stats>,
    options: ParseOptions,
    strategy: ResolverStrategy,
}

impl NamespaceReconciler {
    pub fn new(
        store: Arc<MetadataStore>,
        stats: Arc<Stats>,
        options: ParseOptions,
        strategy: ResolverStrategy,
    ) -> Self {
        Self {
            store,
            stats,
            options,
            strategy,
        }
    }

    pub fn from_config(
        config: &MetadataConfig,
        store: Arc<MetadataStore>,
        stats: Arc<Stats>,
    ) -> KubeMetaResult<Self> {
        Ok(Self::new(store, stats, config.parse_options()?, config.strategy))
    }

    fn parse(&self, namespace: &NamespaceObject) -> Option<(String, NamespaceMetadata)> {
        match parse_namespace_metadata(namespace, &self.options) {
            Ok(metadata) => {
                let name = namespace.metadata.name.as_deref().unwrap_or_default();
                let key = self.strategy.namespace_key(&metadata.namespace_id, name);
                Some((key, metadata))
            }
            Err(e) => {
                tracing::debug!(
                    namespace = namespace.metadata.name.as_deref().unwrap_or_default(),
                    error = %e,
                    "skipping unparseable namespace"
                );
                None
            }
        }
    }
}

#[async_trait]
impl ResourceReconciler for NamespaceReconciler {
    type Object = NamespaceObject;

    fn kind(&self) -> &'static str {
        "namespaces"
    }

    fn counters(&self) -> LoopCounters {
        LoopCounters {
            failures: Counter::NamespaceWatchFailures,
            gone: Counter::NamespaceWatchGoneErrors,
            auth_refreshes: Counter::NamespaceWatchAuthRefreshes,
            ignored: Counter::NamespaceCacheWatchIgnored,
        }
    }

    async fn list(&self, client: &dyn KubeApi) -> Result<ObjectList<NamespaceObject>, ApiError> {
        client.list_namespaces(&ListParams::default()).await
    }

    async fn watch(
        &self,
        client: &dyn KubeApi,
        resource_version: Option<String>,
    ) -> Result<WatchStream<NamespaceObject>, ApiError> {
        client
            .watch_namespaces(&WatchParams {
                field_selector: None,
                resource_version,
            })
            .await
    }

    async fn apply_list(&self, items: Vec<NamespaceObject>) -> usize {
        let mut stored = 0;
        for namespace in &items {
            if let Some((key, metadata)) = self.parse(namespace) {
                self.store.namespaces.set(key, metadata).await;
                stored += 1;
            }
        }
        stored
    }

    async fn on_added(&self, _namespace: NamespaceObject) {
        self.stats.bump(Counter::NamespaceCacheWatchIgnored);
    }

    async fn on_modified(&self, namespace: NamespaceObject) {
        let Some((key, metadata)) = self.parse(&namespace) else {
            self.stats.bump(Counter::NamespaceCacheWatchIgnored);
            return;
        };

        if self.store.namespaces.replace_if_present(key, metadata).await {
            self.stats.bump(Counter::NamespaceCacheWatchUpdates);
        } else {
            self.stats.bump(Counter::NamespaceCacheWatchMisses);
        }
    }

    async fn on_deleted(&self, _namespace: NamespaceObject) {
        self.stats.bump(Counter::NamespaceCacheWatchDeletesIgnored);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubemeta_test_utils::fixtures::namespace_object;

    fn reconciler(strategy: ResolverStrategy) -> NamespaceReconciler {
        NamespaceReconciler::new(
            Arc::new(MetadataStore::new(10, None)),
            Arc::new(Stats::new()),
            ParseOptions::default(),
            strategy,
        )
    }

    #[tokio::test]
    async fn test_list_keys_follow_strategy() {
        let identity = reconciler(ResolverStrategy::Identity);
        identity.apply_list(vec![namespace_object("team-a", "N1", None)]).await;
        assert!(identity.store.namespaces.contains(&"N1".to_string()).await);

        let simple = reconciler(ResolverStrategy::Simple);
        simple.apply_list(vec![namespace_object("team-a", "N1", None)]).await;
        assert!(simple.store.namespaces.contains(&"team-a".to_string()).await);
    }

    #[tokio::test]
    async fn test_modified_cached_replaces_value() {
        let r = reconciler(ResolverStrategy::Identity);
        let namespace = namespace_object("team-a", "N1", None);
        r.apply_list(vec![namespace.clone()]).await;

        let mut changed = namespace;
        changed
            .metadata
            .labels
            .insert("env".to_string(), "prod".to_string());
        r.on_modified(changed).await;

        let cached = r.store.namespaces.get(&"N1".to_string()).await.unwrap();
        assert_eq!(cached.namespace_labels.get("env").map(String::as_str), Some("prod"));
        assert_eq!(r.stats.get(Counter::NamespaceCacheWatchUpdates), 1);
    }

    #[tokio::test]
    async fn test_modified_uncached_is_a_miss() {
        let r = reconciler(ResolverStrategy::Identity);
        r.on_modified(namespace_object("team-a", "N1", None)).await;
        assert!(r.store.namespaces.is_empty().await);
        assert_eq!(r.stats.get(Counter::NamespaceCacheWatchMisses), 1);
    }

    #[tokio::test]
    async fn test_added_and_deleted_leave_cache_alone() {
        let r = reconciler(ResolverStrategy::Identity);
        let namespace = namespace_object("team-a", "N1", None);
        r.apply_list(vec![namespace.clone()]).await;

        r.on_added(namespace_object("team-b", "N2", None)).await;
        r.on_deleted(namespace).await;

        assert!(r.store.namespaces.contains(&"N1".to_string()).await);
        assert!(!r.store.namespaces.contains(&"N2".to_string()).await);
        assert_eq!(r.stats.get(Counter::NamespaceCacheWatchIgnored), 1);
        assert_eq!(r.stats.get(Counter::NamespaceCacheWatchDeletesIgnored), 1);
    }
}
