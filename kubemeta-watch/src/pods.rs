//! Pod reconciliation: keeps the pod cache in step with pods on this node.

use std::sync::Arc;

use async_trait::async_trait;
use kubemeta_cache::MetadataStore;
use kubemeta_core::{
    parse_pod_metadata, ApiError, Counter, KubeApi, KubeMetaResult, ListParams, MetadataConfig,
    ObjectList, ParseOptions, PodMetadata, PodObject, ResolverStrategy, Stats, WatchParams,
    WatchStream,
};

use crate::reconciler::{LoopCounters, ResourceReconciler};

pub struct PodReconciler {
    store: Arc<MetadataStore>,
    stats: Arc<Stats>,
    options: ParseOptions,
    strategy: ResolverStrategy,
    node_name: Option<String>,
}

impl PodReconciler {
    pub fn new(
        store: Arc<MetadataStore>,
        stats: Arc<Stats>,
        options: ParseOptions,
        strategy: ResolverStrategy,
        node_name: Option<String>,
    ) -> Self {
        Self {
            store,
            stats,
            options,
            strategy,
            node_name,
        }
    }

    pub fn from_config(
        config: &MetadataConfig,
        store: Arc<MetadataStore>,
        stats: Arc<Stats>,
    ) -> KubeMetaResult<Self> {
        Ok(Self::new(
            store,
            stats,
            config.parse_options()?,
            config.strategy,
            config.node_name.clone(),
        ))
    }

    fn field_selector(&self) -> Option<String> {
        self.node_name
            .as_ref()
            .map(|node| format!("spec.nodeName={}", node))
    }

    fn is_local(&self, pod: &PodObject) -> bool {
        match (&self.node_name, pod.node_name()) {
            (Some(local), Some(node)) => local == node,
            _ => false,
        }
    }

    fn parse(&self, pod: &PodObject) -> Option<(String, PodMetadata)> {
        match parse_pod_metadata(pod, &self.options) {
            Ok(metadata) => Some((self.strategy.pod_key(&metadata), metadata)),
            Err(e) => {
                tracing::debug!(
                    namespace = pod.metadata.namespace.as_deref().unwrap_or_default(),
                    pod = pod.metadata.name.as_deref().unwrap_or_default(),
                    error = %e,
                    "skipping unparseable pod"
                );
                None
            }
        }
    }
}

#[async_trait]
impl ResourceReconciler for PodReconciler {
    type Object = PodObject;

    fn kind(&self) -> &'static str {
        "pods"
    }

    fn counters(&self) -> LoopCounters {
        LoopCounters {
            failures: Counter::PodWatchFailures,
            gone: Counter::PodWatchGoneErrors,
            auth_refreshes: Counter::PodWatchAuthRefreshes,
            ignored: Counter::PodCacheWatchIgnored,
        }
    }

    async fn list(&self, client: &dyn KubeApi) -> Result<ObjectList<PodObject>, ApiError> {
        client
            .list_pods(&ListParams {
                field_selector: self.field_selector(),
                resource_version: None,
            })
            .await
    }

    async fn watch(
        &self,
        client: &dyn KubeApi,
        resource_version: Option<String>,
    ) -> Result<WatchStream<PodObject>, ApiError> {
        client
            .watch_pods(&WatchParams {
                field_selector: self.field_selector(),
                resource_version,
            })
            .await
    }

    async fn apply_list(&self, items: Vec<PodObject>) -> usize {
        let mut stored = 0;
        for pod in &items {
            if let Some((key, metadata)) = self.parse(pod) {
                self.store.pods.set(key, metadata).await;
                stored += 1;
            }
        }
        stored
    }

    async fn on_added(&self, _pod: PodObject) {
        // Not yet known to be relevant here; a later MODIFIED or a lookup
        // will bring it in.
        self.stats.bump(Counter::PodCacheWatchIgnored);
    }

    async fn on_modified(&self, pod: PodObject) {
        let Some((key, metadata)) = self.parse(&pod) else {
            self.stats.bump(Counter::PodCacheWatchIgnored);
            return;
        };

        if self.store.pods.replace_if_present(key.clone(), metadata.clone()).await {
            self.stats.bump(Counter::PodCacheWatchUpdates);
        } else if self.is_local(&pod) {
            self.store.pods.set(key, metadata).await;
            self.stats.bump(Counter::PodCacheHostUpdates);
        } else {
            self.stats.bump(Counter::PodCacheWatchMisses);
        }
    }

    async fn on_deleted(&self, _pod: PodObject) {
        // Kept until TTL so late log lines still resolve.
        self.stats.bump(Counter::PodCacheWatchDeleteIgnored);
    }
}
