//! Remote fetch helpers used on cache misses.
//!
//! Failures never escape this module: every error is mapped onto a counter,
//! logged at debug level, and turned into `None` so the hot path degrades to
//! "no metadata" instead of failing the caller.

use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use kubemeta_core::{
    parse_namespace_metadata, parse_pod_metadata, ApiClientFactory, ApiError, Counter, KubeApi,
    KubeMetaResult, MetadataConfig, NamespaceMetadata, ParseOptions, PodMetadata,
    ResolverStrategy, Stats,
};

use crate::store::MetadataStore;

/// Fetches and parses pod/namespace objects from the remote API.
pub struct MetadataFetcher {
    client: RwLock<Arc<dyn KubeApi>>,
    factory: Option<Arc<dyn ApiClientFactory>>,
    options: ParseOptions,
    strategy: ResolverStrategy,
    stats: Arc<Stats>,
    call_timeout: Option<Duration>,
}

struct KindCounters {
    updates: Counter,
    not_found: Counter,
    bad_payload: Counter,
    error: Counter,
}

const POD_COUNTERS: KindCounters = KindCounters {
    updates: Counter::PodCacheApiUpdates,
    not_found: Counter::PodCacheApiNilNotFound,
    bad_payload: Counter::PodCacheApiNilBadRespPayload,
    error: Counter::PodCacheApiNilError,
};

const NAMESPACE_COUNTERS: KindCounters = KindCounters {
    updates: Counter::NamespaceCacheApiUpdates,
    not_found: Counter::NamespaceCacheApiNilNotFound,
    bad_payload: Counter::NamespaceCacheApiNilBadRespPayload,
    error: Counter::NamespaceCacheApiNilError,
};

impl MetadataFetcher {
    pub fn new(
        client: Arc<dyn KubeApi>,
        options: ParseOptions,
        strategy: ResolverStrategy,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            client: RwLock::new(client),
            factory: None,
            options,
            strategy,
            stats,
            call_timeout: None,
        }
    }

    /// Fetcher with the configured parse options, strategy and a call
    /// timeout covering both the connect and read phases.
    pub fn from_config(
        config: &MetadataConfig,
        client: Arc<dyn KubeApi>,
        stats: Arc<Stats>,
    ) -> KubeMetaResult<Self> {
        Ok(Self::new(client, config.parse_options()?, config.strategy, stats)
            .with_call_timeout(config.open_timeout() + config.read_timeout()))
    }

    /// Rebuild the client from `factory` after a 401.
    pub fn with_factory(mut self, factory: Arc<dyn ApiClientFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Bound every remote call; an elapsed call counts as a fetch error.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn strategy(&self) -> ResolverStrategy {
        self.strategy
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    pub fn client(&self) -> Arc<dyn KubeApi> {
        let guard = self.client.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&*guard)
    }

    fn replace_client(&self, client: Arc<dyn KubeApi>) {
        let mut guard = self.client.write().unwrap_or_else(|p| p.into_inner());
        *guard = client;
    }

    async fn refresh_client(&self) {
        let Some(factory) = &self.factory else {
            return;
        };
        match factory.create().await {
            Ok(client) => {
                tracing::info!("rebuilt API client after authorization failure");
                self.replace_client(client);
            }
            Err(e) => tracing::warn!(error = %e, "failed to rebuild API client"),
        }
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, ApiError>>,
    ) -> Result<T, ApiError> {
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| {
                    Err(ApiError::Timeout {
                        operation: operation.to_string(),
                    })
                }),
            None => call.await,
        }
    }

    /// Classify a failed fetch and bump the matching counter.
    async fn record_failure(&self, counters: &KindCounters, err: &ApiError) {
        match err {
            ApiError::NotFound { .. } => self.stats.bump(counters.not_found),
            ApiError::InvalidPayload { .. } => self.stats.bump(counters.bad_payload),
            ApiError::Unauthorized { .. } => {
                self.stats.bump(counters.error);
                self.refresh_client().await;
            }
            _ => self.stats.bump(counters.error),
        }
    }

    /// Fetch and parse one pod. `None` on any failure.
    pub async fn fetch_pod(&self, namespace_name: &str, pod_name: &str) -> Option<PodMetadata> {
        let client = self.client();
        let result = self
            .bounded("get pod", client.get_pod(pod_name, namespace_name))
            .await
            .and_then(|pod| parse_pod_metadata(&pod, &self.options));

        match result {
            Ok(metadata) => {
                self.stats.bump(POD_COUNTERS.updates);
                Some(metadata)
            }
            Err(e) => {
                tracing::debug!(
                    namespace = %namespace_name,
                    pod = %pod_name,
                    error = %e,
                    "pod metadata fetch returned nothing"
                );
                self.record_failure(&POD_COUNTERS, &e).await;
                None
            }
        }
    }

    /// Fetch and parse one namespace. `None` on any failure.
    pub async fn fetch_namespace(&self, namespace_name: &str) -> Option<NamespaceMetadata> {
        let client = self.client();
        let result = self
            .bounded("get namespace", client.get_namespace(namespace_name))
            .await
            .and_then(|ns| parse_namespace_metadata(&ns, &self.options));

        match result {
            Ok(metadata) => {
                self.stats.bump(NAMESPACE_COUNTERS.updates);
                Some(metadata)
            }
            Err(e) => {
                tracing::debug!(
                    namespace = %namespace_name,
                    error = %e,
                    "namespace metadata fetch returned nothing"
                );
                self.record_failure(&NAMESPACE_COUNTERS, &e).await;
                None
            }
        }
    }

    /// Fetch a pod and store it in the pod cache under the strategy's key.
    ///
    /// Must not be called from inside a compute on `store.pods`.
    pub async fn fetch_and_cache_pod(
        &self,
        store: &MetadataStore,
        namespace_name: &str,
        pod_name: &str,
    ) -> Option<PodMetadata> {
        let metadata = self.fetch_pod(namespace_name, pod_name).await?;
        store
            .pods
            .set(self.strategy.pod_key(&metadata), metadata.clone())
            .await;
        Some(metadata)
    }

    /// Fetch a namespace and store it in the namespace cache.
    ///
    /// Must not be called from inside a compute on `store.namespaces`.
    pub async fn fetch_and_cache_namespace(
        &self,
        store: &MetadataStore,
        namespace_name: &str,
    ) -> Option<NamespaceMetadata> {
        let metadata = self.fetch_namespace(namespace_name).await?;
        store
            .namespaces
            .set(
                self.strategy
                    .namespace_key(&metadata.namespace_id, namespace_name),
                metadata.clone(),
            )
            .await;
        Some(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubemeta_test_utils::fixtures::{namespace_object, pod_object};
    use kubemeta_test_utils::{MockClientFactory, MockKubeApi};

    fn fetcher(api: Arc<MockKubeApi>, strategy: ResolverStrategy) -> MetadataFetcher {
        MetadataFetcher::new(api, ParseOptions::default(), strategy, Arc::new(Stats::new()))
    }

    #[tokio::test]
    async fn test_fetch_pod_success_counts_update() {
        let api = Arc::new(MockKubeApi::new());
        api.add_pod(pod_object("default", "web-0", "pod-uid", "node-a"));
        let fetcher = fetcher(api, ResolverStrategy::Identity);

        let metadata = fetcher.fetch_pod("default", "web-0").await.unwrap();
        assert_eq!(metadata.pod_id, "pod-uid");
        assert_eq!(fetcher.stats().get(Counter::PodCacheApiUpdates), 1);
    }

    #[tokio::test]
    async fn test_fetch_pod_not_found_is_none() {
        let api = Arc::new(MockKubeApi::new());
        let fetcher = fetcher(api, ResolverStrategy::Identity);

        assert!(fetcher.fetch_pod("default", "missing").await.is_none());
        assert_eq!(fetcher.stats().get(Counter::PodCacheApiNilNotFound), 1);
    }

    #[tokio::test]
    async fn test_fetch_transport_error_is_none() {
        let api = Arc::new(MockKubeApi::new());
        api.fail_namespace("default", ApiError::transient("connection reset"));
        let fetcher = fetcher(api, ResolverStrategy::Identity);

        assert!(fetcher.fetch_namespace("default").await.is_none());
        assert_eq!(fetcher.stats().get(Counter::NamespaceCacheApiNilError), 1);
    }

    #[tokio::test]
    async fn test_fetch_malformed_payload_counts_bad_response() {
        let api = Arc::new(MockKubeApi::new());
        let mut pod = pod_object("default", "web-0", "pod-uid", "node-a");
        pod.metadata.uid = None;
        api.add_pod(pod);
        let fetcher = fetcher(api, ResolverStrategy::Identity);

        assert!(fetcher.fetch_pod("default", "web-0").await.is_none());
        assert_eq!(fetcher.stats().get(Counter::PodCacheApiNilBadRespPayload), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_rebuilds_client() {
        let stale = Arc::new(MockKubeApi::new());
        stale.fail_pod(
            "default",
            "web-0",
            ApiError::Unauthorized {
                message: "token expired".to_string(),
            },
        );
        let fresh = Arc::new(MockKubeApi::new());
        fresh.add_pod(pod_object("default", "web-0", "pod-uid", "node-a"));
        let factory = Arc::new(MockClientFactory::single(Arc::clone(&fresh)));

        let fetcher = fetcher(stale, ResolverStrategy::Identity).with_factory(factory.clone());
        assert!(fetcher.fetch_pod("default", "web-0").await.is_none());
        assert_eq!(factory.create_count(), 1);
        assert!(fetcher.fetch_pod("default", "web-0").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_call_times_out_as_error() {
        let api = Arc::new(MockKubeApi::new());
        api.add_pod(pod_object("default", "web-0", "pod-uid", "node-a"));
        api.stall_gets();
        let fetcher = fetcher(api, ResolverStrategy::Identity)
            .with_call_timeout(Duration::from_secs(2));

        let started = tokio::time::Instant::now();
        assert!(fetcher.fetch_pod("default", "web-0").await.is_none());
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(fetcher.stats().get(Counter::PodCacheApiNilError), 1);
        assert_eq!(fetcher.stats().get(Counter::PodCacheApiUpdates), 0);
    }

    #[tokio::test]
    async fn test_client_timeout_counts_as_error() {
        let api = Arc::new(MockKubeApi::new());
        api.fail_pod(
            "default",
            "web-0",
            ApiError::Timeout {
                operation: "get pod".to_string(),
            },
        );
        let fetcher = fetcher(api, ResolverStrategy::Identity);

        assert!(fetcher.fetch_pod("default", "web-0").await.is_none());
        assert_eq!(fetcher.stats().get(Counter::PodCacheApiNilError), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_from_config_bounds_calls() {
        let api = Arc::new(MockKubeApi::new());
        api.add_namespace(namespace_object("default", "ns-uid", None));
        api.stall_gets();
        let config = MetadataConfig {
            open_timeout_ms: 1_000,
            read_timeout_ms: 2_000,
            ..MetadataConfig::default()
        };
        let fetcher = MetadataFetcher::from_config(&config, api, Arc::new(Stats::new())).unwrap();

        let started = tokio::time::Instant::now();
        assert!(fetcher.fetch_namespace("default").await.is_none());
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(fetcher.stats().get(Counter::NamespaceCacheApiNilError), 1);
    }

    #[tokio::test]
    async fn test_fetch_and_cache_uses_strategy_keys() {
        let api = Arc::new(MockKubeApi::new());
        api.add_pod(pod_object("default", "web-0", "pod-uid", "node-a"));
        api.add_namespace(namespace_object("default", "ns-uid", None));
        let store = MetadataStore::new(10, None);

        let identity = fetcher(Arc::clone(&api), ResolverStrategy::Identity);
        identity.fetch_and_cache_pod(&store, "default", "web-0").await;
        identity.fetch_and_cache_namespace(&store, "default").await;
        assert!(store.pods.contains(&"pod-uid".to_string()).await);
        assert!(store.namespaces.contains(&"ns-uid".to_string()).await);

        let simple = fetcher(api, ResolverStrategy::Simple);
        simple.fetch_and_cache_pod(&store, "default", "web-0").await;
        simple.fetch_and_cache_namespace(&store, "default").await;
        assert!(store.pods.contains(&"default_web-0".to_string()).await);
        assert!(store.namespaces.contains(&"default".to_string()).await);
    }
}
