use std::sync::Arc;

use async_trait::async_trait;
use kubemeta_core::{simple_pod_key, Counter, Metadata, NamespaceMetadata, PodMetadata};

use super::{BatchMissCache, LookupRequest, MetadataResolver};
use crate::fetch::MetadataFetcher;
use crate::store::MetadataStore;

/// Resolver for sources that already name the pod: pods are cached under
/// `namespace_pod`, namespaces under their name.
///
/// Produces no orphan sentinel. Lookups whose pod fetch comes back empty are
/// remembered for the rest of the batch, namespace fields included.
pub struct SimpleResolver {
    store: Arc<MetadataStore>,
    fetcher: Arc<MetadataFetcher>,
    skip_namespace_metadata: bool,
}

impl SimpleResolver {
    pub fn new(
        store: Arc<MetadataStore>,
        fetcher: Arc<MetadataFetcher>,
        skip_namespace_metadata: bool,
    ) -> Self {
        Self {
            store,
            fetcher,
            skip_namespace_metadata,
        }
    }

    async fn pod(&self, request: &LookupRequest) -> Option<PodMetadata> {
        let key = simple_pod_key(&request.namespace_name, &request.pod_name);
        self.store
            .pods
            .try_get_or_compute(key, || async {
                self.fetcher.stats().bump(Counter::PodCacheMiss);
                self.fetcher
                    .fetch_pod(&request.namespace_name, &request.pod_name)
                    .await
                    .ok_or(())
            })
            .await
            .ok()
    }

    async fn namespace(&self, request: &LookupRequest) -> Option<NamespaceMetadata> {
        if self.skip_namespace_metadata {
            return None;
        }
        self.store
            .namespaces
            .try_get_or_compute(request.namespace_name.clone(), || async {
                self.fetcher.stats().bump(Counter::NamespaceCacheMiss);
                self.fetcher
                    .fetch_namespace(&request.namespace_name)
                    .await
                    .ok_or(())
            })
            .await
            .ok()
    }
}

#[async_trait]
impl MetadataResolver for SimpleResolver {
    async fn resolve(&self, request: &LookupRequest, batch: &mut BatchMissCache) -> Metadata {
        if let Some(hit) = batch.lookup(request) {
            self.fetcher.stats().bump(Counter::BatchMissCacheHits);
            return hit.clone();
        }

        let pod = self.pod(request).await;
        let pod_missing = pod.is_none();
        let mut metadata = pod.map(Metadata::from).unwrap_or_default();
        if let Some(namespace) = self.namespace(request).await {
            metadata.merge_namespace(&namespace);
        }

        if pod_missing {
            batch.remember(request, metadata.clone());
        }
        metadata
    }
}
