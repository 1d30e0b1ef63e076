use std::sync::Arc;

use async_trait::async_trait;
use kubemeta_core::{
    Counter, IdentityRecord, Metadata, MetadataConfig, NamespaceMetadata, PodMetadata, Stats,
};

use super::{BatchMissCache, LookupRequest, MetadataResolver};
use crate::fetch::MetadataFetcher;
use crate::store::MetadataStore;

/// What to return when neither pod nor namespace can be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanPolicy {
    pub allow_orphans: bool,
    pub orphaned_namespace_name: String,
    pub orphaned_namespace_id: String,
}

impl OrphanPolicy {
    pub fn from_config(config: &MetadataConfig) -> Self {
        Self {
            allow_orphans: config.allow_orphans,
            orphaned_namespace_name: config.orphaned_namespace_name.clone(),
            orphaned_namespace_id: config.orphaned_namespace_id.clone(),
        }
    }

    fn result_for(&self, requested_namespace: &str) -> Metadata {
        if self.allow_orphans {
            Metadata::orphan(
                requested_namespace,
                self.orphaned_namespace_name.as_str(),
                self.orphaned_namespace_id.as_str(),
            )
        } else {
            Metadata::default()
        }
    }
}

impl Default for OrphanPolicy {
    fn default() -> Self {
        Self::from_config(&MetadataConfig::default())
    }
}

/// Identity-indexed resolver.
///
/// A hit in the identity cache takes the fast path through the pod and
/// namespace caches. A miss fetches both objects fresh and records the
/// linkage when both are found.
pub struct IdentityResolver {
    store: Arc<MetadataStore>,
    fetcher: Arc<MetadataFetcher>,
    orphans: OrphanPolicy,
}

impl IdentityResolver {
    pub fn new(store: Arc<MetadataStore>, fetcher: Arc<MetadataFetcher>, orphans: OrphanPolicy) -> Self {
        Self {
            store,
            fetcher,
            orphans,
        }
    }

    fn stats(&self) -> &Stats {
        self.fetcher.stats()
    }

    async fn fast_path(&self, request: &LookupRequest, record: IdentityRecord) -> Metadata {
        let mut metadata = match &record.pod_id {
            Some(pod_id) => {
                let pod = self
                    .store
                    .pods
                    .get_or_compute(pod_id.clone(), || async {
                        self.stats().bump(Counter::PodCacheMiss);
                        self.fetcher
                            .fetch_pod(&request.namespace_name, &request.pod_name)
                            .await
                            .unwrap_or_else(|| PodMetadata::stub(pod_id.as_str()))
                    })
                    .await;
                Metadata::from(pod)
            }
            None => Metadata::default(),
        };

        if let Some(namespace_id) = &record.namespace_id {
            let namespace = self
                .store
                .namespaces
                .get_or_compute(namespace_id.clone(), || async {
                    self.stats().bump(Counter::NamespaceCacheMiss);
                    self.fetcher
                        .fetch_namespace(&request.namespace_name)
                        .await
                        .unwrap_or_else(|| NamespaceMetadata::stub(namespace_id.as_str()))
                })
                .await;
            metadata.merge_namespace(&namespace);
        }

        metadata
    }

    async fn slow_path(&self, request: &LookupRequest, batch: &mut BatchMissCache) -> Metadata {
        self.stats().bump(Counter::IdCacheMiss);

        let pod = self
            .fetcher
            .fetch_and_cache_pod(&self.store, &request.namespace_name, &request.pod_name)
            .await;
        let namespace = self
            .fetcher
            .fetch_and_cache_namespace(&self.store, &request.namespace_name)
            .await;

        match (pod, namespace) {
            (Some(pod), Some(namespace)) => {
                let record = IdentityRecord::new(pod.pod_id.as_str(), namespace.namespace_id.as_str());
                self.store
                    .identities
                    .set(request.identity_key.clone(), record)
                    .await;
                let mut metadata = Metadata::from(pod);
                metadata.merge_namespace(&namespace);
                metadata
            }
            (None, Some(namespace)) => {
                self.stats().bump(Counter::IdCachePodNotFoundNamespace);
                self.pod_missing(request, namespace, batch).await
            }
            (Some(_), None) => {
                self.stats().bump(Counter::IdCacheNamespaceNotFoundPod);
                self.unresolved(request, batch)
            }
            (None, None) => {
                self.stats().bump(Counter::IdCacheOrphanedRecord);
                self.unresolved(request, batch)
            }
        }
    }

    /// Namespace exists but the pod does not.
    ///
    /// If the namespace predates the record the pod most likely finished
    /// after logging, so the identity itself stands in for the pod id. A
    /// namespace newer than the record points at a recreated namespace; only
    /// its fields are returned and no identity record is written.
    async fn pod_missing(
        &self,
        request: &LookupRequest,
        namespace: NamespaceMetadata,
        batch: &mut BatchMissCache,
    ) -> Metadata {
        let predates_record = namespace
            .creation_timestamp
            .map(|created| created <= request.record_time)
            .unwrap_or(true);

        if !predates_record {
            tracing::debug!(
                namespace = %request.namespace_name,
                pod = %request.pod_name,
                "namespace is newer than record, skipping pod linkage"
            );
            let metadata = Metadata::from_namespace(&namespace);
            batch.remember(request, metadata.clone());
            return metadata;
        }

        let pod_id = request.identity_key.clone();
        let stub = self
            .store
            .pods
            .get_or_compute(pod_id.clone(), || async { PodMetadata::stub(pod_id.as_str()) })
            .await;
        self.store
            .identities
            .set(
                request.identity_key.clone(),
                IdentityRecord::new(pod_id.as_str(), namespace.namespace_id.as_str()),
            )
            .await;

        let mut metadata = Metadata::from(stub);
        metadata.merge_namespace(&namespace);
        metadata
    }

    fn unresolved(&self, request: &LookupRequest, batch: &mut BatchMissCache) -> Metadata {
        tracing::trace!(
            namespace = %request.namespace_name,
            pod = %request.pod_name,
            orphaned = self.orphans.allow_orphans,
            "pod and namespace unresolvable"
        );
        let metadata = self.orphans.result_for(&request.namespace_name);
        batch.remember(request, metadata.clone());
        metadata
    }
}

#[async_trait]
impl MetadataResolver for IdentityResolver {
    async fn resolve(&self, request: &LookupRequest, batch: &mut BatchMissCache) -> Metadata {
        if let Some(hit) = batch.lookup(request) {
            self.stats().bump(Counter::BatchMissCacheHits);
            return hit.clone();
        }

        match self.store.identities.get(&request.identity_key).await {
            Some(record) => self.fast_path(request, record).await,
            None => self.slow_path(request, batch).await,
        }
    }
}
