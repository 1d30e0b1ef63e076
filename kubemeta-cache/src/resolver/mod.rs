//! Metadata resolution for log identities.
//!
//! Two keying strategies share one interface:
//! - [`IdentityResolver`]: container/pod identity -> `IdentityRecord` -> pod
//!   and namespace caches, with orphan handling.
//! - [`SimpleResolver`]: pods keyed directly by `namespace_pod`.
//!
//! Both take a [`BatchMissCache`] owned by the caller for the duration of
//! one input batch.

mod identity;
mod simple;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kubemeta_core::{simple_pod_key, Metadata, MetadataConfig, ResolverStrategy};

use crate::fetch::MetadataFetcher;
use crate::store::MetadataStore;

pub use identity::{IdentityResolver, OrphanPolicy};
pub use simple::SimpleResolver;

/// One lookup, as extracted from a log record by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    /// Container or pod identity from the log tag/record.
    pub identity_key: String,
    pub namespace_name: String,
    pub pod_name: String,
    /// When the record was produced.
    pub record_time: DateTime<Utc>,
}

impl LookupRequest {
    pub fn new(
        identity_key: impl Into<String>,
        namespace_name: impl Into<String>,
        pod_name: impl Into<String>,
        record_time: DateTime<Utc>,
    ) -> Self {
        Self {
            identity_key: identity_key.into(),
            namespace_name: namespace_name.into(),
            pod_name: pod_name.into(),
            record_time,
        }
    }

    fn batch_key(&self) -> String {
        simple_pod_key(&self.namespace_name, &self.pod_name)
    }
}

/// Per-batch memory of lookups that could not be resolved remotely.
///
/// Create one per input batch and drop it afterwards; it is never shared
/// between batches.
#[derive(Debug, Clone, Default)]
pub struct BatchMissCache {
    entries: HashMap<String, Metadata>,
}

impl BatchMissCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, namespace_name: &str, pod_name: &str) -> Option<&Metadata> {
        self.entries.get(&simple_pod_key(namespace_name, pod_name))
    }

    pub fn insert(&mut self, namespace_name: &str, pod_name: &str, metadata: Metadata) {
        self.entries
            .insert(simple_pod_key(namespace_name, pod_name), metadata);
    }

    fn lookup(&self, request: &LookupRequest) -> Option<&Metadata> {
        self.entries.get(&request.batch_key())
    }

    fn remember(&mut self, request: &LookupRequest, metadata: Metadata) {
        self.entries.insert(request.batch_key(), metadata);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Turns a lookup into merged pod + namespace metadata.
///
/// Never fails: unresolvable lookups yield the orphan sentinel or an empty
/// result, depending on policy.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn resolve(&self, request: &LookupRequest, batch: &mut BatchMissCache) -> Metadata;
}

/// Build the resolver selected by `config.strategy`.
pub fn build_resolver(
    config: &MetadataConfig,
    store: Arc<MetadataStore>,
    fetcher: Arc<MetadataFetcher>,
) -> Arc<dyn MetadataResolver> {
    match config.strategy {
        ResolverStrategy::Identity => Arc::new(IdentityResolver::new(
            store,
            fetcher,
            OrphanPolicy::from_config(config),
        )),
        ResolverStrategy::Simple => Arc::new(SimpleResolver::new(
            store,
            fetcher,
            config.skip_namespace_metadata,
        )),
    }
}
