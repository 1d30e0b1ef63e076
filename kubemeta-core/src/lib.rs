//! KubeMeta Core - Data Types and Contracts
//!
//! Metadata entities, raw API objects, configuration, counters and the
//! remote API trait shared by the cache, watch and client crates.
//! This crate performs no I/O.

pub mod api;
pub mod config;
pub mod error;
pub mod metadata;
pub mod object;
pub mod parse;
pub mod stats;

pub use api::{ApiClientFactory, KubeApi, StaticClientFactory, WatchStream};
pub use config::{
    CheckpointConfig, LoggingConfig, MetadataConfig, ParseOptions, ResolverStrategy,
    DEFAULT_CACHE_SIZE, DEFAULT_CACHE_TTL_SECS, DEFAULT_ORPHANED_NAMESPACE_ID,
    DEFAULT_ORPHANED_NAMESPACE_NAME,
};
pub use error::{ApiError, CheckpointError, ConfigError, KubeMetaError, KubeMetaResult};
pub use metadata::{
    ContainerMetadata, IdentityRecord, Metadata, NamespaceMetadata, OwnerReference, PodMetadata,
};
pub use object::{
    ErrorPayload, HasObjectMeta, ListParams, NamespaceObject, ObjectList, ObjectMeta, PodObject,
    RawWatchEvent, WatchEvent, WatchParams,
};
pub use parse::{parse_namespace_metadata, parse_pod_metadata, simple_pod_key, strip_runtime_prefix};
pub use stats::{Counter, Gauge, Stats};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
