//! KubeMeta Cache - Bounded Caches and Metadata Resolution
//!
//! Bounded TTL/LRU caches for identities, pods and namespaces, the two
//! resolver strategies built on top of them, the remote fetch helpers used
//! on misses, and background tasks for stats reporting and checkpointing.
//!
//! The caches are shared through [`MetadataStore`]; the watch crate keeps
//! them fresh while resolvers read them on the hot path.

pub mod bounded;
pub mod checkpoint;
pub mod fetch;
pub mod report;
pub mod resolver;
pub mod store;

pub use bounded::{BoundedCache, CacheEntry};
pub use checkpoint::{checkpoint_task, CheckpointCounts, CheckpointStore};
pub use fetch::MetadataFetcher;
pub use report::{report_once, stats_report_task};
pub use resolver::{
    build_resolver, BatchMissCache, IdentityResolver, LookupRequest, MetadataResolver,
    OrphanPolicy, SimpleResolver,
};
pub use store::MetadataStore;
