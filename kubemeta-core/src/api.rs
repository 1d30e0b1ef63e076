//! The remote API contract consumed by the cache and watch crates.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::ApiError;
use crate::object::{
    ListParams, NamespaceObject, ObjectList, PodObject, WatchEvent, WatchParams,
};

/// A stream of watch events. Ending cleanly means the server closed the watch.
pub type WatchStream<T> = BoxStream<'static, Result<WatchEvent<T>, ApiError>>;

/// Get/list/watch access to pods and namespaces.
#[async_trait]
pub trait KubeApi: Send + Sync {
    async fn get_pod(&self, name: &str, namespace: &str) -> Result<PodObject, ApiError>;

    async fn get_namespace(&self, name: &str) -> Result<NamespaceObject, ApiError>;

    async fn list_pods(&self, params: &ListParams) -> Result<ObjectList<PodObject>, ApiError>;

    async fn list_namespaces(
        &self,
        params: &ListParams,
    ) -> Result<ObjectList<NamespaceObject>, ApiError>;

    async fn watch_pods(&self, params: &WatchParams) -> Result<WatchStream<PodObject>, ApiError>;

    async fn watch_namespaces(
        &self,
        params: &WatchParams,
    ) -> Result<WatchStream<NamespaceObject>, ApiError>;
}

/// Builds API clients. Called again after a 401 so credentials are re-read.
#[async_trait]
pub trait ApiClientFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn KubeApi>, ApiError>;
}

/// Factory that always hands back the same client.
pub struct StaticClientFactory {
    client: Arc<dyn KubeApi>,
}

impl StaticClientFactory {
    pub fn new(client: Arc<dyn KubeApi>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ApiClientFactory for StaticClientFactory {
    async fn create(&self) -> Result<Arc<dyn KubeApi>, ApiError> {
        Ok(Arc::clone(&self.client))
    }
}
