//! KubeMeta Test Utilities
//!
//! Shared test infrastructure for the KubeMeta workspace:
//! - Scripted in-memory `KubeApi` with call recording
//! - Client factory mock for credential refresh paths
//! - Object fixtures for pods and namespaces
//! - Proptest generators for cache keys and metadata

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

pub use kubemeta_core::{
    ApiClientFactory, ApiError, IdentityRecord, KubeApi, ListParams, Metadata, NamespaceMetadata,
    NamespaceObject, ObjectList, ObjectMeta, PodMetadata, PodObject, WatchEvent, WatchParams,
    WatchStream,
};

// ============================================================================
// MOCK API
// ============================================================================

/// One recorded call against `MockKubeApi`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    GetPod { name: String, namespace: String },
    GetNamespace { name: String },
    ListPods(ListParams),
    ListNamespaces(ListParams),
    WatchPods(WatchParams),
    WatchNamespaces(WatchParams),
}

/// Events delivered by one watch call.
#[derive(Debug, Clone)]
pub struct WatchSession<T> {
    events: Vec<Result<WatchEvent<T>, ApiError>>,
    hold_open: bool,
}

impl<T> WatchSession<T> {
    /// Deliver the events, then end the stream cleanly.
    pub fn closing(events: Vec<Result<WatchEvent<T>, ApiError>>) -> Self {
        Self {
            events,
            hold_open: false,
        }
    }

    /// Deliver the events, then stay open without further events.
    pub fn held_open(events: Vec<Result<WatchEvent<T>, ApiError>>) -> Self {
        Self {
            events,
            hold_open: true,
        }
    }
}

struct Script<T> {
    lists: VecDeque<Result<ObjectList<T>, ApiError>>,
    watches: VecDeque<Result<WatchSession<T>, ApiError>>,
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self {
            lists: VecDeque::new(),
            watches: VecDeque::new(),
        }
    }
}

impl<T: Send + 'static> Script<T> {
    fn next_list(&mut self, fallback: Option<ApiError>) -> Result<ObjectList<T>, ApiError> {
        match self.lists.pop_front() {
            Some(result) => result,
            None => match fallback {
                Some(err) => Err(err),
                None => Ok(ObjectList::new(Vec::new(), "0")),
            },
        }
    }

    fn next_watch(&mut self) -> Result<WatchStream<T>, ApiError> {
        let session = match self.watches.pop_front() {
            Some(result) => result?,
            None => WatchSession::held_open(Vec::new()),
        };
        let events = stream::iter(session.events);
        if session.hold_open {
            Ok(events.chain(stream::pending()).boxed())
        } else {
            Ok(events.boxed())
        }
    }
}

/// Scripted in-memory Kubernetes API.
///
/// Gets are answered from registered objects (404 otherwise). Lists and
/// watches pop scripted responses in order; once the script runs out, lists
/// return an empty result (or the persistent error, if set) and watches stay
/// open with no events.
#[derive(Default)]
pub struct MockKubeApi {
    pods: RwLock<HashMap<(String, String), Result<PodObject, ApiError>>>,
    namespaces: RwLock<HashMap<String, Result<NamespaceObject, ApiError>>>,
    pod_script: RwLock<Script<PodObject>>,
    namespace_script: RwLock<Script<NamespaceObject>>,
    persistent_list_error: RwLock<Option<ApiError>>,
    stalled_gets: AtomicBool,
    calls: RwLock<Vec<ApiCall>>,
}

impl MockKubeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pod for `get_pod`, keyed by its namespace and name.
    pub fn add_pod(&self, pod: PodObject) {
        let key = (
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default(),
        );
        self.pods.write().unwrap().insert(key, Ok(pod));
    }

    pub fn fail_pod(&self, namespace: &str, name: &str, err: ApiError) {
        self.pods
            .write()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), Err(err));
    }

    pub fn add_namespace(&self, namespace: NamespaceObject) {
        let key = namespace.metadata.name.clone().unwrap_or_default();
        self.namespaces.write().unwrap().insert(key, Ok(namespace));
    }

    pub fn fail_namespace(&self, name: &str, err: ApiError) {
        self.namespaces
            .write()
            .unwrap()
            .insert(name.to_string(), Err(err));
    }

    /// Make every later `get_pod`/`get_namespace` hang forever.
    pub fn stall_gets(&self) {
        self.stalled_gets.store(true, Ordering::SeqCst);
    }

    async fn maybe_stall(&self) {
        if self.stalled_gets.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }

    pub fn push_pod_list(&self, result: Result<ObjectList<PodObject>, ApiError>) {
        self.pod_script.write().unwrap().lists.push_back(result);
    }

    pub fn push_namespace_list(&self, result: Result<ObjectList<NamespaceObject>, ApiError>) {
        self.namespace_script.write().unwrap().lists.push_back(result);
    }

    pub fn push_pod_watch(&self, session: Result<WatchSession<PodObject>, ApiError>) {
        self.pod_script.write().unwrap().watches.push_back(session);
    }

    pub fn push_namespace_watch(&self, session: Result<WatchSession<NamespaceObject>, ApiError>) {
        self.namespace_script
            .write()
            .unwrap()
            .watches
            .push_back(session);
    }

    /// Make every unscripted list call fail with `err`.
    pub fn fail_all_lists(&self, err: ApiError) {
        *self.persistent_list_error.write().unwrap() = Some(err);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.read().unwrap().clone()
    }

    pub fn get_pod_calls(&self) -> usize {
        self.count(|c| matches!(c, ApiCall::GetPod { .. }))
    }

    pub fn get_namespace_calls(&self) -> usize {
        self.count(|c| matches!(c, ApiCall::GetNamespace { .. }))
    }

    /// Parameters of every `list_pods` call, in order.
    pub fn pod_list_params(&self) -> Vec<ListParams> {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                ApiCall::ListPods(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn namespace_list_params(&self) -> Vec<ListParams> {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                ApiCall::ListNamespaces(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn pod_watch_params(&self) -> Vec<WatchParams> {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                ApiCall::WatchPods(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn namespace_watch_params(&self) -> Vec<WatchParams> {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                ApiCall::WatchNamespaces(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&ApiCall) -> bool) -> usize {
        self.calls.read().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: ApiCall) {
        self.calls.write().unwrap().push(call);
    }
}

#[async_trait]
impl KubeApi for MockKubeApi {
    async fn get_pod(&self, name: &str, namespace: &str) -> Result<PodObject, ApiError> {
        self.record(ApiCall::GetPod {
            name: name.to_string(),
            namespace: namespace.to_string(),
        });
        self.maybe_stall().await;
        self.pods
            .read()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .unwrap_or_else(|| {
                Err(ApiError::NotFound {
                    kind: "pod".to_string(),
                    name: format!("{}/{}", namespace, name),
                })
            })
    }

    async fn get_namespace(&self, name: &str) -> Result<NamespaceObject, ApiError> {
        self.record(ApiCall::GetNamespace {
            name: name.to_string(),
        });
        self.maybe_stall().await;
        self.namespaces
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_else(|| {
                Err(ApiError::NotFound {
                    kind: "namespace".to_string(),
                    name: name.to_string(),
                })
            })
    }

    async fn list_pods(&self, params: &ListParams) -> Result<ObjectList<PodObject>, ApiError> {
        self.record(ApiCall::ListPods(params.clone()));
        let fallback = self.persistent_list_error.read().unwrap().clone();
        self.pod_script.write().unwrap().next_list(fallback)
    }

    async fn list_namespaces(
        &self,
        params: &ListParams,
    ) -> Result<ObjectList<NamespaceObject>, ApiError> {
        self.record(ApiCall::ListNamespaces(params.clone()));
        let fallback = self.persistent_list_error.read().unwrap().clone();
        self.namespace_script.write().unwrap().next_list(fallback)
    }

    async fn watch_pods(&self, params: &WatchParams) -> Result<WatchStream<PodObject>, ApiError> {
        self.record(ApiCall::WatchPods(params.clone()));
        self.pod_script.write().unwrap().next_watch()
    }

    async fn watch_namespaces(
        &self,
        params: &WatchParams,
    ) -> Result<WatchStream<NamespaceObject>, ApiError> {
        self.record(ApiCall::WatchNamespaces(params.clone()));
        self.namespace_script.write().unwrap().next_watch()
    }
}

/// Factory handing out pre-built clients in order, repeating the last one.
pub struct MockClientFactory {
    clients: Vec<Arc<MockKubeApi>>,
    created: AtomicUsize,
}

impl MockClientFactory {
    pub fn new(clients: Vec<Arc<MockKubeApi>>) -> Self {
        Self {
            clients,
            created: AtomicUsize::new(0),
        }
    }

    pub fn single(client: Arc<MockKubeApi>) -> Self {
        Self::new(vec![client])
    }

    /// Number of clients handed out so far.
    pub fn create_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApiClientFactory for MockClientFactory {
    async fn create(&self) -> Result<Arc<dyn KubeApi>, ApiError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let client = self
            .clients
            .get(n)
            .or_else(|| self.clients.last())
            .cloned()
            .ok_or_else(|| ApiError::Fatal {
                message: "no mock clients configured".to_string(),
            })?;
        Ok(client)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built objects for common scenarios.

    use chrono::{DateTime, Utc};
    use kubemeta_core::object::{ContainerStatus, PodSpec, PodStatus};

    use super::*;

    /// Fresh UUIDv7 string for object uids.
    pub fn new_uid() -> String {
        uuid::Uuid::now_v7().to_string()
    }

    /// A running pod with one container.
    pub fn pod_object(namespace: &str, name: &str, uid: &str, node: &str) -> PodObject {
        let mut metadata = ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uid.to_string()),
            resource_version: Some("1".to_string()),
            ..Default::default()
        };
        metadata.labels.insert("app".to_string(), name.to_string());

        PodObject {
            metadata,
            spec: Some(PodSpec {
                node_name: Some(node.to_string()),
            }),
            status: Some(PodStatus {
                pod_ip: Some("10.0.0.1".to_string()),
                container_statuses: vec![ContainerStatus {
                    name: name.to_string(),
                    image: Some("registry.local/app:1.0".to_string()),
                    image_id: Some("docker-pullable://registry.local/app@sha256:00".to_string()),
                    container_id: Some(format!("containerd://{}-c0", uid)),
                }],
            }),
        }
    }

    pub fn namespace_object(name: &str, uid: &str, created: Option<DateTime<Utc>>) -> NamespaceObject {
        NamespaceObject {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                uid: Some(uid.to_string()),
                resource_version: Some("1".to_string()),
                creation_timestamp: created,
                ..Default::default()
            },
        }
    }

    /// Copy of `pod` with a label changed and a new resourceVersion.
    pub fn relabel_pod(pod: &PodObject, key: &str, value: &str, resource_version: &str) -> PodObject {
        let mut pod = pod.clone();
        pod.metadata.labels.insert(key.to_string(), value.to_string());
        pod.metadata.resource_version = Some(resource_version.to_string());
        pod
    }

    pub fn pod_metadata(pod_id: &str, labels: &[(&str, &str)]) -> PodMetadata {
        let mut metadata = PodMetadata::stub(pod_id);
        for (k, v) in labels {
            metadata.labels.insert(k.to_string(), v.to_string());
        }
        metadata
    }

    pub fn namespace_metadata(namespace_id: &str, labels: &[(&str, &str)]) -> NamespaceMetadata {
        let mut metadata = NamespaceMetadata::stub(namespace_id);
        for (k, v) in labels {
            metadata.namespace_labels.insert(k.to_string(), v.to_string());
        }
        metadata
    }

    pub fn watch_error(code: u16, message: &str) -> WatchEvent<PodObject> {
        WatchEvent::Error(kubemeta_core::ErrorPayload {
            code: Some(code),
            message: Some(message.to_string()),
            reason: None,
        })
    }

    /// Serialized form of a resolver result, for comparison with `json!`.
    pub fn metadata_json(metadata: &Metadata) -> serde_json::Value {
        serde_json::to_value(metadata).unwrap()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache keys and metadata values.

    use proptest::collection::btree_map;
    use proptest::prelude::*;

    use super::*;

    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-z0-9]{1,8}"
    }

    pub fn arb_labels() -> impl Strategy<Value = std::collections::BTreeMap<String, String>> {
        btree_map("[a-z]{1,6}", "[a-z0-9]{0,6}", 0..4)
    }

    pub fn arb_pod_metadata() -> impl Strategy<Value = PodMetadata> {
        ("[a-f0-9]{8}", arb_labels()).prop_map(|(pod_id, labels)| PodMetadata {
            pod_id,
            labels,
            ..Default::default()
        })
    }

    /// Cache operations for model-based tests.
    #[derive(Debug, Clone)]
    pub enum CacheOp {
        Set(String, u32),
        Get(String),
        Delete(String),
    }

    pub fn arb_cache_op() -> impl Strategy<Value = CacheOp> {
        prop_oneof![
            (arb_key(), any::<u32>()).prop_map(|(k, v)| CacheOp::Set(k, v)),
            arb_key().prop_map(CacheOp::Get),
            arb_key().prop_map(CacheOp::Delete),
        ]
    }
}
