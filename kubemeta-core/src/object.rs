//! Raw Kubernetes API objects consumed by the metadata subsystem.
//!
//! Only the fields the parse helpers read are modelled; everything else in
//! the server payload is ignored during deserialization.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

/// Minimal representation of Kubernetes object metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub uid: Option<String>,
    pub resource_version: Option<String>,
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReferenceObject>,
}

/// Owner reference as served by the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReferenceObject {
    pub api_version: Option<String>,
    pub kind: Option<String>,
    pub name: Option<String>,
    pub uid: Option<String>,
    pub controller: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub node_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    pub name: String,
    pub image: Option<String>,
    #[serde(rename = "imageID")]
    pub image_id: Option<String>,
    #[serde(rename = "containerID")]
    pub container_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(rename = "podIP")]
    pub pod_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_statuses: Vec<ContainerStatus>,
}

/// A pod object as returned by get/list/watch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodObject {
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: Option<PodSpec>,
    pub status: Option<PodStatus>,
}

impl PodObject {
    pub fn node_name(&self) -> Option<&str> {
        self.spec.as_ref().and_then(|s| s.node_name.as_deref())
    }
}

/// A namespace object as returned by get/list/watch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceObject {
    #[serde(default)]
    pub metadata: ObjectMeta,
}

/// Objects that carry standard metadata.
pub trait HasObjectMeta {
    fn meta(&self) -> &ObjectMeta;

    fn uid(&self) -> Option<&str> {
        self.meta().uid.as_deref()
    }

    fn resource_version(&self) -> Option<&str> {
        self.meta().resource_version.as_deref()
    }
}

impl HasObjectMeta for PodObject {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl HasObjectMeta for NamespaceObject {
    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }
}

// ============================================================================
// LIST / WATCH
// ============================================================================

/// Metadata included with list responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMeta {
    pub resource_version: Option<String>,
}

/// A list response: current items plus the cursor to watch from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectList<T> {
    #[serde(default)]
    pub metadata: ListMeta,
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

impl<T> ObjectList<T> {
    pub fn new(items: Vec<T>, resource_version: impl Into<String>) -> Self {
        Self {
            metadata: ListMeta {
                resource_version: Some(resource_version.into()),
            },
            items,
        }
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.metadata.resource_version.as_deref()
    }
}

/// Parameters for list calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pub field_selector: Option<String>,
    /// `None` lists fresh from the server with no cursor filter.
    pub resource_version: Option<String>,
}

/// Parameters for watch calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchParams {
    pub field_selector: Option<String>,
    pub resource_version: Option<String>,
}

/// Status payload carried by watch `ERROR` events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: Option<u16>,
    pub message: Option<String>,
    pub reason: Option<String>,
}

impl ErrorPayload {
    pub fn is_gone(&self) -> bool {
        self.code == Some(410) || self.reason.as_deref() == Some("Expired")
    }

    /// Convert the payload into the closed API error set.
    pub fn into_api_error(self) -> ApiError {
        let gone = self.is_gone();
        let message = self
            .message
            .unwrap_or_else(|| "watch stream reported an error".to_string());
        match self.code {
            _ if gone => ApiError::Gone { message },
            Some(401) => ApiError::Unauthorized { message },
            _ => ApiError::Transient { message },
        }
    }
}

/// One notification from a watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
    Error(ErrorPayload),
}

/// A watch frame as it appears on the wire: `{"type": ..., "object": {...}}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawWatchEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub object: Value,
}

impl<T: DeserializeOwned> TryFrom<RawWatchEvent> for WatchEvent<T> {
    type Error = ApiError;

    fn try_from(raw: RawWatchEvent) -> Result<Self, ApiError> {
        let decode = |object: Value| {
            serde_json::from_value::<T>(object).map_err(|e| ApiError::invalid_payload(e.to_string()))
        };
        match raw.event_type.as_str() {
            "ADDED" => Ok(Self::Added(decode(raw.object)?)),
            "MODIFIED" => Ok(Self::Modified(decode(raw.object)?)),
            "DELETED" => Ok(Self::Deleted(decode(raw.object)?)),
            "ERROR" => {
                let payload = serde_json::from_value::<ErrorPayload>(raw.object)
                    .map_err(|e| ApiError::invalid_payload(e.to_string()))?;
                Ok(Self::Error(payload))
            }
            other => Err(ApiError::invalid_payload(format!(
                "unknown watch event type: {}",
                other
            ))),
        }
    }
}
