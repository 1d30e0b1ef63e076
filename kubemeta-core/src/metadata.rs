//! Parsed metadata entities and the merged result handed back to callers.
//!
//! `PodMetadata`, `NamespaceMetadata` and `IdentityRecord` are the values
//! stored in the three caches. `Metadata` is the merged, caller-facing view;
//! it deliberately has no creation timestamp field.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// CACHED ENTITIES
// ============================================================================

/// Linkage from a container/pod identity to its owning pod and namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_id: Option<String>,
}

impl IdentityRecord {
    pub fn new(pod_id: impl Into<String>, namespace_id: impl Into<String>) -> Self {
        Self {
            pod_id: Some(pod_id.into()),
            namespace_id: Some(namespace_id.into()),
        }
    }
}

/// Owner reference carried on a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<bool>,
}

/// Per-container details, keyed by runtime id in `PodMetadata::containers`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_runtime_id: Option<String>,
}

/// Denormalized pod state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodMetadata {
    pub pod_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_refs: Vec<OwnerReference>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub containers: BTreeMap<String, ContainerMetadata>,
}

impl PodMetadata {
    /// Minimal entry holding only the pod id.
    ///
    /// Stored when a fast-path fetch finds nothing, so repeated lookups for
    /// the same id stay local.
    pub fn stub(pod_id: impl Into<String>) -> Self {
        Self {
            pod_id: pod_id.into(),
            ..Default::default()
        }
    }
}

/// Parsed namespace state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceMetadata {
    pub namespace_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespace_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespace_annotations: BTreeMap<String, String>,
    /// Only consulted by the resolver; never copied into `Metadata`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl NamespaceMetadata {
    pub fn stub(namespace_id: impl Into<String>) -> Self {
        Self {
            namespace_id: namespace_id.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// MERGED RESULT
// ============================================================================

/// Merged pod + namespace metadata returned to the enrichment step.
///
/// Absent values are dropped on serialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_refs: Vec<OwnerReference>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub containers: BTreeMap<String, ContainerMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespace_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub namespace_annotations: BTreeMap<String, String>,
    /// Set only on the orphan sentinel: the namespace name the caller asked for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orphaned_namespace: Option<String>,
}

impl Metadata {
    /// Result carrying only namespace fields.
    pub fn from_namespace(namespace: &NamespaceMetadata) -> Self {
        let mut metadata = Self::default();
        metadata.merge_namespace(namespace);
        metadata
    }

    /// Lay namespace fields over this result.
    pub fn merge_namespace(&mut self, namespace: &NamespaceMetadata) {
        self.namespace_id = Some(namespace.namespace_id.clone());
        self.namespace_labels = namespace.namespace_labels.clone();
        self.namespace_annotations = namespace.namespace_annotations.clone();
    }

    /// Sentinel for records whose pod and namespace cannot be resolved.
    pub fn orphan(
        requested_namespace: impl Into<String>,
        orphaned_namespace_name: impl Into<String>,
        orphaned_namespace_id: impl Into<String>,
    ) -> Self {
        Self {
            orphaned_namespace: Some(requested_namespace.into()),
            namespace_name: Some(orphaned_namespace_name.into()),
            namespace_id: Some(orphaned_namespace_id.into()),
            ..Default::default()
        }
    }

    pub fn is_orphan(&self) -> bool {
        self.orphaned_namespace.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl From<PodMetadata> for Metadata {
    fn from(pod: PodMetadata) -> Self {
        Self {
            pod_id: Some(pod.pod_id),
            pod_name: pod.pod_name,
            pod_ip: pod.pod_ip,
            host: pod.host,
            master_url: pod.master_url,
            labels: pod.labels,
            annotations: pod.annotations,
            owner_refs: pod.owner_refs,
            containers: pod.containers,
            namespace_name: pod.namespace_name,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_pod_merged_with_namespace() {
        let mut pod = PodMetadata::stub("P");
        pod.labels.insert("a".to_string(), "b".to_string());
        let mut ns = NamespaceMetadata::stub("N");
        ns.namespace_labels.insert("c".to_string(), "d".to_string());
        ns.creation_timestamp = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());

        let mut merged = Metadata::from(pod);
        merged.merge_namespace(&ns);

        assert_eq!(
            serde_json::to_value(&merged).unwrap(),
            json!({
                "pod_id": "P",
                "labels": {"a": "b"},
                "namespace_id": "N",
                "namespace_labels": {"c": "d"}
            })
        );
    }

    #[test]
    fn test_orphan_sentinel_shape() {
        let orphan = Metadata::orphan("ns", ".orphaned", "orphaned");
        assert!(orphan.is_orphan());
        assert_eq!(
            serde_json::to_value(&orphan).unwrap(),
            json!({
                "orphaned_namespace": "ns",
                "namespace_name": ".orphaned",
                "namespace_id": "orphaned"
            })
        );
    }

    #[test]
    fn test_empty_metadata_serializes_to_empty_object() {
        let metadata = Metadata::default();
        assert!(metadata.is_empty());
        assert_eq!(serde_json::to_value(&metadata).unwrap(), json!({}));
    }

    #[test]
    fn test_identity_record_roundtrips_partial() {
        let record = IdentityRecord {
            pod_id: None,
            namespace_id: Some("N".to_string()),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({"namespace_id": "N"}));
        let back: IdentityRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_namespace_only_result() {
        let ns = NamespaceMetadata::stub("N");
        let metadata = Metadata::from_namespace(&ns);
        assert_eq!(serde_json::to_value(&metadata).unwrap(), json!({"namespace_id": "N"}));
    }
}
