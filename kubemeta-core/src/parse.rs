//! Shared parse helpers turning raw API objects into cached metadata.
//!
//! Used by the resolver's fetch path and by both reconciliation loops, so a
//! pod looks the same whether it arrived via get, list or watch.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::ParseOptions;
use crate::error::ApiError;
use crate::metadata::{ContainerMetadata, NamespaceMetadata, OwnerReference, PodMetadata};
use crate::object::{NamespaceObject, ObjectMeta, PodObject};

fn runtime_prefix() -> Option<&'static Regex> {
    static PREFIX: OnceLock<Option<Regex>> = OnceLock::new();
    PREFIX
        .get_or_init(|| Regex::new(r"^[-_a-zA-Z0-9]+://").ok())
        .as_ref()
}

/// Strip the runtime scheme from a container id (`containerd://abc` -> `abc`).
pub fn strip_runtime_prefix(container_id: &str) -> &str {
    match runtime_prefix().and_then(|re| re.find(container_id)) {
        Some(m) => &container_id[m.end()..],
        None => container_id,
    }
}

/// Cache key used by the simple strategy.
pub fn simple_pod_key(namespace_name: &str, pod_name: &str) -> String {
    format!("{}_{}", namespace_name, pod_name)
}

fn require_uid(meta: &ObjectMeta, kind: &str) -> Result<String, ApiError> {
    meta.uid.clone().ok_or_else(|| {
        ApiError::invalid_payload(format!(
            "{} {} has no metadata.uid",
            kind,
            meta.name.as_deref().unwrap_or("<unnamed>")
        ))
    })
}

fn copy_labels(meta: &ObjectMeta, options: &ParseOptions) -> BTreeMap<String, String> {
    if options.skip_labels {
        BTreeMap::new()
    } else {
        meta.labels.clone()
    }
}

fn match_annotations(meta: &ObjectMeta, options: &ParseOptions) -> BTreeMap<String, String> {
    meta.annotations
        .iter()
        .filter(|(key, _)| options.annotation_matches(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Parse a pod object.
pub fn parse_pod_metadata(pod: &PodObject, options: &ParseOptions) -> Result<PodMetadata, ApiError> {
    let meta = &pod.metadata;
    let pod_id = require_uid(meta, "pod")?;

    let mut containers = BTreeMap::new();
    if let Some(status) = &pod.status {
        for container in &status.container_statuses {
            let key = container
                .container_id
                .as_deref()
                .map(strip_runtime_prefix)
                .unwrap_or(container.name.as_str())
                .to_string();
            let entry = if options.skip_container_metadata {
                ContainerMetadata {
                    name: container.name.clone(),
                    ..Default::default()
                }
            } else {
                ContainerMetadata {
                    name: container.name.clone(),
                    image: container.image.clone(),
                    image_id: container.image_id.clone(),
                    container_runtime_id: container.container_id.clone(),
                }
            };
            containers.insert(key, entry);
        }
    }

    let owner_refs = meta
        .owner_references
        .iter()
        .filter_map(|owner| {
            Some(OwnerReference {
                kind: owner.kind.clone()?,
                name: owner.name.clone()?,
                uid: owner.uid.clone(),
                controller: owner.controller,
            })
        })
        .collect();

    Ok(PodMetadata {
        pod_id,
        namespace_name: meta.namespace.clone(),
        pod_name: meta.name.clone(),
        pod_ip: pod.status.as_ref().and_then(|s| s.pod_ip.clone()),
        host: pod.node_name().map(str::to_string),
        master_url: options.master_url.clone(),
        labels: copy_labels(meta, options),
        annotations: match_annotations(meta, options),
        owner_refs,
        containers,
    })
}

/// Parse a namespace object.
pub fn parse_namespace_metadata(
    namespace: &NamespaceObject,
    options: &ParseOptions,
) -> Result<NamespaceMetadata, ApiError> {
    let meta = &namespace.metadata;
    Ok(NamespaceMetadata {
        namespace_id: require_uid(meta, "namespace")?,
        namespace_labels: copy_labels(meta, options),
        namespace_annotations: match_annotations(meta, options),
        creation_timestamp: meta.creation_timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ContainerStatus, OwnerReferenceObject, PodSpec, PodStatus};

    fn sample_pod() -> PodObject {
        let mut metadata = ObjectMeta {
            name: Some("web-0".to_string()),
            namespace: Some("default".to_string()),
            uid: Some("pod-uid".to_string()),
            ..Default::default()
        };
        metadata.labels.insert("app".to_string(), "web".to_string());
        metadata
            .annotations
            .insert("team.owner".to_string(), "infra".to_string());
        metadata
            .annotations
            .insert("kubectl.kubernetes.io/last-applied".to_string(), "{}".to_string());
        metadata.owner_references.push(OwnerReferenceObject {
            kind: Some("ReplicaSet".to_string()),
            name: Some("web-abc".to_string()),
            uid: Some("rs-uid".to_string()),
            controller: Some(true),
            ..Default::default()
        });

        PodObject {
            metadata,
            spec: Some(PodSpec {
                node_name: Some("node-a".to_string()),
            }),
            status: Some(PodStatus {
                pod_ip: Some("10.0.0.7".to_string()),
                container_statuses: vec![
                    ContainerStatus {
                        name: "web".to_string(),
                        image: Some("nginx:1.27".to_string()),
                        image_id: Some("docker-pullable://nginx@sha256:abc".to_string()),
                        container_id: Some("docker://49095a28".to_string()),
                    },
                    ContainerStatus {
                        name: "init".to_string(),
                        ..Default::default()
                    },
                ],
            }),
        }
    }

    fn options() -> ParseOptions {
        ParseOptions {
            master_url: Some("https://kube.local".to_string()),
            annotation_match: vec![Regex::new(r"^team\.").unwrap()],
            ..Default::default()
        }
    }

    #[test]
    fn test_strip_runtime_prefix() {
        assert_eq!(strip_runtime_prefix("docker://abc"), "abc");
        assert_eq!(strip_runtime_prefix("cri-o://abc"), "abc");
        assert_eq!(strip_runtime_prefix("abc"), "abc");
    }

    #[test]
    fn test_parse_pod_metadata() {
        let parsed = parse_pod_metadata(&sample_pod(), &options()).unwrap();

        assert_eq!(parsed.pod_id, "pod-uid");
        assert_eq!(parsed.namespace_name.as_deref(), Some("default"));
        assert_eq!(parsed.host.as_deref(), Some("node-a"));
        assert_eq!(parsed.pod_ip.as_deref(), Some("10.0.0.7"));
        assert_eq!(parsed.master_url.as_deref(), Some("https://kube.local"));
        assert_eq!(parsed.labels.get("app").map(String::as_str), Some("web"));
        assert_eq!(parsed.annotations.len(), 1);
        assert!(parsed.annotations.contains_key("team.owner"));
        assert_eq!(parsed.owner_refs[0].kind, "ReplicaSet");

        let web = &parsed.containers["49095a28"];
        assert_eq!(web.name, "web");
        assert_eq!(web.image.as_deref(), Some("nginx:1.27"));
        assert_eq!(web.container_runtime_id.as_deref(), Some("docker://49095a28"));
        assert_eq!(parsed.containers["init"].name, "init");
    }

    #[test]
    fn test_parse_pod_respects_skip_flags() {
        let options = ParseOptions {
            skip_labels: true,
            skip_container_metadata: true,
            ..Default::default()
        };
        let parsed = parse_pod_metadata(&sample_pod(), &options).unwrap();
        assert!(parsed.labels.is_empty());
        assert!(parsed.annotations.is_empty());
        assert_eq!(parsed.master_url, None);
        let web = &parsed.containers["49095a28"];
        assert_eq!(web.image, None);
        assert_eq!(web.container_runtime_id, None);
    }

    #[test]
    fn test_parse_pod_without_uid_is_invalid() {
        let mut pod = sample_pod();
        pod.metadata.uid = None;
        let err = parse_pod_metadata(&pod, &options()).unwrap_err();
        assert!(matches!(err, ApiError::InvalidPayload { .. }));
    }

    #[test]
    fn test_parse_namespace_keeps_creation_timestamp() {
        let ns = NamespaceObject {
            metadata: ObjectMeta {
                name: Some("kube-system".to_string()),
                uid: Some("ns-uid".to_string()),
                creation_timestamp: "2024-03-01T12:00:00Z".parse().ok(),
                ..Default::default()
            },
        };
        let parsed = parse_namespace_metadata(&ns, &options()).unwrap();
        assert_eq!(parsed.namespace_id, "ns-uid");
        assert!(parsed.creation_timestamp.is_some());
    }

    #[test]
    fn test_simple_pod_key() {
        assert_eq!(simple_pod_key("default", "web-0"), "default_web-0");
    }

    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_strip_runtime_prefix_recovers_id(
                scheme in "[a-z][-_a-z0-9]{0,10}",
                id in "[0-9a-f]{1,64}",
            ) {
                let full = format!("{}://{}", scheme, id);
                prop_assert_eq!(strip_runtime_prefix(&full), id.as_str());
            }

            #[test]
            fn prop_plain_ids_pass_through(id in "[0-9a-f]{1,64}") {
                prop_assert_eq!(strip_runtime_prefix(&id), id.as_str());
            }
        }
    }
}
