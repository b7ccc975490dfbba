//! Decoding of raw cluster objects.
//!
//! Objects arrive in the usual Kubernetes JSON shape (`metadata`, `spec`,
//! `status`). This is the only place that looks at untyped fields; a field
//! that is missing or has the wrong shape becomes `None` (or an empty
//! collection) rather than an error.

use crate::error::{DecodeError, Result};
use crate::key::{EntityKey, ResourceKind};
use crate::properties::{
    ConfigMapProperties, DeploymentProperties, EntityProperties, Labels, NodeProperties, OwnerRef,
    PodProperties, ReplicaSetProperties, ServiceProperties,
};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

/// Decodes a raw object of the given kind into its key and properties.
pub fn decode_object(kind: ResourceKind, object: &Value) -> Result<(EntityKey, EntityProperties)> {
    if !object.is_object() {
        return Err(DecodeError::NotAnObject { kind });
    }

    if let Some(declared) = object.get("kind").and_then(Value::as_str) {
        if declared != kind.as_str() {
            return Err(DecodeError::KindMismatch {
                expected: kind,
                found: declared.to_string(),
            });
        }
    }

    let metadata = object.get("metadata");
    let name = metadata
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .ok_or(DecodeError::MissingName { kind })?;
    let namespace = metadata
        .and_then(|m| m.get("namespace"))
        .and_then(Value::as_str)
        .unwrap_or("default");

    let key = EntityKey::new(kind, namespace, name);
    let labels = string_map(metadata.and_then(|m| m.get("labels")));
    let spec = object.get("spec");

    let properties = match kind {
        ResourceKind::Pod => EntityProperties::Pod(PodProperties {
            phase: str_at(object, &["status", "phase"]),
            node_name: spec
                .and_then(|s| s.get("nodeName"))
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .map(String::from),
            labels,
            owners: owner_refs(metadata),
        }),
        ResourceKind::ReplicaSet => EntityProperties::ReplicaSet(ReplicaSetProperties {
            labels,
            owners: owner_refs(metadata),
            replicas: spec.and_then(|s| s.get("replicas")).and_then(Value::as_i64),
        }),
        ResourceKind::Deployment => EntityProperties::Deployment(DeploymentProperties {
            labels,
            replicas: spec.and_then(|s| s.get("replicas")).and_then(Value::as_i64),
            config_maps: volume_config_maps(spec),
        }),
        ResourceKind::Node => EntityProperties::Node(NodeProperties {
            labels,
            ready: node_ready(object),
        }),
        ResourceKind::Service => EntityProperties::Service(ServiceProperties {
            labels,
            selector: spec
                .and_then(|s| s.get("selector"))
                .filter(|s| s.is_object())
                .map(|s| string_map(Some(s))),
            service_type: str_at(object, &["spec", "type"]),
            cluster_ip: str_at(object, &["spec", "clusterIP"]),
        }),
        ResourceKind::ConfigMap => EntityProperties::ConfigMap(ConfigMapProperties {
            labels,
            data_keys: object
                .get("data")
                .and_then(Value::as_object)
                .map(|data| data.keys().cloned().collect())
                .unwrap_or_default(),
        }),
    };

    Ok((key, properties))
}

fn str_at(object: &Value, path: &[&str]) -> Option<String> {
    path.iter()
        .try_fold(object, |value, segment| value.get(*segment))
        .and_then(Value::as_str)
        .map(String::from)
}

/// Reads a string-to-string map, skipping entries whose value is not a string.
fn string_map(value: Option<&Value>) -> Labels {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn owner_refs(metadata: Option<&Value>) -> Vec<OwnerRef> {
    let Some(refs) = metadata
        .and_then(|m| m.get("ownerReferences"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    refs.iter()
        .filter_map(|owner| {
            let kind = owner.get("kind").and_then(Value::as_str)?;
            let name = owner.get("name").and_then(Value::as_str)?;
            Some(OwnerRef {
                kind: kind.to_string(),
                name: name.to_string(),
                controller: owner
                    .get("controller")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })
        })
        .collect()
}

/// Collects ConfigMap names from the pod template's volumes, including
/// projected volume sources.
fn volume_config_maps(spec: Option<&Value>) -> Vec<String> {
    let Some(volumes) = spec
        .and_then(|s| s.pointer("/template/spec/volumes"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut names = BTreeSet::new();
    for volume in volumes {
        if let Some(name) = volume.pointer("/configMap/name").and_then(Value::as_str) {
            names.insert(name.to_string());
        }

        let projected = volume
            .pointer("/projected/sources")
            .and_then(Value::as_array)
            .into_iter()
            .flatten();
        for source in projected {
            if let Some(name) = source.pointer("/configMap/name").and_then(Value::as_str) {
                names.insert(name.to_string());
            }
        }
    }

    debug!(count = names.len(), "collected configmap volume references");
    names.into_iter().collect()
}

fn node_ready(object: &Value) -> Option<bool> {
    object
        .pointer("/status/conditions")
        .and_then(Value::as_array)?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some("Ready"))
        .and_then(|c| c.get("status").and_then(Value::as_str))
        .map(|status| status == "True")
}
