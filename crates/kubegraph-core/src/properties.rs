//! Typed entity properties.
//!
//! Each tracked kind keeps only the fields the relationship rules (and the
//! node property bag) consume. Optional fields are `Option`s: an object that
//! lacks a field, or carries it in an unexpected shape, simply has `None`.

use crate::key::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label (or selector) map. Ordered so equality and hashing of
/// properties are deterministic.
pub type Labels = BTreeMap<String, String>;

/// A back-pointer to the controlling entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    /// Kind as declared by the owner reference, e.g. `"ReplicaSet"`.
    pub kind: String,
    pub name: String,
    /// Whether the reference is flagged as the managing controller.
    #[serde(default)]
    pub controller: bool,
}

impl OwnerRef {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            controller: false,
        }
    }

    pub fn controller(mut self) -> Self {
        self.controller = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodProperties {
    pub phase: Option<String>,
    /// Node assignment (`spec.nodeName`).
    pub node_name: Option<String>,
    pub labels: Labels,
    pub owners: Vec<OwnerRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSetProperties {
    pub labels: Labels,
    pub owners: Vec<OwnerRef>,
    pub replicas: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentProperties {
    pub labels: Labels,
    pub replicas: Option<i64>,
    /// Names of ConfigMaps referenced by the pod template's volumes.
    /// Sorted and de-duplicated.
    pub config_maps: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProperties {
    pub labels: Labels,
    pub ready: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceProperties {
    pub labels: Labels,
    /// `None` when the Service declares no selector at all.
    pub selector: Option<Labels>,
    pub service_type: Option<String>,
    pub cluster_ip: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMapProperties {
    pub labels: Labels,
    pub data_keys: Vec<String>,
}

/// Kind-specific properties of a tracked entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EntityProperties {
    Pod(PodProperties),
    ReplicaSet(ReplicaSetProperties),
    Deployment(DeploymentProperties),
    Node(NodeProperties),
    Service(ServiceProperties),
    ConfigMap(ConfigMapProperties),
}

impl EntityProperties {
    /// Empty properties of the given kind.
    pub fn empty(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Pod => Self::Pod(PodProperties::default()),
            ResourceKind::ReplicaSet => Self::ReplicaSet(ReplicaSetProperties::default()),
            ResourceKind::Deployment => Self::Deployment(DeploymentProperties::default()),
            ResourceKind::Node => Self::Node(NodeProperties::default()),
            ResourceKind::Service => Self::Service(ServiceProperties::default()),
            ResourceKind::ConfigMap => Self::ConfigMap(ConfigMapProperties::default()),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Pod(_) => ResourceKind::Pod,
            Self::ReplicaSet(_) => ResourceKind::ReplicaSet,
            Self::Deployment(_) => ResourceKind::Deployment,
            Self::Node(_) => ResourceKind::Node,
            Self::Service(_) => ResourceKind::Service,
            Self::ConfigMap(_) => ResourceKind::ConfigMap,
        }
    }

    pub fn labels(&self) -> &Labels {
        match self {
            Self::Pod(p) => &p.labels,
            Self::ReplicaSet(p) => &p.labels,
            Self::Deployment(p) => &p.labels,
            Self::Node(p) => &p.labels,
            Self::Service(p) => &p.labels,
            Self::ConfigMap(p) => &p.labels,
        }
    }

    /// The small string property bag shown on the graph node.
    pub fn summary(&self) -> BTreeMap<String, String> {
        let mut bag = BTreeMap::new();
        match self {
            Self::Pod(p) => {
                if let Some(phase) = &p.phase {
                    bag.insert("status".to_string(), phase.clone());
                }
            }
            Self::ReplicaSet(p) => {
                if let Some(replicas) = p.replicas {
                    bag.insert("replicas".to_string(), replicas.to_string());
                }
            }
            Self::Deployment(p) => {
                if let Some(replicas) = p.replicas {
                    bag.insert("replicas".to_string(), replicas.to_string());
                }
            }
            Self::Node(p) => {
                if let Some(ready) = p.ready {
                    let status = if ready { "Ready" } else { "NotReady" };
                    bag.insert("status".to_string(), status.to_string());
                }
            }
            Self::Service(p) => {
                if let Some(service_type) = &p.service_type {
                    bag.insert("type".to_string(), service_type.clone());
                }
                if let Some(ip) = &p.cluster_ip {
                    bag.insert("clusterIP".to_string(), ip.clone());
                }
            }
            Self::ConfigMap(p) => {
                bag.insert("keys".to_string(), p.data_keys.len().to_string());
            }
        }
        bag
    }
}
