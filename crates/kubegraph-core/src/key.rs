//! Entity identity.
//!
//! An [`EntityKey`] is the only thing that decides whether two observations
//! refer to the same resource. Its ordering is (kind, namespace, name),
//! which is what makes snapshots come out in a stable order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The resource kinds Kubegraph tracks.
///
/// Variant order is the kind component of [`EntityKey`]'s total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Pod,
    ReplicaSet,
    Deployment,
    Node,
    Service,
    ConfigMap,
}

impl ResourceKind {
    /// Every tracked kind, in key order.
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Pod,
        ResourceKind::ReplicaSet,
        ResourceKind::Deployment,
        ResourceKind::Node,
        ResourceKind::Service,
        ResourceKind::ConfigMap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "Pod",
            ResourceKind::ReplicaSet => "ReplicaSet",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::Node => "Node",
            ResourceKind::Service => "Service",
            ResourceKind::ConfigMap => "ConfigMap",
        }
    }

    /// Lowercase plural, as used for manifest directory names.
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "pods",
            ResourceKind::ReplicaSet => "replicasets",
            ResourceKind::Deployment => "deployments",
            ResourceKind::Node => "nodes",
            ResourceKind::Service => "services",
            ResourceKind::ConfigMap => "configmaps",
        }
    }

    /// Nodes are cluster-scoped; everything else lives in a namespace.
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, ResourceKind::Node)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(&lower) || kind.plural() == lower)
            .ok_or_else(|| format!("unknown resource kind: {}", s))
    }
}

/// Identifies a tracked entity.
///
/// Field order matters: the derived `Ord` compares kind, then namespace,
/// then name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl EntityKey {
    /// Creates a key. Cluster-scoped kinds always get an empty namespace.
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = if kind.is_namespaced() {
            namespace.into()
        } else {
            String::new()
        };
        Self {
            kind,
            namespace,
            name: name.into(),
        }
    }

    /// Creates a key for a cluster-scoped entity.
    pub fn cluster(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::new(kind, "", name)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}
