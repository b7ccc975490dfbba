//! Edge types for the relationship graph.
//!
//! Edges are derived, never authored: every edge can be recomputed from the
//! current entity state. An edge is identified by (source, target,
//! relation); at most one edge per identity exists at a time.

use kubegraph_core::EntityKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The type of relationship between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// Pod is scheduled on a Node.
    RunsOn,

    /// Pod is controlled by a ReplicaSet, or ReplicaSet by a Deployment.
    OwnedBy,

    /// Service selects a Pod.
    Targets,

    /// Deployment mounts a ConfigMap.
    Uses,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunsOn => "runs_on",
            Self::OwnedBy => "owned_by",
            Self::Targets => "targets",
            Self::Uses => "uses",
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Edge properties. Ordered for deterministic output.
pub type EdgeProperties = BTreeMap<String, String>;

/// Identity of an edge.
///
/// Ordering follows source, then target, then relation, which is the order
/// edges appear in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId {
    pub source: EntityKey,
    pub target: EntityKey,
    pub relation: Relation,
}

impl EdgeId {
    pub fn new(source: EntityKey, target: EntityKey, relation: Relation) -> Self {
        Self {
            source,
            target,
            relation,
        }
    }

    /// True if `key` is either endpoint.
    pub fn touches(&self, key: &EntityKey) -> bool {
        &self.source == key || &self.target == key
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -[{}]-> {}", self.source, self.relation, self.target)
    }
}

/// An edge as recorded in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: EntityKey,
    pub target: EntityKey,
    #[serde(rename = "relationshipType")]
    pub relation: Relation,
    pub properties: EdgeProperties,
    pub revision: u64,
}

impl GraphEdge {
    pub fn id(&self) -> EdgeId {
        EdgeId::new(self.source.clone(), self.target.clone(), self.relation)
    }
}

/// Output of rule evaluation: edges to add (or refresh) and edges to retract.
///
/// Both halves are applied together, so a reader never observes only one of
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeDiff {
    pub add: BTreeMap<EdgeId, EdgeProperties>,
    pub remove: BTreeSet<EdgeId>,
}

impl EdgeDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: EdgeId, properties: EdgeProperties) {
        self.remove.remove(&id);
        self.add.insert(id, properties);
    }

    pub fn remove(&mut self, id: EdgeId) {
        if !self.add.contains_key(&id) {
            self.remove.insert(id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Read-only view of the edges currently recorded.
///
/// The relationship rules use this to find edges they previously produced
/// and may now need to retract.
pub trait EdgeLookup {
    /// Edges of `relation` leaving `source`.
    fn outgoing(&self, source: &EntityKey, relation: Relation) -> Vec<EdgeId>;

    /// Edges of `relation` entering `target`.
    fn incoming(&self, target: &EntityKey, relation: Relation) -> Vec<EdgeId>;

    /// Every edge with `key` as an endpoint.
    fn incident(&self, key: &EntityKey) -> Vec<EdgeId>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubegraph_core::ResourceKind;

    fn id(relation: Relation) -> EdgeId {
        EdgeId::new(
            EntityKey::new(ResourceKind::Pod, "default", "p1"),
            EntityKey::cluster(ResourceKind::Node, "n1"),
            relation,
        )
    }

    #[test]
    fn test_relation_serializes_snake_case() {
        let json = serde_json::to_string(&Relation::RunsOn).unwrap();
        assert_eq!(json, "\"runs_on\"");
        assert_eq!(Relation::OwnedBy.to_string(), "owned_by");
    }

    #[test]
    fn test_diff_add_cancels_remove() {
        let mut diff = EdgeDiff::new();
        diff.remove(id(Relation::RunsOn));
        diff.add(id(Relation::RunsOn), EdgeProperties::new());

        assert!(diff.remove.is_empty());
        assert_eq!(diff.add.len(), 1);

        // A removal after the add does not undo the add.
        diff.remove(id(Relation::RunsOn));
        assert!(diff.remove.is_empty());
    }

    #[test]
    fn test_edge_serializes_relationship_type() {
        let edge = GraphEdge {
            source: EntityKey::new(ResourceKind::Pod, "default", "p1"),
            target: EntityKey::cluster(ResourceKind::Node, "n1"),
            relation: Relation::RunsOn,
            properties: EdgeProperties::new(),
            revision: 1,
        };
        let json = serde_json::to_value(&edge).unwrap();
        assert_eq!(json["relationshipType"], "runs_on");
        assert_eq!(json["target"]["type"], "Node");
    }
}
