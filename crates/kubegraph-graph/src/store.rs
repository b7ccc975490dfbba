//! The graph store.
//!
//! `GraphStore` wraps a petgraph `StableDiGraph` and adds the indexes the
//! rest of the system needs: entity key to node index and edge identity to
//! edge index. Stable indices matter here because nodes come and go
//! constantly; a plain `DiGraph` would shuffle indices on every removal.
//!
//! The store records what it is told. It never decides which edges should
//! exist, with one exception: an edge whose endpoints are not both present
//! is dropped, and removing a node removes every edge touching it.

use crate::edge::{EdgeDiff, EdgeId, EdgeLookup, EdgeProperties, GraphEdge, Relation};
use crate::snapshot::Snapshot;
use kubegraph_core::{EntityKey, ResourceKind};
use parking_lot::RwLock;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Projection of a live entity into the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub key: EntityKey,
    pub properties: BTreeMap<String, String>,
    pub revision: u64,
}

/// Edge weight stored in petgraph. Endpoints live in the graph structure.
#[derive(Debug, Clone)]
struct EdgeWeight {
    relation: Relation,
    properties: EdgeProperties,
    revision: u64,
}

/// A change to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeChange {
    Upsert {
        properties: BTreeMap<String, String>,
        revision: u64,
    },
    Remove,
}

/// Everything one logical update changes, committed as a unit.
#[derive(Debug, Clone, Default)]
pub struct GraphUpdate {
    pub node: Option<(EntityKey, NodeChange)>,
    pub edges: EdgeDiff,
}

/// Counts of what an apply actually did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub edges_added: usize,
    pub edges_updated: usize,
    pub edges_removed: usize,
    /// Additions skipped because an endpoint is not a node.
    pub edges_dropped: usize,
}

/// Graph statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub nodes_by_kind: BTreeMap<ResourceKind, usize>,
    pub edges_by_relation: BTreeMap<Relation, usize>,
}

#[derive(Debug, Default)]
struct GraphState {
    graph: StableDiGraph<GraphNode, EdgeWeight>,
    nodes: HashMap<EntityKey, NodeIndex>,
    edges: HashMap<EdgeId, EdgeIndex>,
}

impl GraphState {
    fn upsert_node(&mut self, key: EntityKey, properties: BTreeMap<String, String>, revision: u64) {
        match self.nodes.get(&key) {
            Some(&index) => {
                if let Some(node) = self.graph.node_weight_mut(index) {
                    node.properties = properties;
                    node.revision = revision;
                }
            }
            None => {
                let index = self.graph.add_node(GraphNode {
                    key: key.clone(),
                    properties,
                    revision,
                });
                self.nodes.insert(key, index);
            }
        }
    }

    /// Removes a node and every incident edge. Returns the number of edges
    /// removed with it.
    fn remove_node(&mut self, key: &EntityKey) -> usize {
        let Some(index) = self.nodes.remove(key) else {
            return 0;
        };

        let incident = self.incident_ids(index);
        for id in &incident {
            self.edges.remove(id);
        }

        // StableGraph drops the incident edges along with the node.
        self.graph.remove_node(index);
        incident.len()
    }

    fn edge_id(&self, edge: EdgeIndex) -> Option<EdgeId> {
        let (source, target) = self.graph.edge_endpoints(edge)?;
        let weight = self.graph.edge_weight(edge)?;
        Some(EdgeId::new(
            self.graph.node_weight(source)?.key.clone(),
            self.graph.node_weight(target)?.key.clone(),
            weight.relation,
        ))
    }

    fn incident_ids(&self, index: NodeIndex) -> Vec<EdgeId> {
        let mut ids: Vec<EdgeId> = [Direction::Outgoing, Direction::Incoming]
            .into_iter()
            .flat_map(|dir| self.graph.edges_directed(index, dir))
            .filter_map(|edge| self.edge_id(edge.id()))
            .collect();
        // A self-loop shows up in both directions.
        ids.sort();
        ids.dedup();
        ids
    }

    fn directed_ids(&self, key: &EntityKey, relation: Relation, dir: Direction) -> Vec<EdgeId> {
        let Some(&index) = self.nodes.get(key) else {
            return Vec::new();
        };
        let mut ids: Vec<EdgeId> = self
            .graph
            .edges_directed(index, dir)
            .filter(|edge| edge.weight().relation == relation)
            .filter_map(|edge| self.edge_id(edge.id()))
            .collect();
        ids.sort();
        ids
    }

    fn apply_edges(&mut self, diff: EdgeDiff, outcome: &mut ApplyOutcome) {
        for id in diff.remove {
            if let Some(index) = self.edges.remove(&id) {
                self.graph.remove_edge(index);
                outcome.edges_removed += 1;
            }
        }

        for (id, properties) in diff.add {
            if let Some(&index) = self.edges.get(&id) {
                if let Some(weight) = self.graph.edge_weight_mut(index) {
                    if weight.properties != properties {
                        weight.properties = properties;
                        weight.revision += 1;
                        outcome.edges_updated += 1;
                    }
                }
                continue;
            }

            let (Some(&source), Some(&target)) = (self.nodes.get(&id.source), self.nodes.get(&id.target))
            else {
                debug!(edge = %id, "endpoint not in graph, dropping edge");
                outcome.edges_dropped += 1;
                continue;
            };

            let index = self.graph.add_edge(
                source,
                target,
                EdgeWeight {
                    relation: id.relation,
                    properties,
                    revision: 1,
                },
            );
            self.edges.insert(id, index);
            outcome.edges_added += 1;
        }
    }

    fn apply(&mut self, update: GraphUpdate) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        match update.node {
            Some((key, NodeChange::Upsert { properties, revision })) => {
                self.upsert_node(key, properties, revision);
            }
            Some((key, NodeChange::Remove)) => {
                outcome.edges_removed += self.remove_node(&key);
            }
            None => {}
        }

        self.apply_edges(update.edges, &mut outcome);
        outcome
    }
}

/// Concurrent, authoritative graph of live entities and derived edges.
///
/// Every mutation takes the write lock for its whole duration, so a
/// snapshot never observes half of an update.
#[derive(Debug, Default)]
pub struct GraphStore {
    state: RwLock<GraphState>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts, updates (`Some`) or removes (`None`) a node.
    ///
    /// Removal cascades to every edge touching the node.
    pub fn apply_node(&self, key: EntityKey, change: Option<(BTreeMap<String, String>, u64)>) {
        let change = match change {
            Some((properties, revision)) => NodeChange::Upsert {
                properties,
                revision,
            },
            None => NodeChange::Remove,
        };
        self.apply(GraphUpdate {
            node: Some((key, change)),
            edges: EdgeDiff::new(),
        });
    }

    /// Applies an edge diff atomically. Removals go first.
    pub fn apply_edge_diff(&self, diff: EdgeDiff) -> ApplyOutcome {
        self.apply(GraphUpdate {
            node: None,
            edges: diff,
        })
    }

    /// Applies a node change and an edge diff under one write lock.
    pub fn apply(&self, update: GraphUpdate) -> ApplyOutcome {
        self.state.write().apply(update)
    }

    /// Consistent point-in-time copy, ordered by key and edge identity.
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.read();

        let mut nodes: Vec<GraphNode> = state
            .graph
            .node_indices()
            .filter_map(|index| state.graph.node_weight(index).cloned())
            .collect();
        nodes.sort_by(|a, b| a.key.cmp(&b.key));

        let mut relationships: Vec<GraphEdge> = state
            .graph
            .edge_indices()
            .filter_map(|index| {
                let id = state.edge_id(index)?;
                let weight = state.graph.edge_weight(index)?;
                Some(GraphEdge {
                    source: id.source,
                    target: id.target,
                    relation: id.relation,
                    properties: weight.properties.clone(),
                    revision: weight.revision,
                })
            })
            .collect();
        relationships.sort_by(|a, b| a.id().cmp(&b.id()));

        Snapshot {
            nodes,
            relationships,
        }
    }

    pub fn node(&self, key: &EntityKey) -> Option<GraphNode> {
        let state = self.state.read();
        let index = state.nodes.get(key)?;
        state.graph.node_weight(*index).cloned()
    }

    pub fn contains_node(&self, key: &EntityKey) -> bool {
        self.state.read().nodes.contains_key(key)
    }

    pub fn contains_edge(&self, id: &EdgeId) -> bool {
        self.state.read().edges.contains_key(id)
    }

    pub fn node_count(&self) -> usize {
        self.state.read().graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.state.read().graph.edge_count()
    }

    pub fn stats(&self) -> GraphStats {
        let state = self.state.read();
        let mut stats = GraphStats {
            node_count: state.graph.node_count(),
            edge_count: state.graph.edge_count(),
            ..Default::default()
        };
        for node in state.graph.node_indices().filter_map(|i| state.graph.node_weight(i)) {
            *stats.nodes_by_kind.entry(node.key.kind).or_default() += 1;
        }
        for edge in state.graph.edge_indices().filter_map(|i| state.graph.edge_weight(i)) {
            *stats.edges_by_relation.entry(edge.relation).or_default() += 1;
        }
        stats
    }
}

impl EdgeLookup for GraphStore {
    fn outgoing(&self, source: &EntityKey, relation: Relation) -> Vec<EdgeId> {
        self.state
            .read()
            .directed_ids(source, relation, Direction::Outgoing)
    }

    fn incoming(&self, target: &EntityKey, relation: Relation) -> Vec<EdgeId> {
        self.state
            .read()
            .directed_ids(target, relation, Direction::Incoming)
    }

    fn incident(&self, key: &EntityKey) -> Vec<EdgeId> {
        let state = self.state.read();
        match state.nodes.get(key) {
            Some(&index) => state.incident_ids(index),
            None => Vec::new(),
        }
    }
}
