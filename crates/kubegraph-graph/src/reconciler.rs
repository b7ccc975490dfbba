//! The index -> derive -> apply pipeline.
//!
//! Every observed change goes through [`Reconciler::reconcile`], which
//! updates the entity index, asks the relationship engine for the edge
//! diff, and commits the node change plus the diff to the graph store in a
//! single write.
//!
//! Reconciliations are serialized by a commit lock: per-kind event streams
//! call in from different tasks, and rule evaluation must always see an
//! index state no other reconciliation is half-way through changing.

use crate::edge::EdgeDiff;
use crate::engine::{ChangeKind, RelationshipEngine};
use crate::index::EntityIndex;
use crate::store::{GraphStore, GraphUpdate, NodeChange};
use kubegraph_core::{EntityKey, EntityProperties};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// One observed change to an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Upsert(EntityKey, EntityProperties),
    Remove(EntityKey),
}

impl Change {
    pub fn key(&self) -> &EntityKey {
        match self {
            Change::Upsert(key, _) | Change::Remove(key) => key,
        }
    }
}

/// What one reconciliation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Entity revision after the change; `None` for removals and skips.
    pub revision: Option<u64>,
    pub edges_added: usize,
    pub edges_removed: usize,
}

/// Owns the shared index and store and is the only path that mutates them.
#[derive(Debug)]
pub struct Reconciler {
    index: Arc<EntityIndex>,
    store: Arc<GraphStore>,
    engine: RelationshipEngine,
    commit_lock: Mutex<()>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self::with_parts(Arc::new(EntityIndex::new()), Arc::new(GraphStore::new()))
    }

    pub fn with_parts(index: Arc<EntityIndex>, store: Arc<GraphStore>) -> Self {
        Self {
            index,
            store,
            engine: RelationshipEngine::new(),
            commit_lock: Mutex::new(()),
        }
    }

    pub fn index(&self) -> &Arc<EntityIndex> {
        &self.index
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// Runs the full pipeline for one change.
    pub fn reconcile(&self, change: Change) -> ReconcileOutcome {
        let _guard = self.commit_lock.lock();

        match change {
            Change::Upsert(key, properties) => {
                if properties.kind() != key.kind {
                    warn!(
                        key = %key,
                        found = %properties.kind(),
                        "dropping change with mismatched properties"
                    );
                    return ReconcileOutcome::default();
                }

                let summary = properties.summary();
                let revision = self.index.upsert(key.clone(), properties);
                let edges =
                    self.engine
                        .derive(&key, ChangeKind::Upserted, &self.index, self.store.as_ref());

                let outcome = self.commit(
                    key,
                    NodeChange::Upsert {
                        properties: summary,
                        revision,
                    },
                    edges,
                );
                ReconcileOutcome {
                    revision: Some(revision),
                    ..outcome
                }
            }
            Change::Remove(key) => {
                if self.index.remove(&key).is_none() && !self.store.contains_node(&key) {
                    debug!(key = %key, "remove of unknown entity ignored");
                    return ReconcileOutcome::default();
                }
                let edges =
                    self.engine
                        .derive(&key, ChangeKind::Removed, &self.index, self.store.as_ref());
                self.commit(key, NodeChange::Remove, edges)
            }
        }
    }

    fn commit(&self, key: EntityKey, node: NodeChange, edges: EdgeDiff) -> ReconcileOutcome {
        let applied = self.store.apply(GraphUpdate {
            node: Some((key.clone(), node)),
            edges,
        });

        if applied.edges_added + applied.edges_removed + applied.edges_updated > 0 {
            debug!(
                key = %key,
                added = applied.edges_added,
                updated = applied.edges_updated,
                removed = applied.edges_removed,
                dropped = applied.edges_dropped,
                "committed graph update"
            );
        }

        ReconcileOutcome {
            revision: None,
            edges_added: applied.edges_added,
            edges_removed: applied.edges_removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{EdgeId, Relation};
    use kubegraph_core::{Labels, OwnerRef, PodProperties, ResourceKind, ServiceProperties};

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn pod_change(name: &str, app: &str, owner: Option<&str>) -> Change {
        Change::Upsert(
            EntityKey::new(ResourceKind::Pod, "default", name),
            EntityProperties::Pod(PodProperties {
                phase: Some("Running".into()),
                node_name: Some("n1".into()),
                labels: labels(&[("app", app)]),
                owners: owner
                    .map(|o| vec![OwnerRef::new("ReplicaSet", o).controller()])
                    .unwrap_or_default(),
            }),
        )
    }

    #[test]
    fn test_upsert_projects_node() {
        let reconciler = Reconciler::new();
        let outcome = reconciler.reconcile(pod_change("p1", "x", None));
        assert_eq!(outcome.revision, Some(1));

        let node = reconciler
            .store()
            .node(&EntityKey::new(ResourceKind::Pod, "default", "p1"))
            .unwrap();
        assert_eq!(node.revision, 1);
        assert_eq!(node.properties.get("status").map(String::as_str), Some("Running"));
    }

    #[test]
    fn test_owner_edges_carry_controller_flag() {
        let reconciler = Reconciler::new();
        reconciler.reconcile(Change::Upsert(
            EntityKey::new(ResourceKind::ReplicaSet, "default", "rs1"),
            EntityProperties::empty(ResourceKind::ReplicaSet),
        ));
        reconciler.reconcile(pod_change("p1", "x", Some("rs1")));

        let snapshot = reconciler.store().snapshot();
        assert_eq!(snapshot.relationships.len(), 1);
        let edge = &snapshot.relationships[0];
        assert_eq!(edge.relation, Relation::OwnedBy);
        assert_eq!(edge.properties.get("controller").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let reconciler = Reconciler::new();
        let outcome =
            reconciler.reconcile(Change::Remove(EntityKey::new(ResourceKind::Pod, "default", "x")));
        assert_eq!(outcome, ReconcileOutcome::default());
        assert!(reconciler.store().snapshot().is_empty());
    }

    #[test]
    fn test_mismatched_properties_are_dropped() {
        let reconciler = Reconciler::new();
        let key = EntityKey::new(ResourceKind::Pod, "default", "p1");
        reconciler.reconcile(Change::Upsert(
            key.clone(),
            EntityProperties::empty(ResourceKind::Service),
        ));
        assert!(!reconciler.index().contains(&key));
        assert!(!reconciler.store().contains_node(&key));
    }

    #[test]
    fn test_service_then_pod_relabel() {
        let reconciler = Reconciler::new();
        let svc = EntityKey::new(ResourceKind::Service, "default", "svc1");
        reconciler.reconcile(Change::Upsert(
            svc.clone(),
            EntityProperties::Service(ServiceProperties {
                selector: Some(labels(&[("app", "x")])),
                ..Default::default()
            }),
        ));
        reconciler.reconcile(pod_change("p1", "x", None));

        let targets = EdgeId::new(
            svc,
            EntityKey::new(ResourceKind::Pod, "default", "p1"),
            Relation::Targets,
        );
        assert!(reconciler.store().contains_edge(&targets));

        let outcome = reconciler.reconcile(pod_change("p1", "y", None));
        assert_eq!(outcome.revision, Some(2));
        assert_eq!(outcome.edges_removed, 1);
        assert!(!reconciler.store().contains_edge(&targets));
    }
}
