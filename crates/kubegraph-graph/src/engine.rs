//! Relationship rules.
//!
//! Given a changed entity, the engine works out which edges involving it
//! must exist now and which recorded ones must go. Each rule owns a
//! *scope*: the outgoing edges of one relation from a source, or the
//! incoming edges of one relation into a target. For every scope the engine
//! computes the desired edge set from the index and diffs it against what
//! the store currently records, so a changed field retracts the old edge in
//! the same diff that adds the new one.
//!
//! Rules:
//!
//! | changed kind | relation   | direction                                   |
//! |--------------|------------|---------------------------------------------|
//! | Pod          | `runs_on`  | Pod -> Node named by `spec.nodeName`        |
//! | Pod          | `owned_by` | Pod -> controlling ReplicaSet               |
//! | ReplicaSet   | `owned_by` | ReplicaSet -> controlling Deployment        |
//! | Service      | `targets`  | Service -> every Pod matching its selector  |
//! | Deployment   | `uses`     | Deployment -> each ConfigMap volume         |
//!
//! A Pod upsert also re-checks every Service's selector in its namespace,
//! and any upsert re-derives the single-valued edges of entities that
//! already reference the changed key.

use crate::edge::{EdgeDiff, EdgeId, EdgeLookup, EdgeProperties, Relation};
use crate::index::{selector_matches_labels, EntityIndex};
use kubegraph_core::{EntityKey, EntityProperties, OwnerRef, ResourceKind};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// What happened to the changed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Upserted,
    Removed,
}

/// Relations derived from references held by the source entity itself.
const REFERENCE_RELATIONS: [Relation; 3] = [Relation::RunsOn, Relation::OwnedBy, Relation::Uses];

/// The fixed rule set.
///
/// Evaluation is a pure function of the changed key, the change kind, the
/// index and the recorded edges: replaying an event against the same state
/// yields the same diff.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationshipEngine;

impl RelationshipEngine {
    pub fn new() -> Self {
        Self
    }

    /// Computes the edge diff caused by a change to `key`.
    pub fn derive(
        &self,
        key: &EntityKey,
        change: ChangeKind,
        index: &EntityIndex,
        edges: &dyn EdgeLookup,
    ) -> EdgeDiff {
        let mut diff = EdgeDiff::new();

        let record = match change {
            ChangeKind::Upserted => index.get(key),
            ChangeKind::Removed => None,
        };

        let Some(record) = record else {
            // Removed, or never indexed: nothing may touch this key.
            for id in edges.incident(key) {
                diff.remove(id);
            }
            return diff;
        };

        if record.properties.kind() != key.kind {
            warn!(
                key = %key,
                found = %record.properties.kind(),
                "properties do not match entity kind, skipping rules"
            );
            return diff;
        }

        self.derive_outgoing(key, &record.properties, edges, &mut diff);
        self.derive_selector(key, &record.properties, index, edges, &mut diff);
        self.derive_incoming(key, index, edges, &mut diff);

        debug!(
            key = %key,
            add = diff.add.len(),
            remove = diff.remove.len(),
            "derived edge diff"
        );
        diff
    }

    /// Single-valued edges the entity declares itself.
    fn derive_outgoing(
        &self,
        key: &EntityKey,
        properties: &EntityProperties,
        edges: &dyn EdgeLookup,
        diff: &mut EdgeDiff,
    ) {
        let desired = outgoing_edges(key, properties);
        for relation in REFERENCE_RELATIONS {
            let scoped = desired
                .iter()
                .filter(|(id, _)| id.relation == relation)
                .map(|(id, props)| (id.clone(), props.clone()))
                .collect();
            replace_scope(diff, edges.outgoing(key, relation), scoped);
        }
    }

    /// `targets` edges, from either side of the selector.
    fn derive_selector(
        &self,
        key: &EntityKey,
        properties: &EntityProperties,
        index: &EntityIndex,
        edges: &dyn EdgeLookup,
        diff: &mut EdgeDiff,
    ) {
        match properties {
            EntityProperties::Service(service) => {
                let desired = service
                    .selector
                    .as_ref()
                    .map(|selector| index.selector_matches_in(&key.namespace, selector))
                    .unwrap_or_default()
                    .into_iter()
                    .map(|pod| {
                        let id = EdgeId::new(key.clone(), pod, Relation::Targets);
                        (id, EdgeProperties::new())
                    })
                    .collect();
                replace_scope(diff, edges.outgoing(key, Relation::Targets), desired);
            }
            EntityProperties::Pod(pod) => {
                let desired = index
                    .list_by_kind(ResourceKind::Service)
                    .into_iter()
                    .filter(|(service, _)| service.namespace == key.namespace)
                    .filter(|(_, props)| match props {
                        EntityProperties::Service(s) => s
                            .selector
                            .as_ref()
                            .is_some_and(|selector| selector_matches_labels(selector, &pod.labels)),
                        _ => false,
                    })
                    .map(|(service, _)| {
                        let id = EdgeId::new(service, key.clone(), Relation::Targets);
                        (id, EdgeProperties::new())
                    })
                    .collect();
                replace_scope(diff, edges.incoming(key, Relation::Targets), desired);
            }
            _ => {}
        }
    }

    /// Single-valued edges from entities that already point at `key`.
    fn derive_incoming(
        &self,
        key: &EntityKey,
        index: &EntityIndex,
        edges: &dyn EdgeLookup,
        diff: &mut EdgeDiff,
    ) {
        let mut desired: BTreeMap<Relation, BTreeMap<EdgeId, EdgeProperties>> = BTreeMap::new();

        for (referrer, relation) in index.referrers(key) {
            // Recompute from the referrer's current record.
            let Some(record) = index.get(&referrer) else {
                continue;
            };
            for (id, props) in outgoing_edges(&referrer, &record.properties) {
                if id.relation == relation && &id.target == key {
                    desired.entry(relation).or_default().insert(id, props);
                }
            }
        }

        for relation in REFERENCE_RELATIONS {
            let scoped = desired.remove(&relation).unwrap_or_default();
            replace_scope(diff, edges.incoming(key, relation), scoped);
        }
    }
}

/// Retracts recorded edges missing from `desired` and adds the rest.
fn replace_scope(diff: &mut EdgeDiff, recorded: Vec<EdgeId>, desired: BTreeMap<EdgeId, EdgeProperties>) {
    for id in recorded {
        if !desired.contains_key(&id) {
            diff.remove(id);
        }
    }
    for (id, props) in desired {
        diff.add(id, props);
    }
}

/// Picks the owner reference of `kind` that controls the dependent: the
/// one flagged as controller, otherwise the first declared.
fn controlling_owner<'a>(owners: &'a [OwnerRef], kind: ResourceKind) -> Option<&'a OwnerRef> {
    let mut candidates = owners
        .iter()
        .filter(|owner| owner.kind == kind.as_str() && !owner.name.is_empty());
    let first = candidates.clone().next();
    candidates.find(|owner| owner.controller).or(first)
}

fn ownership_edge(key: &EntityKey, owner: &OwnerRef, kind: ResourceKind) -> (EdgeId, EdgeProperties) {
    let target = EntityKey::new(kind, key.namespace.clone(), owner.name.clone());
    let mut props = EdgeProperties::new();
    props.insert("controller".to_string(), owner.controller.to_string());
    (EdgeId::new(key.clone(), target, Relation::OwnedBy), props)
}

/// Edges implied by references the entity holds (everything except
/// selector matches).
pub(crate) fn outgoing_edges(
    key: &EntityKey,
    properties: &EntityProperties,
) -> Vec<(EdgeId, EdgeProperties)> {
    let mut out = Vec::new();
    match properties {
        EntityProperties::Pod(pod) => {
            if let Some(node) = pod.node_name.as_deref().filter(|n| !n.is_empty()) {
                let target = EntityKey::cluster(ResourceKind::Node, node);
                out.push((
                    EdgeId::new(key.clone(), target, Relation::RunsOn),
                    EdgeProperties::new(),
                ));
            }
            if let Some(owner) = controlling_owner(&pod.owners, ResourceKind::ReplicaSet) {
                out.push(ownership_edge(key, owner, ResourceKind::ReplicaSet));
            }
        }
        EntityProperties::ReplicaSet(rs) => {
            if let Some(owner) = controlling_owner(&rs.owners, ResourceKind::Deployment) {
                out.push(ownership_edge(key, owner, ResourceKind::Deployment));
            }
        }
        EntityProperties::Deployment(deployment) => {
            for name in deployment.config_maps.iter().filter(|n| !n.is_empty()) {
                let target = EntityKey::new(ResourceKind::ConfigMap, key.namespace.clone(), name.clone());
                out.push((
                    EdgeId::new(key.clone(), target, Relation::Uses),
                    EdgeProperties::new(),
                ));
            }
        }
        _ => {}
    }
    out
}

/// Targets the entity references, for the index's reference table.
pub(crate) fn outgoing_references(
    key: &EntityKey,
    properties: &EntityProperties,
) -> Vec<(EntityKey, Relation)> {
    outgoing_edges(key, properties)
        .into_iter()
        .map(|(id, _)| (id.target, id.relation))
        .collect()
}
