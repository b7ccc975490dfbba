//! Invariant tests for the reconciliation pipeline.
//!
//! These properties must hold for any event sequence:
//! 1. **Idempotence** - applying the same upsert twice equals applying it once
//! 2. **No dangling edges** - after a delete, nothing references the key
//! 3. **Selector correctness** - a Service targets exactly the matching Pods
//! 4. **Single ownership** - a Pod or ReplicaSet has at most one `owned_by` edge
//! 5. **Config map usage** - a Deployment uses exactly the present ConfigMaps it names
//! 6. **Order independence** - Service-first and Pod-first converge
//!
//! Plus a convergence check: the incrementally maintained graph always
//! equals a graph rebuilt from the final entity state alone.

use kubegraph_core::{
    DeploymentProperties, EntityKey, EntityProperties, Labels, OwnerRef, PodProperties,
    ReplicaSetProperties, ResourceKind, ServiceProperties,
};
use kubegraph_graph::{selector_matches_labels, Change, Reconciler, Relation, Snapshot};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// GENERATORS
// ============================================================================

const PODS: [&str; 4] = ["p0", "p1", "p2", "p3"];
const SERVICES: [&str; 2] = ["s0", "s1"];
const NODES: [&str; 2] = ["n0", "n1"];
const REPLICASETS: [&str; 2] = ["rs0", "rs1"];
const DEPLOYMENTS: [&str; 2] = ["d0", "d1"];
const CONFIGMAPS: [&str; 2] = ["cm0", "cm1"];

fn key(kind: ResourceKind, name: &str) -> EntityKey {
    EntityKey::new(kind, "default", name)
}

fn label_map() -> impl Strategy<Value = Labels> {
    prop::collection::btree_map(
        prop::sample::select(vec!["app", "tier"]),
        prop::sample::select(vec!["x", "y"]),
        0..=2,
    )
    .prop_map(|m| {
        m.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    })
}

fn pod_props() -> impl Strategy<Value = EntityProperties> {
    (
        prop::option::of(prop::sample::select(NODES.to_vec())),
        label_map(),
        prop::collection::vec((prop::sample::select(REPLICASETS.to_vec()), any::<bool>()), 0..=2),
    )
        .prop_map(|(node, labels, owners)| {
            EntityProperties::Pod(PodProperties {
                phase: None,
                node_name: node.map(String::from),
                labels,
                owners: owners
                    .into_iter()
                    .map(|(name, controller)| OwnerRef {
                        kind: "ReplicaSet".to_string(),
                        name: name.to_string(),
                        controller,
                    })
                    .collect(),
            })
        })
}

fn service_props() -> impl Strategy<Value = EntityProperties> {
    prop::option::of(label_map()).prop_map(|selector| {
        EntityProperties::Service(ServiceProperties {
            selector,
            ..Default::default()
        })
    })
}

fn replicaset_props() -> impl Strategy<Value = EntityProperties> {
    (
        label_map(),
        prop::option::of((prop::sample::select(DEPLOYMENTS.to_vec()), any::<bool>())),
    )
        .prop_map(|(labels, owner)| {
            EntityProperties::ReplicaSet(ReplicaSetProperties {
                labels,
                owners: owner
                    .into_iter()
                    .map(|(name, controller)| OwnerRef {
                        kind: "Deployment".to_string(),
                        name: name.to_string(),
                        controller,
                    })
                    .collect(),
                replicas: Some(1),
            })
        })
}

fn deployment_props() -> impl Strategy<Value = EntityProperties> {
    prop::collection::btree_set(prop::sample::select(CONFIGMAPS.to_vec()), 0..=2).prop_map(
        |config_maps| {
            EntityProperties::Deployment(DeploymentProperties {
                config_maps: config_maps.into_iter().map(String::from).collect(),
                ..Default::default()
            })
        },
    )
}

fn change() -> impl Strategy<Value = Change> {
    prop_oneof![
        3 => (prop::sample::select(PODS.to_vec()), pod_props())
            .prop_map(|(name, props)| Change::Upsert(key(ResourceKind::Pod, name), props)),
        2 => (prop::sample::select(SERVICES.to_vec()), service_props())
            .prop_map(|(name, props)| Change::Upsert(key(ResourceKind::Service, name), props)),
        1 => prop::sample::select(NODES.to_vec()).prop_map(|name| Change::Upsert(
            EntityKey::cluster(ResourceKind::Node, name),
            EntityProperties::empty(ResourceKind::Node),
        )),
        1 => (prop::sample::select(REPLICASETS.to_vec()), replicaset_props())
            .prop_map(|(name, props)| Change::Upsert(key(ResourceKind::ReplicaSet, name), props)),
        1 => (prop::sample::select(DEPLOYMENTS.to_vec()), deployment_props())
            .prop_map(|(name, props)| Change::Upsert(key(ResourceKind::Deployment, name), props)),
        1 => prop::sample::select(CONFIGMAPS.to_vec()).prop_map(|name| Change::Upsert(
            key(ResourceKind::ConfigMap, name),
            EntityProperties::empty(ResourceKind::ConfigMap),
        )),
        2 => prop::sample::select(PODS.to_vec())
            .prop_map(|name| Change::Remove(key(ResourceKind::Pod, name))),
        1 => prop::sample::select(SERVICES.to_vec())
            .prop_map(|name| Change::Remove(key(ResourceKind::Service, name))),
        1 => prop::sample::select(NODES.to_vec())
            .prop_map(|name| Change::Remove(EntityKey::cluster(ResourceKind::Node, name))),
        1 => prop::sample::select(REPLICASETS.to_vec())
            .prop_map(|name| Change::Remove(key(ResourceKind::ReplicaSet, name))),
        1 => prop::sample::select(DEPLOYMENTS.to_vec())
            .prop_map(|name| Change::Remove(key(ResourceKind::Deployment, name))),
        1 => prop::sample::select(CONFIGMAPS.to_vec())
            .prop_map(|name| Change::Remove(key(ResourceKind::ConfigMap, name))),
    ]
}

// ============================================================================
// HELPERS
// ============================================================================

fn run(changes: &[Change]) -> Reconciler {
    let reconciler = Reconciler::new();
    for change in changes {
        reconciler.reconcile(change.clone());
    }
    reconciler
}

/// Rebuilds a graph from scratch out of the final entity state, with
/// nodes first so every edge finds both endpoints.
fn rebuilt(reconciler: &Reconciler) -> Snapshot {
    let fresh = Reconciler::new();
    for kind in ResourceKind::ALL {
        for (key, props) in reconciler.index().list_by_kind(kind) {
            fresh.reconcile(Change::Upsert(key, props));
        }
    }
    fresh.store().snapshot()
}

fn without_revisions(snapshot: &Snapshot) -> (BTreeSet<EntityKey>, BTreeMap<String, BTreeMap<String, String>>) {
    let nodes = snapshot.nodes.iter().map(|n| n.key.clone()).collect();
    let edges = snapshot
        .relationships
        .iter()
        .map(|e| (e.id().to_string(), e.properties.clone()))
        .collect();
    (nodes, edges)
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn duplicate_upsert_is_idempotent(
        prefix in prop::collection::vec(change(), 0..20),
        name in prop::sample::select(PODS.to_vec()),
        props in pod_props(),
    ) {
        let upsert = Change::Upsert(key(ResourceKind::Pod, name), props);

        let once = run(&prefix);
        once.reconcile(upsert.clone());
        let once = once.store().snapshot();

        let twice = run(&prefix);
        twice.reconcile(upsert.clone());
        twice.reconcile(upsert);
        let twice = twice.store().snapshot();

        prop_assert_eq!(once, twice);
    }

    #[test]
    fn deletes_leave_no_dangling_edges(changes in prop::collection::vec(change(), 1..40)) {
        let reconciler = Reconciler::new();
        for change in changes {
            let removed = match &change {
                Change::Remove(key) => Some(key.clone()),
                Change::Upsert(..) => None,
            };
            reconciler.reconcile(change);

            let snapshot = reconciler.store().snapshot();
            let nodes: BTreeSet<_> = snapshot.nodes.iter().map(|n| n.key.clone()).collect();
            for edge in &snapshot.relationships {
                prop_assert!(nodes.contains(&edge.source), "dangling source {}", edge.source);
                prop_assert!(nodes.contains(&edge.target), "dangling target {}", edge.target);
                if let Some(key) = &removed {
                    prop_assert!(&edge.source != key && &edge.target != key);
                }
            }
        }
    }

    #[test]
    fn services_target_exactly_matching_pods(changes in prop::collection::vec(change(), 1..40)) {
        let reconciler = run(&changes);
        let snapshot = reconciler.store().snapshot();
        let pods = reconciler.index().list_by_kind(ResourceKind::Pod);

        for (service, props) in reconciler.index().list_by_kind(ResourceKind::Service) {
            let EntityProperties::Service(svc) = props else { unreachable!() };

            let expected: BTreeSet<EntityKey> = pods
                .iter()
                .filter(|(_, p)| {
                    svc.selector
                        .as_ref()
                        .is_some_and(|selector| selector_matches_labels(selector, p.labels()))
                })
                .map(|(k, _)| k.clone())
                .collect();

            let actual: BTreeSet<EntityKey> = snapshot
                .relationships
                .iter()
                .filter(|e| e.source == service && e.relation == Relation::Targets)
                .map(|e| e.target.clone())
                .collect();

            prop_assert_eq!(expected, actual, "targets of {}", service);
        }
    }

    #[test]
    fn owned_entities_have_at_most_one_owner(changes in prop::collection::vec(change(), 1..40)) {
        let reconciler = Reconciler::new();
        for change in changes {
            reconciler.reconcile(change);

            let mut owners: BTreeMap<EntityKey, usize> = BTreeMap::new();
            for edge in reconciler.store().snapshot().relationships {
                if edge.relation == Relation::OwnedBy || edge.relation == Relation::RunsOn {
                    *owners.entry(edge.source.clone()).or_default() += 1;
                }
            }
            for (source, count) in owners {
                // runs_on + owned_by, one each at most.
                prop_assert!(count <= 2, "{} has {} single-valued edges", source, count);
            }

            let snapshot = reconciler.store().snapshot();
            for kind in [ResourceKind::Pod, ResourceKind::ReplicaSet] {
                for (owned, _) in reconciler.index().list_by_kind(kind) {
                    let count = snapshot
                        .relationships
                        .iter()
                        .filter(|e| e.source == owned && e.relation == Relation::OwnedBy)
                        .count();
                    prop_assert!(count <= 1, "{} has {} owners", owned, count);
                }
            }
        }
    }

    #[test]
    fn deployments_use_exactly_present_config_maps(changes in prop::collection::vec(change(), 1..40)) {
        let reconciler = run(&changes);
        let snapshot = reconciler.store().snapshot();
        let present: BTreeSet<EntityKey> = reconciler
            .index()
            .list_by_kind(ResourceKind::ConfigMap)
            .into_iter()
            .map(|(k, _)| k)
            .collect();

        for (deployment, props) in reconciler.index().list_by_kind(ResourceKind::Deployment) {
            let EntityProperties::Deployment(spec) = props else { unreachable!() };

            let expected: BTreeSet<EntityKey> = spec
                .config_maps
                .iter()
                .map(|name| key(ResourceKind::ConfigMap, name))
                .filter(|k| present.contains(k))
                .collect();

            let actual: BTreeSet<EntityKey> = snapshot
                .relationships
                .iter()
                .filter(|e| e.source == deployment && e.relation == Relation::Uses)
                .map(|e| e.target.clone())
                .collect();

            prop_assert_eq!(expected, actual, "config maps used by {}", deployment);
        }
    }

    #[test]
    fn service_and_pod_order_converge(
        pod in pod_props(),
        service in service_props(),
        node_first in any::<bool>(),
    ) {
        let node = Change::Upsert(
            EntityKey::cluster(ResourceKind::Node, "n0"),
            EntityProperties::empty(ResourceKind::Node),
        );
        let pod = Change::Upsert(key(ResourceKind::Pod, "p0"), pod);
        let service = Change::Upsert(key(ResourceKind::Service, "s0"), service);

        let mut service_first = vec![service.clone(), pod.clone()];
        let mut pod_first = vec![pod, service];
        if node_first {
            service_first.insert(0, node.clone());
            pod_first.insert(0, node);
        } else {
            service_first.push(node.clone());
            pod_first.push(node);
        }

        let a = run(&service_first).store().snapshot();
        let b = run(&pod_first).store().snapshot();
        prop_assert_eq!(without_revisions(&a).1, without_revisions(&b).1);
    }

    #[test]
    fn incremental_graph_matches_rebuild(changes in prop::collection::vec(change(), 1..60)) {
        let reconciler = run(&changes);
        let incremental = reconciler.store().snapshot();
        prop_assert_eq!(without_revisions(&incremental), without_revisions(&rebuilt(&reconciler)));
    }
}
