//! End-to-end scenarios over the reconciliation pipeline.

use kubegraph_core::{
    decode_object, EntityKey, EntityProperties, Labels, PodProperties, ResourceKind,
    ServiceProperties,
};
use kubegraph_graph::{Change, EdgeId, Reconciler, Relation};
use serde_json::json;
use std::collections::BTreeSet;

fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn n1() -> EntityKey {
    EntityKey::cluster(ResourceKind::Node, "n1")
}

fn p1() -> EntityKey {
    EntityKey::new(ResourceKind::Pod, "default", "p1")
}

fn svc1() -> EntityKey {
    EntityKey::new(ResourceKind::Service, "default", "svc1")
}

fn pod_with_app(app: &str) -> EntityProperties {
    EntityProperties::Pod(PodProperties {
        phase: Some("Running".into()),
        node_name: Some("n1".into()),
        labels: labels(&[("app", app)]),
        owners: Vec::new(),
    })
}

fn edge_set(reconciler: &Reconciler) -> BTreeSet<EdgeId> {
    reconciler
        .store()
        .snapshot()
        .relationships
        .iter()
        .map(|edge| edge.id())
        .collect()
}

fn node_set(reconciler: &Reconciler) -> BTreeSet<EntityKey> {
    reconciler
        .store()
        .snapshot()
        .nodes
        .into_iter()
        .map(|node| node.key)
        .collect()
}

/// Node n1, Pod p1 on n1 labelled app=x, Service svc1 selecting app=x.
fn scenario_a() -> Reconciler {
    let reconciler = Reconciler::new();
    reconciler.reconcile(Change::Upsert(n1(), EntityProperties::empty(ResourceKind::Node)));
    reconciler.reconcile(Change::Upsert(p1(), pod_with_app("x")));
    reconciler.reconcile(Change::Upsert(
        svc1(),
        EntityProperties::Service(ServiceProperties {
            selector: Some(labels(&[("app", "x")])),
            ..Default::default()
        }),
    ));
    reconciler
}

#[test]
fn scenario_a_initial_listing() {
    let reconciler = scenario_a();

    assert_eq!(node_set(&reconciler), BTreeSet::from([n1(), p1(), svc1()]));
    assert_eq!(
        edge_set(&reconciler),
        BTreeSet::from([
            EdgeId::new(p1(), n1(), Relation::RunsOn),
            EdgeId::new(svc1(), p1(), Relation::Targets),
        ])
    );
}

#[test]
fn scenario_b_relabel_drops_targets_only() {
    let reconciler = scenario_a();
    reconciler.reconcile(Change::Upsert(p1(), pod_with_app("y")));

    assert_eq!(
        edge_set(&reconciler),
        BTreeSet::from([EdgeId::new(p1(), n1(), Relation::RunsOn)])
    );

    let runs_on = reconciler.store().snapshot().relationships[0].clone();
    assert_eq!(runs_on.revision, 1);
}

#[test]
fn scenario_c_delete_removes_incident_edges() {
    let reconciler = scenario_a();
    reconciler.reconcile(Change::Remove(p1()));

    assert_eq!(node_set(&reconciler), BTreeSet::from([n1(), svc1()]));
    assert!(edge_set(&reconciler).is_empty());
}

#[test]
fn node_deleted_and_recreated_restores_runs_on() {
    let reconciler = scenario_a();
    reconciler.reconcile(Change::Remove(n1()));
    assert_eq!(
        edge_set(&reconciler),
        BTreeSet::from([EdgeId::new(svc1(), p1(), Relation::Targets)])
    );

    reconciler.reconcile(Change::Upsert(n1(), EntityProperties::empty(ResourceKind::Node)));
    assert!(edge_set(&reconciler).contains(&EdgeId::new(p1(), n1(), Relation::RunsOn)));
}

#[test]
fn ownership_chain_from_raw_objects() {
    let objects = [
        (
            ResourceKind::Deployment,
            json!({
                "metadata": { "name": "web", "namespace": "shop" },
                "spec": { "template": { "spec": { "volumes": [
                    { "name": "cfg", "configMap": { "name": "web-config" } }
                ] } } }
            }),
        ),
        (
            ResourceKind::Pod,
            json!({
                "metadata": {
                    "name": "web-abc-1",
                    "namespace": "shop",
                    "ownerReferences": [{ "kind": "ReplicaSet", "name": "web-abc", "controller": true }]
                },
                "spec": {}
            }),
        ),
        (
            ResourceKind::ReplicaSet,
            json!({
                "metadata": {
                    "name": "web-abc",
                    "namespace": "shop",
                    "ownerReferences": [{ "kind": "Deployment", "name": "web", "controller": true }]
                }
            }),
        ),
        (
            ResourceKind::ConfigMap,
            json!({ "metadata": { "name": "web-config", "namespace": "shop" }, "data": { "a": "1" } }),
        ),
    ];

    let reconciler = Reconciler::new();
    for (kind, object) in objects {
        let (key, props) = decode_object(kind, &object).unwrap();
        reconciler.reconcile(Change::Upsert(key, props));
    }

    let pod = EntityKey::new(ResourceKind::Pod, "shop", "web-abc-1");
    let rs = EntityKey::new(ResourceKind::ReplicaSet, "shop", "web-abc");
    let deployment = EntityKey::new(ResourceKind::Deployment, "shop", "web");
    let cm = EntityKey::new(ResourceKind::ConfigMap, "shop", "web-config");

    assert_eq!(
        edge_set(&reconciler),
        BTreeSet::from([
            EdgeId::new(pod, rs.clone(), Relation::OwnedBy),
            EdgeId::new(rs.clone(), deployment.clone(), Relation::OwnedBy),
            EdgeId::new(deployment.clone(), cm, Relation::Uses),
        ])
    );

    // Dropping the ConfigMap volume retracts the uses edge.
    let (key, props) = decode_object(
        ResourceKind::Deployment,
        &json!({ "metadata": { "name": "web", "namespace": "shop" }, "spec": {} }),
    )
    .unwrap();
    reconciler.reconcile(Change::Upsert(key, props));
    assert_eq!(edge_set(&reconciler).len(), 2);

    reconciler.reconcile(Change::Remove(rs));
    assert!(edge_set(&reconciler).is_empty());
}

#[test]
fn stats_follow_the_graph() {
    let reconciler = scenario_a();
    let stats = reconciler.store().stats();
    assert_eq!(stats.node_count, 3);
    assert_eq!(stats.edge_count, 2);
    assert_eq!(stats.edges_by_relation.get(&Relation::Targets), Some(&1));
}
