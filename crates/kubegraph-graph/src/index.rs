//! The entity index.
//!
//! Holds the current record of every known entity plus two auxiliary
//! indexes kept in step with it:
//!
//! - a label index over Pods, `(label key, label value) -> pods`, used to
//!   answer selector queries without scanning every Pod
//! - a reference index, `target -> (referrer, relation)`, built from owner
//!   references, node assignments and ConfigMap usage, so an entity that
//!   shows up late can find the entities already pointing at it
//!
//! The index never triggers relationship evaluation itself; deciding what
//! changed is the reconciler's job.

use crate::edge::Relation;
use crate::engine::outgoing_references;
use kubegraph_core::{EntityKey, EntityProperties, Labels, ResourceKind};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A known entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    pub key: EntityKey,
    pub properties: EntityProperties,
    /// Bumped on every observed change of `properties`.
    pub revision: u64,
}

#[derive(Debug, Default)]
struct IndexState {
    entities: HashMap<EntityKey, EntityRecord>,
    by_kind: BTreeMap<ResourceKind, BTreeSet<EntityKey>>,
    labels: HashMap<(String, String), BTreeSet<EntityKey>>,
    references: HashMap<EntityKey, BTreeSet<(EntityKey, Relation)>>,
}

impl IndexState {
    fn link(&mut self, record: &EntityRecord) {
        self.by_kind
            .entry(record.key.kind)
            .or_default()
            .insert(record.key.clone());

        if record.key.kind == ResourceKind::Pod {
            for (k, v) in record.properties.labels() {
                self.labels
                    .entry((k.clone(), v.clone()))
                    .or_default()
                    .insert(record.key.clone());
            }
        }

        for (target, relation) in outgoing_references(&record.key, &record.properties) {
            self.references
                .entry(target)
                .or_default()
                .insert((record.key.clone(), relation));
        }
    }

    fn unlink(&mut self, record: &EntityRecord) {
        if let Some(keys) = self.by_kind.get_mut(&record.key.kind) {
            keys.remove(&record.key);
        }

        if record.key.kind == ResourceKind::Pod {
            for (k, v) in record.properties.labels() {
                let label = (k.clone(), v.clone());
                if let Some(pods) = self.labels.get_mut(&label) {
                    pods.remove(&record.key);
                    if pods.is_empty() {
                        self.labels.remove(&label);
                    }
                }
            }
        }

        for (target, relation) in outgoing_references(&record.key, &record.properties) {
            if let Some(referrers) = self.references.get_mut(&target) {
                referrers.remove(&(record.key.clone(), relation));
                if referrers.is_empty() {
                    self.references.remove(&target);
                }
            }
        }
    }

    fn selector_matches(&self, namespace: Option<&str>, selector: &Labels) -> BTreeSet<EntityKey> {
        // An empty selector matches nothing.
        let mut postings = Vec::with_capacity(selector.len());
        for (k, v) in selector {
            match self.labels.get(&(k.clone(), v.clone())) {
                Some(pods) => postings.push(pods),
                None => return BTreeSet::new(),
            }
        }
        postings.sort_by_key(|pods| pods.len());

        let Some((smallest, rest)) = postings.split_first() else {
            return BTreeSet::new();
        };

        smallest
            .iter()
            .filter(|key| namespace.map_or(true, |ns| key.namespace == ns))
            .filter(|key| rest.iter().all(|pods| pods.contains(*key)))
            .cloned()
            .collect()
    }
}

/// Concurrent index of every live entity.
///
/// All operations lock internally; each is atomic with respect to the
/// others.
#[derive(Debug, Default)]
pub struct EntityIndex {
    state: RwLock<IndexState>,
}

impl EntityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entity, returning its revision.
    ///
    /// Re-upserting identical properties is not a change: the revision
    /// stays the same. Otherwise last write wins.
    pub fn upsert(&self, key: EntityKey, properties: EntityProperties) -> u64 {
        let mut state = self.state.write();

        let revision = match state.entities.remove(&key) {
            Some(previous) if previous.properties == properties => {
                let revision = previous.revision;
                state.entities.insert(key, previous);
                return revision;
            }
            Some(previous) => {
                state.unlink(&previous);
                previous.revision + 1
            }
            None => 1,
        };

        let record = EntityRecord {
            key: key.clone(),
            properties,
            revision,
        };
        state.link(&record);
        state.entities.insert(key, record);
        revision
    }

    /// Removes an entity. Removing an unknown key is a no-op returning `None`.
    pub fn remove(&self, key: &EntityKey) -> Option<EntityProperties> {
        let mut state = self.state.write();
        let record = state.entities.remove(key)?;
        state.unlink(&record);
        Some(record.properties)
    }

    pub fn get(&self, key: &EntityKey) -> Option<EntityRecord> {
        self.state.read().entities.get(key).cloned()
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.state.read().entities.contains_key(key)
    }

    /// All entities of a kind, in key order.
    pub fn list_by_kind(&self, kind: ResourceKind) -> Vec<(EntityKey, EntityProperties)> {
        let state = self.state.read();
        state
            .by_kind
            .get(&kind)
            .into_iter()
            .flatten()
            .filter_map(|key| {
                state
                    .entities
                    .get(key)
                    .map(|record| (key.clone(), record.properties.clone()))
            })
            .collect()
    }

    /// Keys of a kind, in key order.
    pub fn keys_of_kind(&self, kind: ResourceKind) -> Vec<EntityKey> {
        self.state
            .read()
            .by_kind
            .get(&kind)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Pods, in any namespace, whose labels contain every pair in `selector`.
    ///
    /// An empty selector matches no Pods.
    pub fn selector_matches(&self, selector: &Labels) -> BTreeSet<EntityKey> {
        self.state.read().selector_matches(None, selector)
    }

    /// Like [`selector_matches`](Self::selector_matches), restricted to one namespace.
    pub fn selector_matches_in(&self, namespace: &str, selector: &Labels) -> BTreeSet<EntityKey> {
        self.state.read().selector_matches(Some(namespace), selector)
    }

    /// Entities that reference `target`, with the relation the reference
    /// produces. The referrers need not be visible in the graph yet.
    pub fn referrers(&self, target: &EntityKey) -> Vec<(EntityKey, Relation)> {
        self.state
            .read()
            .references
            .get(target)
            .map(|refs| refs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state.read().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// True if every selector pair appears in `labels`. Empty selectors never match.
pub fn selector_matches_labels(selector: &Labels, labels: &Labels) -> bool {
    !selector.is_empty() && selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}
