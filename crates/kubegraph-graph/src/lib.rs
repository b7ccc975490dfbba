//! Kubegraph Graph - Incremental relationship graph
//!
//! This crate keeps a graph of cluster entities and the relationships
//! derived from their fields, and keeps it correct as entities change one
//! event at a time. Nothing is ever rebuilt from scratch: each change
//! re-derives only the edges it can affect.
//!
//! # Architecture
//!
//! - [`EntityIndex`] holds the current entities plus a Pod label index and
//!   a reference index
//! - [`RelationshipEngine`] turns "this key changed" into an [`EdgeDiff`]
//! - [`GraphStore`] is a petgraph-backed store that commits node changes
//!   and edge diffs atomically and hands out ordered [`Snapshot`]s
//! - [`Reconciler`] runs index -> derive -> apply for each change
//!
//! # Example
//!
//! ```
//! use kubegraph_core::{EntityKey, EntityProperties, PodProperties, ResourceKind};
//! use kubegraph_graph::{Change, Reconciler};
//!
//! let reconciler = Reconciler::new();
//! reconciler.reconcile(Change::Upsert(
//!     EntityKey::cluster(ResourceKind::Node, "n1"),
//!     EntityProperties::empty(ResourceKind::Node),
//! ));
//! reconciler.reconcile(Change::Upsert(
//!     EntityKey::new(ResourceKind::Pod, "default", "p1"),
//!     EntityProperties::Pod(PodProperties {
//!         node_name: Some("n1".into()),
//!         ..Default::default()
//!     }),
//! ));
//!
//! let snapshot = reconciler.store().snapshot();
//! assert_eq!(snapshot.relationships.len(), 1);
//! ```

mod edge;
mod engine;
mod index;
mod reconciler;
mod snapshot;
mod store;

pub use edge::{EdgeDiff, EdgeId, EdgeLookup, EdgeProperties, GraphEdge, Relation};
pub use engine::{ChangeKind, RelationshipEngine};
pub use index::{selector_matches_labels, EntityIndex, EntityRecord};
pub use reconciler::{Change, ReconcileOutcome, Reconciler};
pub use snapshot::{Snapshot, SnapshotError};
pub use store::{ApplyOutcome, GraphNode, GraphStats, GraphStore, GraphUpdate, NodeChange};
