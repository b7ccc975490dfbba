//! Kubegraph Watcher - Event ingestion and snapshot emission
//!
//! Feeds cluster objects into a [`Reconciler`](kubegraph_graph::Reconciler)
//! and writes the resulting graph out periodically.
//!
//! - [`ResourceSource`] is where objects come from: [`MemorySource`] for
//!   embedding and tests, [`DirectorySource`] for a directory of JSON
//!   manifests
//! - [`EventProcessor`] runs the list/watch/backoff loop for one kind
//! - [`SnapshotEmitter`] writes snapshots on an interval
//!
//! All long-running tasks stop on a shared
//! [`CancellationToken`](tokio_util::sync::CancellationToken).

mod backoff;
mod directory;
mod emitter;
mod memory;
mod processor;
mod source;

pub use backoff::Backoff;
pub use directory::{load_manifest, DirectorySource, ManifestError, ScannedManifest, DEFAULT_DEBOUNCE};
pub use emitter::{Emitted, SnapshotEmitter, DEFAULT_INTERVAL};
pub use memory::MemorySource;
pub use processor::{EventProcessor, ProcessorState, ProcessorStats};
pub use source::{ResourceSource, SourceError, SourceObject, WatchEvent, WatchEventKind, WatchStream};
