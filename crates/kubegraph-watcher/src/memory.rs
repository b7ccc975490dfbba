//! An in-process source fed by the caller.
//!
//! Objects pushed through [`MemorySource::apply`] update the listing and are
//! fanned out to every open watch stream of their kind, so a re-list after a
//! disconnect sees the same state a live watcher would have.

use crate::source::{ResourceSource, SourceError, SourceObject, WatchEvent, WatchEventKind, WatchStream};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use kubegraph_core::{EntityKey, EntityProperties, ResourceKind};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;

type EventSender = mpsc::UnboundedSender<Result<WatchEvent, SourceError>>;

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<EntityKey, EntityProperties>,
    watchers: HashMap<ResourceKind, Vec<EventSender>>,
    failing_lists: HashMap<ResourceKind, usize>,
}

#[derive(Debug, Default)]
pub struct MemorySource {
    state: Mutex<MemoryState>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object without notifying watchers.
    pub fn insert(&self, key: EntityKey, properties: EntityProperties) {
        self.state.lock().objects.insert(key, properties);
    }

    /// Applies a change and delivers it to open watch streams of its kind.
    /// Returns how many streams received it.
    pub fn apply(&self, event: WatchEvent) -> usize {
        let mut state = self.state.lock();

        match (&event.kind, &event.properties) {
            (WatchEventKind::Deleted, _) => {
                state.objects.remove(&event.key);
            }
            (_, Some(properties)) => {
                state.objects.insert(event.key.clone(), properties.clone());
            }
            (_, None) => {}
        }

        let kind = event.key.kind;
        let Some(senders) = state.watchers.get_mut(&kind) else {
            return 0;
        };
        senders.retain(|tx| tx.send(Ok(event.clone())).is_ok());
        senders.len()
    }

    /// Makes the next `times` listings of `kind` fail.
    pub fn fail_lists(&self, kind: ResourceKind, times: usize) {
        self.state.lock().failing_lists.insert(kind, times);
    }

    /// Sends an error into every open stream of `kind` and closes them.
    pub fn break_watches(&self, kind: ResourceKind, reason: &str) {
        let senders = self.state.lock().watchers.remove(&kind).unwrap_or_default();
        for tx in senders {
            let _ = tx.send(Err(SourceError::Unavailable(reason.to_string())));
        }
    }
}

#[async_trait]
impl ResourceSource for MemorySource {
    async fn list(&self, kind: ResourceKind) -> Result<Vec<SourceObject>, SourceError> {
        let mut state = self.state.lock();

        if let Some(remaining) = state.failing_lists.get_mut(&kind) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SourceError::Unavailable(format!("listing {} refused", kind)));
            }
        }

        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| key.kind == kind)
            .map(|(key, properties)| SourceObject::new(key.clone(), properties.clone()))
            .collect())
    }

    async fn watch(&self, kind: ResourceKind) -> Result<WatchStream, SourceError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().watchers.entry(kind).or_default().push(tx);

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}
