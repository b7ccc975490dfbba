//! Per-kind event processing.
//!
//! One [`EventProcessor`] runs per resource kind:
//!
//! ```text
//! Disconnected -> Listing -> Watching -> (stream error or close) -> Backoff -> Listing
//! ```
//!
//! Every listed object and every watch event goes through
//! [`Reconciler::reconcile`] before the next one is taken, so events of one
//! kind are applied strictly in arrival order. Cancellation is checked
//! between events only; a change that has started reconciling always
//! finishes.

use crate::backoff::Backoff;
use crate::source::{ResourceSource, SourceError, WatchEvent, WatchEventKind, WatchStream};
use futures_util::StreamExt;
use kubegraph_core::{EntityKey, ResourceKind};
use kubegraph_graph::{Change, Reconciler};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorState {
    Disconnected,
    Listing,
    Watching,
    Backoff,
}

/// Counters for one processor's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub listings: usize,
    pub listed_objects: usize,
    pub pruned: usize,
    pub events: usize,
    pub failures: usize,
}

enum Phase {
    Relist,
    Cancelled,
}

pub struct EventProcessor {
    kind: ResourceKind,
    source: Arc<dyn ResourceSource>,
    reconciler: Arc<Reconciler>,
    backoff: Backoff,
    cancel: CancellationToken,
    state: watch::Sender<ProcessorState>,
    stats: ProcessorStats,
}

impl EventProcessor {
    pub fn new(
        kind: ResourceKind,
        source: Arc<dyn ResourceSource>,
        reconciler: Arc<Reconciler>,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ProcessorState::Disconnected);
        Self {
            kind,
            source,
            reconciler,
            backoff: Backoff::default(),
            cancel,
            state,
            stats: ProcessorStats::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Observes state transitions. Subscribe before [`run`](Self::run).
    pub fn subscribe(&self) -> watch::Receiver<ProcessorState> {
        self.state.subscribe()
    }

    pub fn spawn(self) -> JoinHandle<ProcessorStats> {
        tokio::spawn(self.run())
    }

    /// Runs until the cancellation token fires.
    pub async fn run(mut self) -> ProcessorStats {
        info!(kind = %self.kind, "event processor started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let phase = match self.connect().await {
                Ok(stream) => self.watch(stream).await,
                Err(e) => {
                    self.stats.failures += 1;
                    warn!(kind = %self.kind, error = %e, "resource source failed");
                    Phase::Relist
                }
            };

            match phase {
                Phase::Cancelled => break,
                Phase::Relist => {
                    if !self.wait_backoff().await {
                        break;
                    }
                }
            }
        }

        self.set_state(ProcessorState::Disconnected);
        info!(
            kind = %self.kind,
            listings = self.stats.listings,
            events = self.stats.events,
            "event processor stopped"
        );
        self.stats
    }

    /// Opens the watch stream, then lists.
    ///
    /// The stream is opened first so that changes made while the listing
    /// runs are queued on it and replayed afterwards. Replaying an event the
    /// listing already covered is harmless.
    async fn connect(&mut self) -> Result<WatchStream, SourceError> {
        self.set_state(ProcessorState::Listing);

        let stream = self.source.watch(self.kind).await?;
        let objects = self.source.list(self.kind).await?;

        let mut seen = BTreeSet::new();
        let total = objects.len();
        for object in objects {
            if self.cancel.is_cancelled() {
                break;
            }
            if object.key.kind != self.kind {
                warn!(kind = %self.kind, key = %object.key, "listing returned a foreign kind");
                continue;
            }
            seen.insert(object.key.clone());
            self.reconciler
                .reconcile(Change::Upsert(object.key, object.properties));
        }

        let pruned = if self.cancel.is_cancelled() {
            0
        } else {
            self.prune_missing(&seen)
        };

        self.stats.listings += 1;
        self.stats.listed_objects += seen.len();
        self.stats.pruned += pruned;
        self.backoff.reset();

        info!(kind = %self.kind, objects = total, pruned, "listing complete");
        Ok(stream)
    }

    /// Removes entities of this kind that a fresh listing no longer has.
    fn prune_missing(&self, seen: &BTreeSet<EntityKey>) -> usize {
        let stale: Vec<EntityKey> = self
            .reconciler
            .index()
            .keys_of_kind(self.kind)
            .into_iter()
            .filter(|key| !seen.contains(key))
            .collect();

        for key in &stale {
            debug!(key = %key, "pruning entity missing from listing");
            self.reconciler.reconcile(Change::Remove(key.clone()));
        }
        stale.len()
    }

    async fn watch(&mut self, mut stream: WatchStream) -> Phase {
        self.set_state(ProcessorState::Watching);
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Phase::Cancelled,
                item = stream.next() => match item {
                    Some(Ok(event)) => self.handle(event),
                    Some(Err(e)) => {
                        self.stats.failures += 1;
                        warn!(kind = %self.kind, error = %e, "watch stream failed");
                        return Phase::Relist;
                    }
                    None => {
                        info!(kind = %self.kind, "watch stream closed");
                        return Phase::Relist;
                    }
                },
            }
        }
    }

    fn handle(&mut self, event: WatchEvent) {
        if event.key.kind != self.kind {
            warn!(kind = %self.kind, key = %event.key, "ignoring event for a foreign kind");
            return;
        }

        let change = match (event.kind, event.properties) {
            (WatchEventKind::Deleted, _) => Change::Remove(event.key),
            (_, Some(properties)) => Change::Upsert(event.key, properties),
            (kind, None) => {
                warn!(key = %event.key, event = ?kind, "event without properties ignored");
                return;
            }
        };

        self.stats.events += 1;
        let outcome = self.reconciler.reconcile(change);
        debug!(
            kind = %self.kind,
            event = ?event.kind,
            added = outcome.edges_added,
            removed = outcome.edges_removed,
            "event applied"
        );
    }

    /// Sleeps for the next backoff delay. Returns `false` if cancelled.
    async fn wait_backoff(&mut self) -> bool {
        self.set_state(ProcessorState::Backoff);
        let delay = self.backoff.next_delay();
        debug!(kind = %self.kind, delay_ms = delay.as_millis() as u64, "backing off");

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn set_state(&self, state: ProcessorState) {
        self.state.send_replace(state);
    }
}
