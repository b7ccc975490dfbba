//! Periodic snapshot emission.

use kubegraph_graph::{GraphStore, SnapshotError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);

/// Writes `GraphStore::snapshot()` to a file on a fixed interval.
///
/// Reads only; a failed write is logged and retried at the next tick.
pub struct SnapshotEmitter {
    store: Arc<GraphStore>,
    path: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
}

/// Size of one written snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emitted {
    pub nodes: usize,
    pub relationships: usize,
}

impl SnapshotEmitter {
    pub fn new(store: Arc<GraphStore>, path: impl Into<PathBuf>, cancel: CancellationToken) -> Self {
        Self {
            store,
            path: path.into(),
            interval: DEFAULT_INTERVAL,
            cancel,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one snapshot now.
    pub fn emit(&self) -> Result<Emitted, SnapshotError> {
        let snapshot = self.store.snapshot();
        snapshot.write_to(&self.path)?;
        Ok(Emitted {
            nodes: snapshot.nodes.len(),
            relationships: snapshot.relationships.len(),
        })
    }

    pub fn spawn(self) -> JoinHandle<usize> {
        tokio::spawn(self.run())
    }

    /// Emits every interval until cancelled, then writes a final snapshot.
    /// Returns the number of successful writes.
    pub async fn run(self) -> usize {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut written = 0;

        info!(
            path = %self.path.display(),
            interval_secs = self.interval.as_secs_f64(),
            "snapshot emitter started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.emit_logged() {
                        written += 1;
                    }
                }
            }
        }

        if self.emit_logged() {
            written += 1;
        }
        info!(path = %self.path.display(), written, "snapshot emitter stopped");
        written
    }

    fn emit_logged(&self) -> bool {
        match self.emit() {
            Ok(emitted) => {
                debug!(
                    path = %self.path.display(),
                    nodes = emitted.nodes,
                    relationships = emitted.relationships,
                    "snapshot written"
                );
                true
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to write snapshot");
                false
            }
        }
    }
}
