//! A source backed by a directory of JSON manifests.
//!
//! Layout: `<root>/<kind-plural>/<anything>.json`, one object per file in
//! the usual cluster object shape (`metadata.name`, `metadata.labels`,
//! `spec...`). Listing walks the kind directory; watching follows file
//! changes with a short debounce.

use crate::source::{ResourceSource, SourceError, SourceObject, WatchEvent, WatchStream};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use kubegraph_core::{decode_object, DecodeError, EntityKey, ResourceKind};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(150);

/// Why one manifest file could not be turned into an object.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("cannot read file: {0}")]
    Io(#[from] io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// One scanned file and what it decoded to.
pub type ScannedManifest = (PathBuf, Result<SourceObject, ManifestError>);

/// Reads and decodes one manifest file.
pub fn load_manifest(kind: ResourceKind, path: &Path) -> Result<SourceObject, ManifestError> {
    let bytes = std::fs::read(path)?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)?;
    let (key, properties) = decode_object(kind, &value)?;
    Ok(SourceObject::new(key, properties))
}

fn is_manifest(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

// ─────────────────────────────────────────────────────────────────────────────
// DirectorySource
// ─────────────────────────────────────────────────────────────────────────────

pub struct DirectorySource {
    root: PathBuf,
    debounce: Duration,
    /// Last key decoded from each file, so a removed file can be reported
    /// as a deletion of the entity it held. Paths are canonical, matching
    /// what notify reports.
    seen: Arc<Mutex<HashMap<PathBuf, EntityKey>>>,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            debounce: DEFAULT_DEBOUNCE,
            seen: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The kind directory as configured.
    pub fn kind_dir(&self, kind: ResourceKind) -> PathBuf {
        self.root.join(kind.plural())
    }

    /// The kind directory with symlinks resolved. Resolved on every call
    /// since the directory may only appear after startup.
    fn resolved_dir(&self, kind: ResourceKind) -> PathBuf {
        let dir = self.kind_dir(kind);
        dir.canonicalize().unwrap_or(dir)
    }

    /// Decodes every manifest of `kind`, keeping failures alongside their
    /// path. A missing kind directory yields nothing; one that exists but
    /// cannot be read is an error.
    pub fn scan(&self, kind: ResourceKind) -> Result<Vec<ScannedManifest>, SourceError> {
        let dir = self.resolved_dir(kind);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        if !dir.is_dir() {
            return Err(SourceError::Io {
                path: dir,
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            });
        }

        let mut scanned = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.clone());
                    return Err(SourceError::Io {
                        path,
                        source: e.into(),
                    });
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !is_manifest(entry.path()) {
                continue;
            }
            let path = entry.into_path();
            let loaded = load_manifest(kind, &path);
            scanned.push((path, loaded));
        }
        Ok(scanned)
    }
}

#[async_trait]
impl ResourceSource for DirectorySource {
    async fn list(&self, kind: ResourceKind) -> Result<Vec<SourceObject>, SourceError> {
        let dir = self.resolved_dir(kind);
        let scanned = self.scan(kind)?;
        let mut objects = Vec::with_capacity(scanned.len());
        let mut seen = self.seen.lock();

        seen.retain(|path, _| path.parent() != Some(dir.as_path()));
        for (path, loaded) in scanned {
            match loaded {
                Ok(object) => {
                    seen.insert(path, object.key.clone());
                    objects.push(object);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping manifest"),
            }
        }

        debug!(kind = %kind, count = objects.len(), "listed manifests");
        Ok(objects)
    }

    async fn watch(&self, kind: ResourceKind) -> Result<WatchStream, SourceError> {
        let dir = self.resolved_dir(kind);
        if !dir.is_dir() {
            return Err(SourceError::Unavailable(format!(
                "{} does not exist",
                dir.display()
            )));
        }

        let (notify_tx, notify_rx) = mpsc::channel::<notify::Result<Event>>(256);
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = notify_tx.blocking_send(res);
            },
            Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(kind = %kind, dir = %dir.display(), "watching manifests");

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(run_file_watcher(
            kind,
            watcher,
            notify_rx,
            self.seen.clone(),
            self.debounce,
            tx,
        ));

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File Watcher with Debouncing
// ─────────────────────────────────────────────────────────────────────────────

/// Debounces raw notify events per path and turns settled paths into watch
/// events. Ends when the stream is dropped or notify reports an error.
async fn run_file_watcher(
    kind: ResourceKind,
    _watcher: RecommendedWatcher,
    mut notify_rx: mpsc::Receiver<notify::Result<Event>>,
    seen: Arc<Mutex<HashMap<PathBuf, EntityKey>>>,
    debounce: Duration,
    tx: mpsc::Sender<Result<WatchEvent, SourceError>>,
) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    while !tx.is_closed() {
        let now = Instant::now();
        let ready: Vec<PathBuf> = pending
            .iter()
            .filter(|(_, at)| now.duration_since(**at) >= debounce)
            .map(|(path, _)| path.clone())
            .collect();

        for path in ready {
            pending.remove(&path);
            for event in settle(kind, &path, &seen) {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        }

        match tokio::time::timeout(Duration::from_millis(50), notify_rx.recv()).await {
            Ok(Some(Ok(event))) => {
                for path in event.paths {
                    if is_manifest(&path) {
                        pending.insert(path, Instant::now());
                    }
                }
            }
            Ok(Some(Err(e))) => {
                let _ = tx.send(Err(SourceError::Watch(e))).await;
                return;
            }
            Ok(None) => return,
            Err(_) => {}
        }
    }

    debug!(kind = %kind, "manifest watcher stopped");
}

/// Works out what a settled file change means for the entity it holds.
///
/// A key is only reported deleted once no other file holds it, so a rename
/// settles to the same final state whichever path settles first.
fn settle(
    kind: ResourceKind,
    path: &Path,
    seen: &Mutex<HashMap<PathBuf, EntityKey>>,
) -> Vec<WatchEvent> {
    let mut seen = seen.lock();

    if !path.exists() {
        return match seen.remove(path) {
            Some(key) if !held_elsewhere(&seen, &key) => vec![WatchEvent::deleted(key)],
            _ => Vec::new(),
        };
    }

    let object = match load_manifest(kind, path) {
        Ok(object) => object,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable manifest");
            return Vec::new();
        }
    };

    let added = WatchEvent::added(object.key.clone(), object.properties.clone());
    match seen.insert(path.to_path_buf(), object.key.clone()) {
        Some(previous) if previous == object.key => {
            vec![WatchEvent::modified(object.key, object.properties)]
        }
        Some(previous) if !held_elsewhere(&seen, &previous) => {
            vec![WatchEvent::deleted(previous), added]
        }
        _ => vec![added],
    }
}

fn held_elsewhere(seen: &HashMap<PathBuf, EntityKey>, key: &EntityKey) -> bool {
    seen.values().any(|held| held == key)
}
