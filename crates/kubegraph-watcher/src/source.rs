//! The seam between event processors and wherever cluster objects come from.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use kubegraph_core::{EntityKey, EntityProperties, ResourceKind};
use std::path::PathBuf;
use thiserror::Error;

/// Transient access failures. Processors retry all of these with backoff.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// One decoded object from a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceObject {
    pub key: EntityKey,
    pub properties: EntityProperties,
}

impl SourceObject {
    pub fn new(key: EntityKey, properties: EntityProperties) -> Self {
        Self { key, properties }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventKind {
    Added,
    Modified,
    Deleted,
}

/// One change delivered by a watch stream.
///
/// `properties` is `None` only for deletions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub key: EntityKey,
    pub properties: Option<EntityProperties>,
}

impl WatchEvent {
    pub fn added(key: EntityKey, properties: EntityProperties) -> Self {
        Self {
            kind: WatchEventKind::Added,
            key,
            properties: Some(properties),
        }
    }

    pub fn modified(key: EntityKey, properties: EntityProperties) -> Self {
        Self {
            kind: WatchEventKind::Modified,
            key,
            properties: Some(properties),
        }
    }

    pub fn deleted(key: EntityKey) -> Self {
        Self {
            kind: WatchEventKind::Deleted,
            key,
            properties: None,
        }
    }
}

/// A watch stream. It ends (or yields an error) when the source drops it.
pub type WatchStream = BoxStream<'static, Result<WatchEvent, SourceError>>;

/// Where listings and watch streams come from.
#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// One full enumeration of `kind`.
    async fn list(&self, kind: ResourceKind) -> Result<Vec<SourceObject>, SourceError>;

    /// Opens a stream of changes to `kind` from now on.
    async fn watch(&self, kind: ResourceKind) -> Result<WatchStream, SourceError>;
}
