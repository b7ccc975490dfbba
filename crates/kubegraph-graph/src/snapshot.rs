//! Point-in-time graph snapshots and their on-disk form.

use crate::edge::GraphEdge;
use crate::store::GraphNode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A consistent copy of the graph.
///
/// Nodes are ordered by entity key, relationships by (source, target,
/// relation), so two snapshots of the same graph serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub nodes: Vec<GraphNode>,
    pub relationships: Vec<GraphEdge>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }

    pub fn to_json_pretty(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the snapshot as pretty JSON.
    ///
    /// The document goes to a sibling temp file first and is renamed into
    /// place, so readers of `path` never see a partial write.
    pub fn write_to(&self, path: &Path) -> Result<(), SnapshotError> {
        let json = self.to_json_pretty()?;
        let io_err = |source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    /// Reads a snapshot written by [`write_to`](Self::write_to).
    pub fn read_from(path: &Path) -> Result<Self, SnapshotError> {
        let bytes = fs::read(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{EdgeProperties, Relation};
    use kubegraph_core::{EntityKey, ResourceKind};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn sample() -> Snapshot {
        let pod = EntityKey::new(ResourceKind::Pod, "default", "p1");
        let node = EntityKey::cluster(ResourceKind::Node, "n1");
        Snapshot {
            nodes: vec![
                GraphNode {
                    key: pod.clone(),
                    properties: BTreeMap::from([("status".to_string(), "Running".to_string())]),
                    revision: 1,
                },
                GraphNode {
                    key: node.clone(),
                    properties: BTreeMap::new(),
                    revision: 1,
                },
            ],
            relationships: vec![GraphEdge {
                source: pod,
                target: node,
                relation: Relation::RunsOn,
                properties: EdgeProperties::new(),
                revision: 1,
            }],
        }
    }

    #[test]
    fn test_document_shape() {
        let json = serde_json::to_value(sample()).unwrap();

        assert_eq!(json["nodes"][0]["key"]["name"], "p1");
        assert_eq!(json["nodes"][0]["key"]["type"], "Pod");
        assert_eq!(json["nodes"][0]["properties"]["status"], "Running");
        assert_eq!(json["relationships"][0]["relationshipType"], "runs_on");
        assert_eq!(json["relationships"][0]["target"]["namespace"], "");
        assert_eq!(json["relationships"][0]["revision"], 1);
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("graph.json");

        let snapshot = sample();
        snapshot.write_to(&path).unwrap();

        let loaded = Snapshot::read_from(&path).unwrap();
        assert_eq!(loaded, snapshot);
        assert!(!dir.path().join("out").join("graph.json.tmp").exists());
    }
}
