//! Property graph projection of scan sessions.
//!
//! Rows from the relational store are projected into any backend that
//! implements [`GraphBackend`]. Upserts are keyed deterministically, so a
//! repeated commit converges on the same graph, and [`GraphCommitter::verify`]
//! compares what the store expects with what the backend holds.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

mod commit;
mod error;
mod memory;
mod retry;
mod surreal;

pub use commit::{CommitMode, CommitSummary, GraphCommitter, PENDING_ROWS};
pub use error::GraphError;
pub use memory::MemoryGraph;
pub use retry::RetryPolicy;
pub use surreal::SurrealGraph;

use crate::config::{GraphConfig, StorageConfig};

pub const SCAN_LABEL: &str = "Scan";
pub const FOLDER_LABEL: &str = "Folder";
pub const FILE_LABEL: &str = "File";
pub const CONTAINS: &str = "CONTAINS";
pub const SCANNED_IN: &str = "SCANNED_IN";

/// Node and relationship properties.
pub type Props = Map<String, Value>;

/// Identifies a node by label and key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    pub label: String,
    pub key: String,
}

impl NodeRef {
    pub fn new(label: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
        }
    }
}

/// Adapter over a property graph store.
///
/// Upserts must be idempotent: the same `(label, key)` or
/// `(type, from, to)` always addresses the same element. Labels and
/// relationship types share one namespace for `count`.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn health(&self) -> bool;

    async fn upsert_node(&self, label: &str, key: &str, props: Props) -> Result<(), GraphError>;

    async fn upsert_relationship(
        &self,
        rel_type: &str,
        from: &NodeRef,
        to: &NodeRef,
        props: Props,
    ) -> Result<(), GraphError>;

    /// Nodes with `label_or_type` as label, or relationships of that type.
    async fn count(&self, label_or_type: &str) -> Result<u64, GraphError>;

    /// Like `count`, restricted to elements whose `scan_id` is `scan_id`.
    async fn count_in_scan(&self, label_or_type: &str, scan_id: &str) -> Result<u64, GraphError>;
}

/// Open the backend named by `config.backend`.
pub async fn open_backend(
    config: &GraphConfig,
    storage: &StorageConfig,
) -> Result<Arc<dyn GraphBackend>, GraphError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryGraph::new())),
        "surreal" => {
            let path = config.resolved_path(storage);
            info!("Opening graph at {}", path.display());
            Ok(Arc::new(SurrealGraph::open(&path).await?))
        }
        other => Err(GraphError::UnknownBackend(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory_backend() {
        let config = GraphConfig {
            backend: "memory".to_string(),
            ..Default::default()
        };
        let backend = open_backend(&config, &StorageConfig::default()).await.unwrap();
        assert_eq!(backend.name(), "memory");
        assert!(backend.health().await);
    }

    #[tokio::test]
    async fn test_unknown_backend() {
        let config = GraphConfig {
            backend: "neo4j".to_string(),
            ..Default::default()
        };
        let err = open_backend(&config, &StorageConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GraphError::UnknownBackend(_)));
    }
}
