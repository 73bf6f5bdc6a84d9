//! Embedded SurrealDB graph backend (RocksDB storage).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::Path;
use surrealdb::engine::local::{Db, RocksDb};
use surrealdb::Surreal;
use tracing::debug;

use super::{GraphBackend, GraphError, NodeRef, Props};

/// Persistent graph in an embedded SurrealDB.
///
/// Every label and relationship type gets its own table. Record ids are the
/// SHA-256 of the element's identity, so an upsert always lands on the same
/// record. Relationships are plain records carrying `from` and `to` keys
/// rather than SurrealDB graph edges, which keeps upserts a single statement.
pub struct SurrealGraph {
    db: Surreal<Db>,
}

#[derive(Deserialize)]
struct CountRow {
    count: i64,
}

impl SurrealGraph {
    /// Open or create a graph at `path`.
    pub async fn open(path: &Path) -> Result<Self, GraphError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GraphError::Backend(format!("{}: {}", parent.display(), e)))?;
        }
        let db = Surreal::new::<RocksDb>(path).await?;
        db.use_ns("strata").use_db("graph").await?;
        debug!("Opened SurrealDB graph at {}", path.display());
        Ok(Self { db })
    }

    async fn upsert(&self, table: String, id: String, props: Props) -> Result<(), GraphError> {
        self.db
            .query("UPSERT type::thing($table, $id) MERGE $props")
            .bind(("table", table))
            .bind(("id", id))
            .bind(("props", Value::Object(props)))
            .await?
            .check()?;
        Ok(())
    }

    async fn tally(&self, name: &str, scan_id: Option<&str>) -> Result<u64, GraphError> {
        let mut response = match scan_id {
            Some(scan) => {
                self.db
                    .query(
                        "SELECT count() AS count FROM type::table($table)
                         WHERE scan_id = $scan GROUP ALL",
                    )
                    .bind(("table", table_name(name)))
                    .bind(("scan", scan.to_string()))
                    .await?
            }
            None => {
                self.db
                    .query("SELECT count() AS count FROM type::table($table) GROUP ALL")
                    .bind(("table", table_name(name)))
                    .await?
            }
        };
        let row: Option<CountRow> = response.take(0)?;
        Ok(row.map(|r| r.count.max(0) as u64).unwrap_or(0))
    }
}

/// Table for a label or relationship type.
fn table_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    format!("g_{}", cleaned)
}

fn record_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[async_trait]
impl GraphBackend for SurrealGraph {
    fn name(&self) -> &str {
        "surreal"
    }

    async fn health(&self) -> bool {
        self.db.health().await.is_ok()
    }

    async fn upsert_node(&self, label: &str, key: &str, mut props: Props) -> Result<(), GraphError> {
        props.insert("key".to_string(), json!(key));
        self.upsert(table_name(label), record_id(&[label, key]), props)
            .await
    }

    async fn upsert_relationship(
        &self,
        rel_type: &str,
        from: &NodeRef,
        to: &NodeRef,
        mut props: Props,
    ) -> Result<(), GraphError> {
        props.insert("from".to_string(), json!(from));
        props.insert("to".to_string(), json!(to));
        let id = record_id(&[rel_type, &from.label, &from.key, &to.label, &to.key]);
        self.upsert(table_name(rel_type), id, props).await
    }

    async fn count(&self, label_or_type: &str) -> Result<u64, GraphError> {
        self.tally(label_or_type, None).await
    }

    async fn count_in_scan(&self, label_or_type: &str, scan_id: &str) -> Result<u64, GraphError> {
        self.tally(label_or_type, Some(scan_id)).await
    }
}
