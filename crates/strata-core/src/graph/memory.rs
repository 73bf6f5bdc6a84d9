//! In-process graph backend.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use super::{GraphBackend, GraphError, NodeRef, Props};

type RelKey = (String, NodeRef, NodeRef);

/// Graph held in memory. Used by tests and ephemeral runs; nothing
/// survives the process.
///
/// Failure injection (`set_healthy`, `fail_next`, `with_latency`) lets
/// callers exercise retry and timeout paths.
#[derive(Debug)]
pub struct MemoryGraph {
    nodes: RwLock<HashMap<(String, String), Props>>,
    relationships: RwLock<HashMap<RelKey, Props>>,
    healthy: AtomicBool,
    failures: AtomicU32,
    latency: Option<Duration>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            relationships: RwLock::new(HashMap::new()),
            healthy: AtomicBool::new(true),
            failures: AtomicU32::new(0),
            latency: None,
        }
    }

    /// Delay every data call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Make the next `n` data calls fail with a backend error.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn node(&self, label: &str, key: &str) -> Option<Props> {
        let nodes = self.nodes.read().unwrap_or_else(|p| p.into_inner());
        nodes.get(&(label.to_string(), key.to_string())).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    async fn enter(&self) -> Result<(), GraphError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(GraphError::Backend("injected failure".to_string()));
        }
        Ok(())
    }

    fn tally(&self, name: &str, scan_id: Option<&str>) -> u64 {
        let in_scan = |props: &Props| match scan_id {
            Some(id) => props.get("scan_id").and_then(Value::as_str) == Some(id),
            None => true,
        };

        let nodes = self.nodes.read().unwrap_or_else(|p| p.into_inner());
        let rels = self
            .relationships
            .read()
            .unwrap_or_else(|p| p.into_inner());
        let n = nodes
            .iter()
            .filter(|((label, _), props)| label == name && in_scan(props))
            .count();
        let r = rels
            .iter()
            .filter(|((rel_type, _, _), props)| rel_type == name && in_scan(props))
            .count();
        (n + r) as u64
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

fn merge(target: &mut Props, props: Props) {
    for (k, v) in props {
        target.insert(k, v);
    }
}

#[async_trait]
impl GraphBackend for MemoryGraph {
    fn name(&self) -> &str {
        "memory"
    }

    async fn health(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn upsert_node(&self, label: &str, key: &str, props: Props) -> Result<(), GraphError> {
        self.enter().await?;
        let mut nodes = self.nodes.write().unwrap_or_else(|p| p.into_inner());
        merge(
            nodes
                .entry((label.to_string(), key.to_string()))
                .or_default(),
            props,
        );
        Ok(())
    }

    async fn upsert_relationship(
        &self,
        rel_type: &str,
        from: &NodeRef,
        to: &NodeRef,
        props: Props,
    ) -> Result<(), GraphError> {
        self.enter().await?;
        let mut rels = self
            .relationships
            .write()
            .unwrap_or_else(|p| p.into_inner());
        merge(
            rels.entry((rel_type.to_string(), from.clone(), to.clone()))
                .or_default(),
            props,
        );
        Ok(())
    }

    async fn count(&self, label_or_type: &str) -> Result<u64, GraphError> {
        self.enter().await?;
        Ok(self.tally(label_or_type, None))
    }

    async fn count_in_scan(&self, label_or_type: &str, scan_id: &str) -> Result<u64, GraphError> {
        self.enter().await?;
        Ok(self.tally(label_or_type, Some(scan_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(scan: &str) -> Props {
        let mut p = Props::new();
        p.insert("scan_id".to_string(), json!(scan));
        p
    }

    #[tokio::test]
    async fn test_upserts_are_idempotent() {
        let graph = MemoryGraph::new();
        graph.upsert_node("File", "s1:/a", props("s1")).await.unwrap();
        graph.upsert_node("File", "s1:/a", props("s1")).await.unwrap();
        graph.upsert_node("File", "s2:/a", props("s2")).await.unwrap();

        let from = NodeRef::new("Folder", "s1:/");
        let to = NodeRef::new("File", "s1:/a");
        graph
            .upsert_relationship("CONTAINS", &from, &to, props("s1"))
            .await
            .unwrap();
        graph
            .upsert_relationship("CONTAINS", &from, &to, props("s1"))
            .await
            .unwrap();

        assert_eq!(graph.count("File").await.unwrap(), 2);
        assert_eq!(graph.count_in_scan("File", "s1").await.unwrap(), 1);
        assert_eq!(graph.count("CONTAINS").await.unwrap(), 1);
        assert_eq!(graph.count_in_scan("Folder", "s1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_merges_props() {
        let graph = MemoryGraph::new();
        graph.upsert_node("File", "k", props("s1")).await.unwrap();
        let mut more = Props::new();
        more.insert("size".to_string(), json!(3));
        graph.upsert_node("File", "k", more).await.unwrap();

        let node = graph.node("File", "k").unwrap();
        assert_eq!(node["scan_id"], "s1");
        assert_eq!(node["size"], 3);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let graph = MemoryGraph::new();
        graph.fail_next(1);
        assert!(graph.count("File").await.is_err());
        assert!(graph.count("File").await.is_ok());

        graph.set_healthy(false);
        assert!(!graph.health().await);
    }
}
