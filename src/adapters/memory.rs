//! In-Memory Adapters
//!
//! Process-local implementations of the domain ports for tests and local
//! experiments. [`InMemoryTransport`] simulates a fleet of storage nodes
//! whose health, capacity and failures can be scripted;
//! [`MemoryRegistryStore`] keeps registry records in a vector.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::domain::{
    Node, NodeId, NodeRecord, NodeTransport, ObjectHeaders, PingStatus, PutObject, RegistryStore,
    SearchPredicate, StoredObject,
};
use crate::error::{Error, Result};
use crate::fleet::DEFAULT_CAPACITY_METRIC;

/// Bucket used by the simulated nodes.
pub const MEMORY_BUCKET: &str = "dataspace";

#[derive(Debug, Clone)]
struct MemoryObject {
    key: String,
    body: Bytes,
    content_type: String,
    tags: BTreeMap<String, String>,
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct MemoryNode {
    free_bytes: u64,
    unhealthy: bool,
    ping_delay: Option<Duration>,
    register_delay: Option<Duration>,
    metrics_status: Option<u16>,
    metrics_payload: Option<String>,
    fail_find: bool,
    fail_put: bool,
    objects: Vec<MemoryObject>,
}

/// Simulated storage fleet.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    nodes: RwLock<BTreeMap<NodeId, MemoryNode>>,
    rejected: RwLock<HashSet<NodeId>>,
}

fn node_key(url: &str) -> NodeId {
    NodeId::new(url.trim_end_matches('/'))
}

fn status(node: &Node, operation: &'static str, status: u16) -> Error {
    Error::NodeStatus {
        node: node.id.to_string(),
        operation,
        status,
    }
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a healthy node with the given free capacity.
    pub fn add_node(&self, url: &str, free_bytes: u64) {
        self.nodes.write().insert(
            node_key(url),
            MemoryNode {
                free_bytes,
                ..Default::default()
            },
        );
    }

    /// Make alias registration against `url` fail.
    pub fn reject_registration(&self, url: &str) {
        self.rejected.write().insert(node_key(url));
    }

    pub fn accept_registration(&self, url: &str) {
        self.rejected.write().remove(&node_key(url));
    }

    pub fn set_healthy(&self, url: &str, healthy: bool) {
        self.with_node(url, |n| n.unhealthy = !healthy);
    }

    /// Delay every ping to `url` by `delay`.
    pub fn delay_ping(&self, url: &str, delay: Duration) {
        self.with_node(url, |n| n.ping_delay = Some(delay));
    }

    /// Delay every registration against `url` by `delay`.
    pub fn delay_register(&self, url: &str, delay: Duration) {
        self.with_node(url, |n| n.register_delay = Some(delay));
    }

    pub fn set_free_bytes(&self, url: &str, free_bytes: u64) {
        self.with_node(url, |n| n.free_bytes = free_bytes);
    }

    /// Answer metrics requests with a non-success HTTP status.
    pub fn set_metrics_status(&self, url: &str, code: u16) {
        self.with_node(url, |n| n.metrics_status = Some(code));
    }

    /// Answer metrics requests with a fixed payload.
    pub fn set_metrics_payload(&self, url: &str, payload: &str) {
        self.with_node(url, |n| n.metrics_payload = Some(payload.to_string()));
    }

    pub fn fail_find(&self, url: &str) {
        self.with_node(url, |n| n.fail_find = true);
    }

    pub fn fail_put(&self, url: &str) {
        self.with_node(url, |n| n.fail_put = true);
    }

    /// Store an object directly, bypassing placement.
    pub fn insert_object(&self, url: &str, key: &str, content_type: &str, tags: &[(&str, &str)]) {
        let object = MemoryObject {
            key: key.to_string(),
            body: Bytes::new(),
            content_type: content_type.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            metadata: BTreeMap::new(),
        };
        self.with_node(url, |n| upsert(&mut n.objects, object));
    }

    /// Set user metadata `x-amz-meta-<name>` on an object.
    pub fn set_object_metadata(&self, url: &str, key: &str, name: &str, value: &str) {
        self.with_node(url, |n| {
            if let Some(object) = n.objects.iter_mut().find(|o| o.key == key) {
                object
                    .metadata
                    .insert(name.to_lowercase(), value.to_string());
            }
        });
    }

    /// Keys stored on a node, in insertion order.
    pub fn objects(&self, url: &str) -> Vec<String> {
        self.nodes
            .read()
            .get(&node_key(url))
            .map(|n| n.objects.iter().map(|o| o.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Stored body of an object.
    pub fn object_body(&self, url: &str, key: &str) -> Option<Bytes> {
        self.nodes
            .read()
            .get(&node_key(url))
            .and_then(|n| n.objects.iter().find(|o| o.key == key))
            .map(|o| o.body.clone())
    }

    pub fn free_bytes(&self, url: &str) -> Option<u64> {
        self.nodes.read().get(&node_key(url)).map(|n| n.free_bytes)
    }

    fn with_node(&self, url: &str, f: impl FnOnce(&mut MemoryNode)) {
        if let Some(node) = self.nodes.write().get_mut(&node_key(url)) {
            f(node);
        }
    }

    fn read_node<T>(
        &self,
        node: &Node,
        operation: &'static str,
        f: impl FnOnce(&MemoryNode) -> Result<T>,
    ) -> Result<T> {
        match self.nodes.read().get(&node.id) {
            Some(n) => f(n),
            None => Err(status(node, operation, 503)),
        }
    }

    fn object<T>(
        &self,
        node: &Node,
        key: &str,
        operation: &'static str,
        f: impl FnOnce(&MemoryObject) -> T,
    ) -> Result<T> {
        self.read_node(node, operation, |n| {
            n.objects
                .iter()
                .find(|o| o.key == key)
                .map(f)
                .ok_or_else(|| status(node, operation, 404))
        })
    }
}

fn upsert(objects: &mut Vec<MemoryObject>, object: MemoryObject) {
    match objects.iter_mut().find(|o| o.key == object.key) {
        Some(existing) => *existing = object,
        None => objects.push(object),
    }
}

#[async_trait]
impl NodeTransport for InMemoryTransport {
    async fn register(&self, node: &Node) -> Result<()> {
        if self.rejected.read().contains(&node.id) {
            return Err(status(node, "register", 403));
        }
        let delay = self.read_node(node, "register", |n| Ok(n.register_delay))?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn ping(&self, node: &Node) -> Result<PingStatus> {
        let (delay, unhealthy) =
            self.read_node(node, "ping", |n| Ok((n.ping_delay, n.unhealthy)))?;

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(if unhealthy {
            PingStatus::Unhealthy
        } else {
            PingStatus::Healthy
        })
    }

    async fn metrics(&self, node: &Node) -> Result<String> {
        self.read_node(node, "metrics", |n| {
            if let Some(code) = n.metrics_status {
                return Err(status(node, "metrics", code));
            }
            if let Some(payload) = &n.metrics_payload {
                return Ok(payload.clone());
            }
            Ok(format!(
                "# TYPE {metric} gauge\n{metric}{{server=\"127.0.0.1:9000\"}} {value:e}\n",
                metric = DEFAULT_CAPACITY_METRIC,
                value = n.free_bytes as f64
            ))
        })
    }

    async fn find(&self, node: &Node, predicate: &SearchPredicate) -> Result<Vec<String>> {
        self.read_node(node, "find", |n| {
            if n.fail_find {
                return Err(status(node, "find", 500));
            }
            Ok(n.objects
                .iter()
                .filter(|o| {
                    predicate.matches_name(&o.key)
                        && predicate.matches_tags(&o.tags)
                        && predicate.matches_content_type(Some(&o.content_type))
                })
                .map(|o| format!("{MEMORY_BUCKET}/{}", o.key))
                .collect())
        })
    }

    async fn put(&self, node: &Node, object: PutObject) -> Result<StoredObject> {
        let mut nodes = self.nodes.write();
        let target = nodes
            .get_mut(&node.id)
            .ok_or_else(|| status(node, "put", 503))?;
        if target.fail_put {
            return Err(status(node, "put", 500));
        }

        target.free_bytes = target.free_bytes.saturating_sub(object.size());
        let path = format!("{MEMORY_BUCKET}/{}", object.key);
        upsert(
            &mut target.objects,
            MemoryObject {
                key: object.key,
                body: object.body,
                content_type: object.content_type,
                tags: object.tags,
                metadata: BTreeMap::new(),
            },
        );

        Ok(StoredObject {
            path,
            node: node.id.clone(),
        })
    }

    async fn stat(&self, node: &Node, key: &str) -> Result<ObjectHeaders> {
        self.object(node, key, "stat", |o| {
            let mut headers = ObjectHeaders::new();
            headers.insert("content-type".into(), o.content_type.clone());
            headers.insert("content-length".into(), o.body.len().to_string());
            if !o.tags.is_empty() {
                headers.insert("x-amz-tagging-count".into(), o.tags.len().to_string());
            }
            for (name, value) in &o.metadata {
                headers.insert(format!("x-amz-meta-{name}"), value.clone());
            }
            headers
        })
    }

    async fn tags(&self, node: &Node, key: &str) -> Result<BTreeMap<String, String>> {
        self.object(node, key, "tags", |o| o.tags.clone())
    }

    async fn presign_get(&self, node: &Node, key: &str, expires: Duration) -> Result<String> {
        self.object(node, key, "presign", |_| {
            format!(
                "{}/{MEMORY_BUCKET}/{key}?X-Amz-Expires={}",
                node.id,
                expires.as_secs()
            )
        })
    }
}

// =============================================================================
// Registry Store
// =============================================================================

/// Registry records kept in memory.
#[derive(Debug, Default)]
pub struct MemoryRegistryStore {
    records: RwLock<Vec<NodeRecord>>,
    fail_appends: AtomicBool,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<NodeRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            fail_appends: AtomicBool::new(false),
        }
    }

    /// Make subsequent appends fail with an I/O error.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<NodeRecord> {
        self.records.read().clone()
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn load(&self) -> Result<Vec<NodeRecord>> {
        Ok(self.records())
    }

    async fn append(&self, records: &[NodeRecord]) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("registry append refused")));
        }
        self.records.write().extend_from_slice(records);
        Ok(())
    }

    async fn compact(&self, records: &[NodeRecord]) -> Result<()> {
        *self.records.write() = records.to_vec();
        Ok(())
    }
}
