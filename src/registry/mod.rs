//! Node Registry
//!
//! Authoritative list of storage nodes. Nodes are only ever added; each one
//! gets a `minio<N>` alias from a monotonic counter and is persisted through
//! the [`RegistryStore`] port before it becomes visible in memory.
//!
//! # Alias allocation
//!
//! Every entry of an `add_nodes` call takes the next alias before its
//! registration is attempted. A failed entry burns its alias; the counter
//! never goes back. After a restart the counter resumes at the highest
//! persisted suffix plus one.
//!
//! # Duplicate addresses
//!
//! An address is reserved before its registration is attempted and stays
//! reserved until the node is visible in memory or the attempt is dropped.
//! A second entry for the same address, in the same call or a concurrent
//! one, fails instead of registering the node twice.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    Alias, Credentials, Node, NodeId, NodeRecord, NodeSpec, NodeTransport, RegistryStore,
};
use crate::error::{Error, Result};

/// In-memory node table backed by a durable store.
pub struct NodeRegistry {
    nodes: RwLock<Vec<Node>>,
    /// Addresses with an add in flight
    pending: Mutex<HashSet<NodeId>>,
    next_alias: AtomicU64,
    store: Arc<dyn RegistryStore>,
    transport: Arc<dyn NodeTransport>,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("nodes", &*self.nodes.read())
            .finish_non_exhaustive()
    }
}

/// Holds an address in `pending` until dropped.
struct Reservation<'a> {
    registry: &'a NodeRegistry,
    id: NodeId,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.registry.pending.lock().remove(&self.id);
    }
}

impl NodeRegistry {
    /// Rebuild the registry from the store.
    ///
    /// Every loaded node is registered with the transport again; a node that
    /// refuses is logged and kept.
    #[instrument(skip_all)]
    pub async fn bootstrap(
        store: Arc<dyn RegistryStore>,
        transport: Arc<dyn NodeTransport>,
    ) -> Result<Self> {
        let nodes = store
            .load()
            .await?
            .iter()
            .map(decode_record)
            .collect::<Result<Vec<_>>>()?;

        let next_alias = nodes
            .iter()
            .filter_map(|n| n.alias.suffix())
            .max()
            .map_or(1, |max| max + 1);

        let outcomes =
            futures::future::join_all(nodes.iter().map(|node| transport.register(node))).await;
        for (node, outcome) in nodes.iter().zip(outcomes) {
            if let Err(e) = outcome {
                warn!(node = %node.id, alias = %node.alias, error = %e, "Re-registration failed");
            }
        }

        info!(nodes = nodes.len(), next_alias, "Registry loaded");

        Ok(Self {
            nodes: RwLock::new(nodes),
            pending: Mutex::new(HashSet::new()),
            next_alias: AtomicU64::new(next_alias),
            store,
            transport,
        })
    }

    /// Register and persist new nodes.
    ///
    /// Returns the URLs of entries that could not be added. A persistence
    /// failure aborts the whole call and leaves memory untouched.
    #[instrument(skip_all, fields(entries = specs.len()))]
    pub async fn add_nodes(&self, specs: Vec<NodeSpec>) -> Result<Vec<String>> {
        let attempts = specs.into_iter().map(|spec| {
            let alias = Alias::from_index(self.next_alias.fetch_add(1, Ordering::SeqCst));
            async move {
                let url = spec.url.clone();
                match self.register_one(spec, alias).await {
                    Ok(node) => Ok(node),
                    Err(e) => {
                        warn!(url = %url, error = %e, "Node not added");
                        Err(url)
                    }
                }
            }
        });
        // Aliases are taken in input order before anything is awaited.
        let attempts: Vec<_> = attempts.collect();
        let outcomes = futures::future::join_all(attempts).await;

        let mut added = Vec::new();
        // Released only after the nodes are visible in memory.
        let mut reservations = Vec::new();
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok((node, reservation)) => {
                    added.push(node);
                    reservations.push(reservation);
                }
                Err(url) => failed.push(url),
            }
        }

        if !added.is_empty() {
            let records: Vec<NodeRecord> = added.iter().map(encode_record).collect();
            self.store.append(&records).await?;

            for node in &added {
                info!(node = %node.id, alias = %node.alias, "Node added");
            }
            self.nodes.write().extend(added);
        }
        drop(reservations);

        Ok(failed)
    }

    async fn register_one(
        &self,
        spec: NodeSpec,
        alias: Alias,
    ) -> Result<(Node, Reservation<'_>)> {
        let node = Node::new(
            &spec.url,
            alias,
            Credentials::new(spec.access_key, spec.secret_key),
            spec.token,
        )?;

        let reservation = self.reserve(&node.id).ok_or_else(|| Error::RegistrationFailure {
            url: spec.url.clone(),
            reason: "node already registered".to_string(),
        })?;

        self.transport
            .register(&node)
            .await
            .map_err(|e| Error::RegistrationFailure {
                url: spec.url,
                reason: e.to_string(),
            })?;

        debug!(node = %node.id, alias = %node.alias, "Node registered");
        Ok((node, reservation))
    }

    /// Claim `id` unless it is already known or being added.
    fn reserve(&self, id: &NodeId) -> Option<Reservation<'_>> {
        let mut pending = self.pending.lock();
        if self.contains(id) || !pending.insert(id.clone()) {
            return None;
        }
        Some(Reservation {
            registry: self,
            id: id.clone(),
        })
    }

    /// Copy of every node, in the order they were added.
    pub fn snapshot(&self) -> Vec<Node> {
        self.nodes.read().clone()
    }

    pub fn get(&self, id: &NodeId) -> Option<Node> {
        self.nodes.read().iter().find(|n| &n.id == id).cloned()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.read().iter().any(|n| &n.id == id)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Alias the next added node will receive.
    pub fn next_alias(&self) -> Alias {
        Alias::from_index(self.next_alias.load(Ordering::SeqCst))
    }

    /// Rewrite the store with one record per known node.
    pub async fn compact(&self) -> Result<usize> {
        let records: Vec<NodeRecord> = self.nodes.read().iter().map(encode_record).collect();
        self.store.compact(&records).await?;
        Ok(records.len())
    }
}

fn encode_record(node: &Node) -> NodeRecord {
    NodeRecord {
        site: node.id.to_string(),
        alias: node.alias.to_string(),
        token: node.metrics_token.clone(),
        access_key: BASE64.encode(&node.credentials.access_key),
        secret_key: BASE64.encode(&node.credentials.secret_key),
    }
}

fn decode_record(record: &NodeRecord) -> Result<Node> {
    let decode = |field: &str, value: &str| -> Result<String> {
        let bytes = BASE64.decode(value).map_err(|e| Error::Credentials {
            url: record.site.clone(),
            reason: format!("{field}: {e}"),
        })?;
        String::from_utf8(bytes).map_err(|e| Error::Credentials {
            url: record.site.clone(),
            reason: format!("{field}: {e}"),
        })
    };

    Node::new(
        &record.site,
        Alias(record.alias.clone()),
        Credentials::new(
            decode("access_key", &record.access_key)?,
            decode("secret_key", &record.secret_key)?,
        ),
        record.token.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryTransport, MemoryRegistryStore};
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn spec(url: &str) -> NodeSpec {
        NodeSpec {
            url: url.to_string(),
            token: "token".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minio-secret".to_string(),
        }
    }

    async fn registry(
        transport: Arc<InMemoryTransport>,
        store: Arc<MemoryRegistryStore>,
    ) -> NodeRegistry {
        NodeRegistry::bootstrap(store, transport).await.unwrap()
    }

    #[tokio::test]
    async fn test_add_assigns_sequential_aliases() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.add_node("http://a:9000", 100);
        transport.add_node("http://b:9000", 100);
        let store = Arc::new(MemoryRegistryStore::new());
        let registry = registry(transport, store.clone()).await;

        let failed = registry
            .add_nodes(vec![spec("http://a:9000"), spec("http://b:9000")])
            .await
            .unwrap();

        assert!(failed.is_empty());
        let aliases: Vec<String> = registry
            .snapshot()
            .iter()
            .map(|n| n.alias.to_string())
            .collect();
        assert_eq!(aliases, vec!["minio1", "minio2"]);
        assert_eq!(store.records().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_entry_consumes_alias_and_is_not_persisted() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.add_node("http://a:9000", 100);
        transport.add_node("http://c:9000", 100);
        transport.reject_registration("http://b:9000");
        let store = Arc::new(MemoryRegistryStore::new());
        let registry = registry(transport, store.clone()).await;

        let failed = registry
            .add_nodes(vec![
                spec("http://a:9000"),
                spec("http://b:9000"),
                spec("http://c:9000"),
            ])
            .await
            .unwrap();

        assert_eq!(failed, vec!["http://b:9000".to_string()]);
        let c = registry.get(&NodeId::from("http://c:9000")).unwrap();
        assert_eq!(c.alias.as_str(), "minio3");
        assert!(store.records().iter().all(|r| r.site != "http://b:9000"));
        assert_eq!(registry.next_alias().as_str(), "minio4");
    }

    #[tokio::test]
    async fn test_invalid_url_is_reported() {
        let transport = Arc::new(InMemoryTransport::new());
        let registry = registry(transport, Arc::new(MemoryRegistryStore::new())).await;

        let failed = registry.add_nodes(vec![spec("not a url")]).await.unwrap();
        assert_eq!(failed, vec!["not a url".to_string()]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_address_is_rejected() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.add_node("http://a:9000", 100);
        let registry = registry(transport, Arc::new(MemoryRegistryStore::new())).await;

        registry.add_nodes(vec![spec("http://a:9000")]).await.unwrap();
        let failed = registry
            .add_nodes(vec![spec("http://a:9000/")])
            .await
            .unwrap();

        assert_eq!(failed.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_address_in_one_call_is_added_once() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.add_node("http://a:9000", 100);
        let store = Arc::new(MemoryRegistryStore::new());
        let registry = registry(transport, store.clone()).await;

        let failed = registry
            .add_nodes(vec![spec("http://a:9000"), spec("http://a:9000/")])
            .await
            .unwrap();

        assert_eq!(failed, vec!["http://a:9000/".to_string()]);
        assert_eq!(registry.len(), 1);
        assert_eq!(store.records().len(), 1);
        let a = registry.get(&NodeId::from("http://a:9000")).unwrap();
        assert_eq!(a.alias.as_str(), "minio1");
        assert_eq!(registry.next_alias().as_str(), "minio3");
    }

    #[tokio::test]
    async fn test_concurrent_adds_of_one_address_register_once() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.add_node("http://a:9000", 100);
        transport.delay_register("http://a:9000", Duration::from_millis(20));
        let store = Arc::new(MemoryRegistryStore::new());
        let registry = registry(transport, store.clone()).await;

        let (first, second) = tokio::join!(
            registry.add_nodes(vec![spec("http://a:9000")]),
            registry.add_nodes(vec![spec("http://a:9000")]),
        );

        let failures = first.unwrap().len() + second.unwrap().len();
        assert_eq!(failures, 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_registration_releases_address() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.reject_registration("http://a:9000");
        let registry = registry(transport.clone(), Arc::new(MemoryRegistryStore::new())).await;

        let failed = registry.add_nodes(vec![spec("http://a:9000")]).await.unwrap();
        assert_eq!(failed.len(), 1);

        transport.add_node("http://a:9000", 100);
        transport.accept_registration("http://a:9000");
        let failed = registry.add_nodes(vec![spec("http://a:9000")]).await.unwrap();
        assert!(failed.is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_fatal() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.add_node("http://a:9000", 100);
        let store = Arc::new(MemoryRegistryStore::new());
        let registry = registry(transport, store.clone()).await;
        store.fail_appends(true);

        let result = registry.add_nodes(vec![spec("http://a:9000")]).await;

        assert_matches!(result, Err(Error::Io(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_restores_nodes_and_counter() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.add_node("http://a:9000", 100);
        let records = vec![
            NodeRecord {
                site: "http://a:9000".into(),
                alias: "minio2".into(),
                token: "t".into(),
                access_key: BASE64.encode("ak"),
                secret_key: BASE64.encode("sk"),
            },
            NodeRecord {
                site: "http://gone:9000".into(),
                alias: "minio7".into(),
                token: "t".into(),
                access_key: BASE64.encode("ak"),
                secret_key: BASE64.encode("sk"),
            },
        ];
        let store = Arc::new(MemoryRegistryStore::with_records(records));

        let registry = registry(transport, store).await;

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.next_alias().as_str(), "minio8");
        let a = registry.get(&NodeId::from("http://a:9000")).unwrap();
        assert_eq!(a.credentials, Credentials::new("ak", "sk"));
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_undecodable_credentials() {
        let store = Arc::new(MemoryRegistryStore::with_records(vec![NodeRecord {
            site: "http://a:9000".into(),
            alias: "minio1".into(),
            token: "t".into(),
            access_key: "***".into(),
            secret_key: BASE64.encode("sk"),
        }]));

        let result = NodeRegistry::bootstrap(store, Arc::new(InMemoryTransport::new())).await;
        assert_matches!(result, Err(Error::Credentials { .. }));
    }

    #[tokio::test]
    async fn test_credentials_are_encoded_at_rest() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.add_node("http://a:9000", 100);
        let store = Arc::new(MemoryRegistryStore::new());
        let registry = registry(transport, store.clone()).await;

        registry.add_nodes(vec![spec("http://a:9000")]).await.unwrap();

        let record = &store.records()[0];
        assert_eq!(record.access_key, BASE64.encode("minioadmin"));
        assert_ne!(record.secret_key, "minio-secret");
        assert_eq!(record.token, "token");
    }

    #[tokio::test]
    async fn test_compact_rewrites_known_nodes() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.add_node("http://a:9000", 100);
        let store = Arc::new(MemoryRegistryStore::new());
        let registry = registry(transport, store.clone()).await;
        registry.add_nodes(vec![spec("http://a:9000")]).await.unwrap();

        assert_eq!(registry.compact().await.unwrap(), 1);
        assert_eq!(store.records().len(), 1);
    }
}
