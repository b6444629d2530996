//! Fleet Coordinator
//!
//! Entry point for every caller-facing operation. A coordinator is built
//! once at startup with [`Coordinator::bootstrap`] and shared via `Arc`.
//!
//! # Flow
//!
//! ```text
//! place_and_store:
//!   registry ─▶ probe ─▶ capacity samples ─▶ choose ─▶ put
//!
//! search_* / list_all:
//!   registry ─▶ probe ─▶ find on every healthy node ─▶ merge
//!
//! list_all_with_details:
//!   list_all ─▶ filter keys ─▶ describe every object
//! ```
//!
//! Health is recomputed for every request; nothing about node liveness is
//! cached between calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::domain::{
    Node, NodeId, NodeSpec, NodeTransport, PutObject, RegistryStore, SearchPredicate,
    StoredObject,
};
use crate::error::{Error, Result};
use crate::fleet::{
    CapacityOracle, DetailedObject, FleetConfig, HealthProber, HealthyNodes, MetadataFetcher,
    PlacementEngine, PlacementPolicy, SearchAggregator, SearchResult,
};
use crate::registry::NodeRegistry;
use crate::telemetry::{
    FleetMetrics, OUTCOME_NO_DESTINATION, OUTCOME_STORED, OUTCOME_TRANSFER_FAILED,
};

/// Content type used when an upload does not name one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Object handed to [`Coordinator::place_and_store`].
#[derive(Debug, Clone)]
pub struct Upload {
    pub key: String,
    pub body: Bytes,
    pub content_type: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl Upload {
    pub fn new(key: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            body: body.into(),
            content_type: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

/// Coordinates the storage fleet.
pub struct Coordinator {
    config: FleetConfig,
    registry: NodeRegistry,
    prober: HealthProber,
    capacity: CapacityOracle,
    placement: PlacementEngine,
    search: SearchAggregator,
    metadata: MetadataFetcher,
    transport: Arc<dyn NodeTransport>,
    metrics: FleetMetrics,
}

impl Coordinator {
    /// Load the registry and assemble every fleet component.
    pub async fn bootstrap(
        config: FleetConfig,
        policy: PlacementPolicy,
        transport: Arc<dyn NodeTransport>,
        store: Arc<dyn RegistryStore>,
    ) -> Result<Self> {
        let registry = NodeRegistry::bootstrap(store, transport.clone()).await?;
        let metrics = FleetMetrics::new()?;
        metrics.set_registered(registry.len());

        info!(
            nodes = registry.len(),
            max_concurrency = config.max_concurrency,
            allow_overcommit = policy.allow_overcommit,
            "Coordinator ready"
        );

        Ok(Self {
            prober: HealthProber::new(transport.clone(), config.clone()),
            capacity: CapacityOracle::new(transport.clone(), config.clone()),
            placement: PlacementEngine::new(policy),
            search: SearchAggregator::new(transport.clone(), config.clone()),
            metadata: MetadataFetcher::new(transport.clone(), config.clone()),
            config,
            registry,
            transport,
            metrics,
        })
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &FleetMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Add nodes; returns the URLs that could not be added.
    pub async fn add_nodes(&self, specs: Vec<NodeSpec>) -> Result<Vec<String>> {
        let failed = self.registry.add_nodes(specs).await?;
        self.metrics.set_registered(self.registry.len());
        Ok(failed)
    }

    // =========================================================================
    // Health
    // =========================================================================

    /// Probe every registered node.
    pub async fn fleet_health(&self) -> HealthyNodes {
        let healthy = self.prober.probe(&self.registry.snapshot()).await;
        self.metrics.record_probe(healthy.len());
        healthy
    }

    // =========================================================================
    // Search
    // =========================================================================

    pub async fn search_by_tags(&self, tags: BTreeMap<String, String>) -> SearchResult {
        self.search(SearchPredicate::Tags(tags)).await
    }

    pub async fn search_by_extension(&self, extension: &str) -> SearchResult {
        self.search(SearchPredicate::Extension(extension.to_string()))
            .await
    }

    pub async fn search_by_content_type(&self, content_type: &str) -> SearchResult {
        self.search(SearchPredicate::ContentType(content_type.to_string()))
            .await
    }

    /// Every object on every healthy node.
    pub async fn list_all(&self) -> SearchResult {
        self.search(SearchPredicate::All).await
    }

    async fn search(&self, predicate: SearchPredicate) -> SearchResult {
        self.metrics.record_search(predicate.kind());
        let healthy = self.fleet_health().await;
        if healthy.is_empty() {
            debug!(kind = predicate.kind(), "No healthy nodes, empty search result");
            return SearchResult::new();
        }
        self.search.search(&healthy, &predicate).await
    }

    /// Every object with its metadata. `filter` keeps only keys containing
    /// the given substring.
    pub async fn list_all_with_details(&self, filter: Option<&str>) -> Vec<DetailedObject> {
        self.metrics.record_search(SearchPredicate::All.kind());
        let healthy = self.fleet_health().await;
        let listing = self.search.search(&healthy, &SearchPredicate::All).await;

        let objects: Vec<(Node, String)> = listing
            .into_iter()
            .filter_map(|(id, keys)| healthy.get(&id).cloned().map(|node| (node, keys)))
            .flat_map(|(node, keys)| {
                keys.into_iter()
                    .filter(move |key| filter.map_or(true, |f| key.contains(f)))
                    .map(move |key| (node.clone(), key))
            })
            .collect();

        let mut detailed = self.metadata.describe_all(objects).await;
        detailed.sort_by(|a, b| (&a.source, &a.key).cmp(&(&b.source, &b.key)));
        detailed
    }

    // =========================================================================
    // Upload
    // =========================================================================

    /// Store an object on the healthy node with the most remaining room.
    pub async fn place_and_store(&self, upload: Upload) -> Result<StoredObject> {
        let upload_id = Uuid::new_v4();
        let span = info_span!("upload", %upload_id, key = %upload.key, size = upload.size());

        let result = self.place_and_store_inner(upload).instrument(span).await;
        let outcome = match &result {
            Ok(_) => OUTCOME_STORED,
            Err(Error::TransferFailed { .. }) => OUTCOME_TRANSFER_FAILED,
            Err(_) => OUTCOME_NO_DESTINATION,
        };
        self.metrics.record_placement(outcome);
        result
    }

    async fn place_and_store_inner(&self, upload: Upload) -> Result<StoredObject> {
        let size = upload.size();
        let healthy = self.fleet_health().await;
        if healthy.is_empty() {
            warn!("Upload refused, no healthy nodes");
            return Err(Error::NoHealthyNodes);
        }

        let samples = self.capacity.sample(&healthy, size).await;
        let chosen = self.placement.choose(&samples, size)?;
        let node = healthy
            .get(&chosen)
            .ok_or_else(|| Error::Internal(format!("chosen node {chosen} is not healthy")))?;

        debug!(node = %node.id, remaining = samples[&chosen], "Destination chosen");

        let object = PutObject {
            key: upload.key,
            body: upload.body,
            content_type: upload
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            tags: upload.tags,
        };

        let stored = self
            .transport
            .put(node, object)
            .await
            .map_err(|e| Error::TransferFailed {
                node: node.id.to_string(),
                reason: e.to_string(),
            })?;

        info!(node = %stored.node, path = %stored.path, "Object stored");
        Ok(stored)
    }

    // =========================================================================
    // Objects on a known node
    // =========================================================================

    /// Metadata and tags of one object.
    pub async fn describe(&self, node: &NodeId, key: &str) -> Result<DetailedObject> {
        let node = self.known_node(node)?;
        let details = self.metadata.describe(&node, key).await?;
        Ok(DetailedObject::new(node.id, key.to_string(), details))
    }

    /// Time-limited download link for an existing object.
    pub async fn dataset_link(&self, node: &NodeId, key: &str) -> Result<String> {
        let node = self.known_node(node)?;

        self.transport
            .stat(&node, key)
            .await
            .map_err(|e| Error::MetadataUnavailable {
                node: node.id.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        self.transport
            .presign_get(&node, key, self.config.link_expiry)
            .await
    }

    fn known_node(&self, id: &NodeId) -> Result<Node> {
        self.registry
            .get(id)
            .ok_or_else(|| Error::UnknownNode(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryTransport, MemoryRegistryStore};
    use assert_matches::assert_matches;

    const MB: u64 = 1024 * 1024;

    fn spec(url: &str) -> NodeSpec {
        NodeSpec {
            url: url.to_string(),
            token: "token".into(),
            access_key: "ak".into(),
            secret_key: "sk".into(),
        }
    }

    async fn coordinator(
        transport: Arc<InMemoryTransport>,
        policy: PlacementPolicy,
        urls: &[&str],
    ) -> Coordinator {
        let coordinator = Coordinator::bootstrap(
            FleetConfig::default(),
            policy,
            transport,
            Arc::new(MemoryRegistryStore::new()),
        )
        .await
        .unwrap();
        let failed = coordinator
            .add_nodes(urls.iter().map(|u| spec(u)).collect())
            .await
            .unwrap();
        assert!(failed.is_empty());
        coordinator
    }

    #[tokio::test]
    async fn test_upload_without_nodes_fails() {
        let transport = Arc::new(InMemoryTransport::new());
        let coordinator = coordinator(transport, PlacementPolicy::default(), &[]).await;

        let result = coordinator
            .place_and_store(Upload::new("a.bin", vec![0u8; 10]))
            .await;
        assert_matches!(result, Err(Error::NoHealthyNodes));
    }

    #[tokio::test]
    async fn test_upload_defaults_content_type() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.add_node("http://a:9000", 100 * MB);
        let coordinator =
            coordinator(transport.clone(), PlacementPolicy::default(), &["http://a:9000"]).await;

        coordinator
            .place_and_store(Upload::new("raw.bin", vec![1u8; 8]))
            .await
            .unwrap();

        let headers = transport
            .stat(
                &coordinator.registry().snapshot()[0],
                "raw.bin",
            )
            .await
            .unwrap();
        assert_eq!(headers["content-type"], DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_put_failure_is_transfer_failure() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.add_node("http://a:9000", 100 * MB);
        transport.fail_put("http://a:9000");
        let coordinator =
            coordinator(transport, PlacementPolicy::default(), &["http://a:9000"]).await;

        let result = coordinator
            .place_and_store(Upload::new("x.csv", vec![0u8; 4]))
            .await;
        assert_matches!(result, Err(Error::TransferFailed { node, .. }) if node == "http://a:9000");
    }

    #[tokio::test]
    async fn test_describe_unknown_node() {
        let transport = Arc::new(InMemoryTransport::new());
        let coordinator = coordinator(transport, PlacementPolicy::default(), &[]).await;

        let result = coordinator
            .describe(&NodeId::from("http://nowhere:9000"), "k")
            .await;
        assert_matches!(result, Err(Error::UnknownNode(_)));
    }

    #[tokio::test]
    async fn test_dataset_link_requires_existing_object() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.add_node("http://a:9000", MB);
        transport.insert_object("http://a:9000", "sets/air.jsonld", "application/ld+json", &[]);
        let coordinator =
            coordinator(transport, PlacementPolicy::default(), &["http://a:9000"]).await;
        let a = NodeId::from("http://a:9000");

        let link = coordinator
            .dataset_link(&a, "sets/air.jsonld")
            .await
            .unwrap();
        assert!(link.contains("sets/air.jsonld"));
        assert!(link.contains("X-Amz-Expires=3600"));

        let missing = coordinator.dataset_link(&a, "nope.jsonld").await;
        assert_matches!(missing, Err(Error::MetadataUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_list_with_details_filters_keys() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.add_node("http://a:9000", MB);
        transport.add_node("http://b:9000", MB);
        transport.insert_object("http://a:9000", "one.jsonld", "application/ld+json", &[("k", "v")]);
        transport.insert_object("http://a:9000", "two.csv", "text/csv", &[]);
        transport.insert_object("http://b:9000", "three.jsonld", "application/ld+json", &[]);
        transport.set_object_metadata("http://b:9000", "three.jsonld", "download", "4");
        let coordinator = coordinator(
            transport,
            PlacementPolicy::default(),
            &["http://a:9000", "http://b:9000"],
        )
        .await;

        let details = coordinator.list_all_with_details(Some("jsonld")).await;

        let names: Vec<&str> = details.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["one.jsonld", "three.jsonld"]);
        assert_eq!(details[0].tag_count.as_deref(), Some("1"));
        assert_eq!(details[1].download_count.as_deref(), Some("4"));
        assert_eq!(coordinator.list_all_with_details(None).await.len(), 3);
    }

    #[tokio::test]
    async fn test_metrics_track_operations() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.add_node("http://a:9000", MB);
        let coordinator =
            coordinator(transport, PlacementPolicy::default(), &["http://a:9000"]).await;

        coordinator.search_by_extension("csv").await;
        coordinator
            .place_and_store(Upload::new("big.bin", vec![0u8; 2 * MB as usize]))
            .await
            .unwrap_err();

        let text = String::from_utf8(coordinator.metrics().encode().unwrap()).unwrap();
        assert!(text.contains("fleetstor_search_total{kind=\"extension\"} 1"));
        assert!(text.contains("fleetstor_placements_total{outcome=\"no_destination\"} 1"));
        assert!(text.contains("fleetstor_registered_nodes 1"));
    }
}
