//! Search Aggregator
//!
//! Fans a [`SearchPredicate`] out to every healthy node and merges the
//! per-node hit lists.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::{fan_out, FleetConfig, HealthyNodes};
use crate::domain::{NodeId, NodeTransport, SearchPredicate};

/// `node -> object keys`, in each node's listing order.
///
/// Nodes without a match are absent, never present with an empty list.
pub type SearchResult = BTreeMap<NodeId, Vec<String>>;

/// Concurrent find across the healthy set.
pub struct SearchAggregator {
    transport: Arc<dyn NodeTransport>,
    config: FleetConfig,
}

impl SearchAggregator {
    pub fn new(transport: Arc<dyn NodeTransport>, config: FleetConfig) -> Self {
        Self { transport, config }
    }

    /// Run `predicate` on every healthy node.
    ///
    /// A node whose query fails is omitted from the result.
    #[instrument(skip_all, fields(kind = predicate.kind(), nodes = healthy.len()))]
    pub async fn search(&self, healthy: &HealthyNodes, predicate: &SearchPredicate) -> SearchResult {
        let result: SearchResult = fan_out(&self.config, healthy.nodes(), |node| async move {
            match self.transport.find(node, predicate).await {
                Ok(paths) => {
                    let keys: Vec<String> = paths
                        .iter()
                        .map(|p| strip_bucket_prefix(p))
                        .filter(|k| !k.is_empty())
                        .map(str::to_string)
                        .collect();
                    (!keys.is_empty()).then(|| (node.id.clone(), keys))
                }
                Err(e) => {
                    warn!(node = %node.id, error = %e, "Search failed on node");
                    None
                }
            }
        })
        .await
        .into_iter()
        .collect();

        debug!(
            matched_nodes = result.len(),
            hits = result.values().map(Vec::len).sum::<usize>(),
            "Search complete"
        );
        result
    }
}

/// Drop the leading bucket segment of a `bucket/key` path.
pub fn strip_bucket_prefix(path: &str) -> &str {
    let path = path.trim_start_matches('/');
    match path.split_once('/') {
        Some((_, key)) => key,
        None => path,
    }
}
