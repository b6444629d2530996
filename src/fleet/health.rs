//! Health Prober
//!
//! Pings every registered node concurrently and keeps the ones that answer
//! with a success status inside the ping timeout.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument};

use super::{fan_out, FleetConfig};
use crate::domain::{Alias, Node, NodeId, NodeTransport, PingStatus};

/// Nodes that answered the latest probe, keyed by address.
///
/// Recomputed on every operation that needs it; never cached.
#[derive(Debug, Clone, Default)]
pub struct HealthyNodes {
    nodes: BTreeMap<NodeId, Node>,
}

impl HealthyNodes {
    pub fn from_nodes(nodes: impl IntoIterator<Item = Node>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
        }
    }

    /// `node -> alias` view of the healthy set.
    pub fn aliases(&self) -> BTreeMap<NodeId, Alias> {
        self.nodes
            .iter()
            .map(|(id, node)| (id.clone(), node.alias.clone()))
            .collect()
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Concurrent liveness filter over the registry.
pub struct HealthProber {
    transport: Arc<dyn NodeTransport>,
    config: FleetConfig,
}

impl HealthProber {
    pub fn new(transport: Arc<dyn NodeTransport>, config: FleetConfig) -> Self {
        Self { transport, config }
    }

    /// Probe all `nodes` and return the reachable subset.
    ///
    /// Failures, timeouts and non-success answers silently exclude a node.
    #[instrument(skip_all, fields(nodes = nodes.len()))]
    pub async fn probe(&self, nodes: &[Node]) -> HealthyNodes {
        let started = Instant::now();

        let healthy = fan_out(&self.config, nodes.iter(), |node| async move {
            self.is_healthy(node).await.then(|| node.clone())
        })
        .await;

        let healthy = HealthyNodes::from_nodes(healthy);
        debug!(
            healthy = healthy.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Health probe complete"
        );
        healthy
    }

    async fn is_healthy(&self, node: &Node) -> bool {
        match tokio::time::timeout(self.config.ping_timeout, self.transport.ping(node)).await {
            Ok(Ok(status)) => {
                if status != PingStatus::Healthy {
                    debug!(node = %node.id, alias = %node.alias, "Node reported unhealthy");
                }
                status.is_healthy()
            }
            Ok(Err(e)) => {
                debug!(node = %node.id, error = %e, "Ping failed");
                false
            }
            Err(_) => {
                debug!(node = %node.id, "Ping timed out");
                false
            }
        }
    }
}
