//! Capacity Oracle
//!
//! Estimates, per healthy node, how many bytes would remain free after
//! storing a candidate object. The free-capacity counter is read from the
//! node's Prometheus metrics endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::{fan_out, FleetConfig, HealthyNodes};
use crate::domain::{Node, NodeId, NodeTransport};
use crate::error::{Error, Result};

/// `node -> (free bytes - candidate size)`. Negative means "does not fit".
pub type CapacitySamples = BTreeMap<NodeId, i64>;

/// Queries metrics endpoints for remaining capacity.
pub struct CapacityOracle {
    transport: Arc<dyn NodeTransport>,
    config: FleetConfig,
}

impl CapacityOracle {
    pub fn new(transport: Arc<dyn NodeTransport>, config: FleetConfig) -> Self {
        Self { transport, config }
    }

    /// Remaining bytes on `node` after storing `candidate_size` bytes.
    ///
    /// A metrics endpoint answering with a non-success status counts as
    /// zero free capacity. Transport and parse errors are returned.
    pub async fn remaining_capacity(&self, node: &Node, candidate_size: u64) -> Result<i64> {
        let free = match self.transport.metrics(node).await {
            Ok(payload) => parse_free_bytes(&payload, &self.config.capacity_metric)?,
            Err(Error::NodeStatus { status, .. }) => {
                debug!(node = %node.id, status, "Metrics refused, assuming no free capacity");
                0
            }
            Err(e) => return Err(e),
        };

        let candidate = i64::try_from(candidate_size).unwrap_or(i64::MAX);
        Ok(free.saturating_sub(candidate))
    }

    /// Sample every healthy node concurrently. Nodes whose sample could
    /// not be obtained are left out.
    #[instrument(skip(self, healthy), fields(nodes = healthy.len()))]
    pub async fn sample(&self, healthy: &HealthyNodes, candidate_size: u64) -> CapacitySamples {
        fan_out(&self.config, healthy.nodes(), |node| async move {
            match self.remaining_capacity(node, candidate_size).await {
                Ok(remaining) => Some((node.id.clone(), remaining)),
                Err(e) => {
                    warn!(node = %node.id, error = %e, "Capacity sample unavailable");
                    None
                }
            }
        })
        .await
        .into_iter()
        .collect()
    }
}

/// Extract a counter from a Prometheus text exposition payload.
///
/// Takes the first sample of `metric` (with or without labels). The value
/// may use scientific notation (`1.2e+12`). Fractional bytes are truncated.
pub fn parse_free_bytes(payload: &str, metric: &str) -> Result<i64> {
    for line in payload.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some(rest) = line.strip_prefix(metric) else {
            continue;
        };

        let value_part = if rest.starts_with('{') {
            match rest.rfind('}') {
                Some(end) => &rest[end + 1..],
                None => continue,
            }
        } else if rest.starts_with(char::is_whitespace) {
            rest
        } else {
            // Longer metric name sharing the prefix
            continue;
        };

        let raw = value_part
            .split_whitespace()
            .next()
            .ok_or_else(|| Error::ResponseParse(format!("{metric} has no value")))?;

        let value: f64 = raw
            .parse()
            .map_err(|_| Error::ResponseParse(format!("{metric} value '{raw}' is not a number")))?;

        if !value.is_finite() || value < 0.0 {
            return Err(Error::ResponseParse(format!(
                "{metric} value '{raw}' is not a byte count"
            )));
        }

        return Ok(value as i64);
    }

    Err(Error::CapacityMetricMissing {
        metric: metric.to_string(),
    })
}
