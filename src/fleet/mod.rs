//! Fleet Coordination Engine
//!
//! Concurrent operations over every registered storage node.
//!
//! # Architecture
//!
//! ```text
//!   upload ──▶ HealthProber ──▶ CapacityOracle ──▶ PlacementEngine ──▶ put
//!   search ──▶ HealthProber ──▶ SearchAggregator ─────────────────────▶ merge
//!   details ─▶ SearchAggregator(All) ──▶ MetadataFetcher (per object)
//! ```
//!
//! Every aggregate operation is a bounded fan-out/join: one future per node,
//! at most `max_concurrency` in flight, and the caller waits until all of
//! them finished or the optional round deadline expired. A node that fails
//! is dropped from the aggregate, never reported as an error.
//!
//! # Components
//!
//! - **Health** (`health.rs`): ping every node, keep the ones answering
//! - **Capacity** (`capacity.rs`): free bytes minus object size per node
//! - **Placement** (`placement.rs`): pick the node with the most room
//! - **Search** (`search.rs`): fan a predicate out and merge hits
//! - **Describe** (`describe.rs`): metadata headers and tags of an object

use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use tracing::warn;

pub mod capacity;
pub mod describe;
pub mod health;
pub mod placement;
pub mod search;

mod proptest;

pub use capacity::{parse_free_bytes, CapacityOracle, CapacitySamples};
pub use describe::{DetailedObject, MetadataFetcher};
pub use health::{HealthProber, HealthyNodes};
pub use placement::{PlacementEngine, PlacementPolicy};
pub use search::{strip_bucket_prefix, SearchAggregator, SearchResult};

/// Default free-capacity counter exported by MinIO cluster metrics.
pub const DEFAULT_CAPACITY_METRIC: &str = "minio_cluster_capacity_raw_free_bytes";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration shared by all fan-out operations
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Maximum in-flight per-node calls of one aggregate operation
    pub max_concurrency: usize,

    /// Timeout of a single ping
    pub ping_timeout: Duration,

    /// Deadline for a whole fan-out round; stragglers are dropped
    pub fanout_deadline: Option<Duration>,

    /// Name of the free-capacity counter in the metrics payload
    pub capacity_metric: String,

    /// Lifetime of presigned download links
    pub link_expiry: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            ping_timeout: Duration::from_secs(2),
            fanout_deadline: None,
            capacity_metric: DEFAULT_CAPACITY_METRIC.to_string(),
            link_expiry: Duration::from_secs(3600),
        }
    }
}

// =============================================================================
// Fan-out
// =============================================================================

/// Run `task` for every target with at most `config.max_concurrency` in
/// flight and collect the `Some` outputs in completion order.
///
/// If `config.fanout_deadline` is set, tasks still pending when it expires
/// are dropped and whatever completed so far is returned.
pub(crate) async fn fan_out<I, F, Fut, T>(config: &FleetConfig, targets: I, task: F) -> Vec<T>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let stream = futures::stream::iter(targets)
        .map(task)
        .buffer_unordered(config.max_concurrency.max(1));
    let mut stream = std::pin::pin!(stream);
    let mut collected = Vec::new();

    let collect = async {
        while let Some(item) = stream.next().await {
            if let Some(value) = item {
                collected.push(value);
            }
        }
    };

    match config.fanout_deadline {
        Some(deadline) => {
            if tokio::time::timeout(deadline, collect).await.is_err() {
                warn!(
                    deadline_ms = deadline.as_millis() as u64,
                    "Fan-out deadline expired, dropping pending nodes"
                );
            }
        }
        None => collect.await,
    }

    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fan_out_drops_none() {
        let config = FleetConfig::default();
        let mut out = fan_out(&config, 0..10u32, |i| async move {
            if i % 2 == 0 {
                Some(i)
            } else {
                None
            }
        })
        .await;
        out.sort();
        assert_eq!(out, vec![0, 2, 4, 6, 8]);
    }

    #[tokio::test]
    async fn test_fan_out_respects_concurrency_ceiling() {
        let config = FleetConfig {
            max_concurrency: 3,
            ..Default::default()
        };
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let out = fan_out(&config, 0..12u32, |i| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Some(i)
            }
        })
        .await;

        assert_eq!(out.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_fan_out_deadline_keeps_finished_results() {
        let config = FleetConfig {
            fanout_deadline: Some(Duration::from_millis(100)),
            ..Default::default()
        };

        let out = fan_out(&config, [1u64, 2, 60_000], |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Some(ms)
        })
        .await;

        let mut out = out;
        out.sort();
        assert_eq!(out, vec![1, 2]);
    }
}
