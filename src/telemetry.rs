//! Operational metrics of the coordinator.
//!
//! Each coordinator owns its own Prometheus registry, so several instances
//! (and parallel tests) never collide on metric names.

use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::error::Result;

/// Placement outcome label values.
pub const OUTCOME_STORED: &str = "stored";
pub const OUTCOME_NO_DESTINATION: &str = "no_destination";
pub const OUTCOME_TRANSFER_FAILED: &str = "transfer_failed";

/// Counters and gauges exported on `/metrics`.
#[derive(Clone)]
pub struct FleetMetrics {
    registry: Registry,
    probes: IntCounter,
    healthy_nodes: IntGauge,
    registered_nodes: IntGauge,
    placements: IntCounterVec,
    searches: IntCounterVec,
}

impl FleetMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let probes = IntCounter::with_opts(Opts::new(
            "fleetstor_probe_total",
            "Total number of health probe rounds",
        ))?;
        let healthy_nodes = IntGauge::with_opts(Opts::new(
            "fleetstor_healthy_nodes",
            "Nodes that answered the last health probe",
        ))?;
        let registered_nodes = IntGauge::with_opts(Opts::new(
            "fleetstor_registered_nodes",
            "Nodes known to the registry",
        ))?;
        let placements = IntCounterVec::new(
            Opts::new("fleetstor_placements_total", "Upload placements by outcome"),
            &["outcome"],
        )?;
        let searches = IntCounterVec::new(
            Opts::new("fleetstor_search_total", "Fleet searches by predicate kind"),
            &["kind"],
        )?;

        registry.register(Box::new(probes.clone()))?;
        registry.register(Box::new(healthy_nodes.clone()))?;
        registry.register(Box::new(registered_nodes.clone()))?;
        registry.register(Box::new(placements.clone()))?;
        registry.register(Box::new(searches.clone()))?;

        Ok(Self {
            registry,
            probes,
            healthy_nodes,
            registered_nodes,
            placements,
            searches,
        })
    }

    pub fn record_probe(&self, healthy: usize) {
        self.probes.inc();
        self.healthy_nodes.set(healthy as i64);
    }

    pub fn set_registered(&self, nodes: usize) {
        self.registered_nodes.set(nodes as i64);
    }

    pub fn record_placement(&self, outcome: &str) {
        self.placements.with_label_values(&[outcome]).inc();
    }

    pub fn record_search(&self, kind: &str) {
        self.searches.with_label_values(&[kind]).inc();
    }

    /// Text exposition of every metric.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}

impl std::fmt::Debug for FleetMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetMetrics")
            .field("probes", &self.probes.get())
            .field("healthy_nodes", &self.healthy_nodes.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_recorded_values() {
        let metrics = FleetMetrics::new().unwrap();
        metrics.record_probe(3);
        metrics.record_placement(OUTCOME_STORED);
        metrics.record_search("tags");

        let text = String::from_utf8(metrics.encode().unwrap()).unwrap();
        assert!(text.contains("fleetstor_probe_total 1"));
        assert!(text.contains("fleetstor_healthy_nodes 3"));
        assert!(text.contains("fleetstor_placements_total{outcome=\"stored\"} 1"));
        assert!(text.contains("fleetstor_search_total{kind=\"tags\"} 1"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = FleetMetrics::new().unwrap();
        let b = FleetMetrics::new().unwrap();
        a.record_probe(1);
        assert_eq!(b.probes.get(), 0);
    }
}
