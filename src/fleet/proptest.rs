//! Property-Based Tests for Fleet Coordination
//!
//! # Test Properties
//!
//! 1. **Placement Maximality**: the chosen node has the largest sample
//! 2. **Placement Determinism**: equal inputs give equal choices
//! 3. **Metric Parsing**: any non-negative counter survives formatting
//! 4. **Search Omission**: nodes without hits never appear in results

#![cfg(test)]

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;

use super::capacity::{parse_free_bytes, CapacitySamples};
use super::placement::{PlacementEngine, PlacementPolicy};
use super::{FleetConfig, HealthyNodes, SearchAggregator, DEFAULT_CAPACITY_METRIC};
use crate::adapters::InMemoryTransport;
use crate::domain::{Alias, Credentials, Node, NodeId, SearchPredicate};

// =============================================================================
// Property Strategies
// =============================================================================

/// Samples for 1-12 nodes, including negative remainders.
fn samples_strategy() -> impl Strategy<Value = CapacitySamples> {
    prop::collection::btree_map(
        "[a-f]{1,3}".prop_map(|h| NodeId::new(format!("http://{h}:9000"))),
        -1_000_000i64..1_000_000_000,
        1..12,
    )
}

/// Per-node object names; an empty list means the node has nothing to offer.
fn fleet_strategy() -> impl Strategy<Value = Vec<Vec<String>>> {
    prop::collection::vec(
        prop::collection::vec("[a-z]{1,6}\\.(csv|json|txt)", 0..5),
        1..6,
    )
}

// =============================================================================
// Placement Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_overcommit_choice_is_maximal(samples in samples_strategy()) {
        let engine = PlacementEngine::new(PlacementPolicy { allow_overcommit: true });
        let chosen = engine.choose(&samples, 1).unwrap();

        let best = *samples.values().max().unwrap();
        prop_assert_eq!(samples[&chosen], best);
        // Ties go to the smallest address
        let first_best = samples.iter().find(|(_, v)| **v == best).map(|(k, _)| k).unwrap();
        prop_assert_eq!(&chosen, first_best);
    }

    #[test]
    fn prop_strict_choice_never_negative(samples in samples_strategy()) {
        let engine = PlacementEngine::default();
        match engine.choose(&samples, 1) {
            Ok(node) => prop_assert!(samples[&node] >= 0),
            Err(_) => prop_assert!(samples.values().all(|v| *v < 0)),
        }
    }

    #[test]
    fn prop_choice_is_deterministic(samples in samples_strategy()) {
        let engine = PlacementEngine::new(PlacementPolicy { allow_overcommit: true });
        let first = engine.choose(&samples, 1).unwrap();
        let second = engine.choose(&samples.clone(), 1).unwrap();
        prop_assert_eq!(first, second);
    }
}

// =============================================================================
// Metric Parsing Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_parse_integer_counter(free in 0i64..(1i64 << 50)) {
        let payload = format!("# TYPE {m} gauge\n{m} {free}\n", m = DEFAULT_CAPACITY_METRIC);
        prop_assert_eq!(parse_free_bytes(&payload, DEFAULT_CAPACITY_METRIC).unwrap(), free);
    }

    #[test]
    fn prop_parse_scientific_counter(mantissa in 1u32..9999, exponent in 3i32..12) {
        let value = f64::from(mantissa) * 10f64.powi(exponent);
        let payload = format!(
            "{m}{{server=\"n1:9000\"}} {value:e}\n",
            m = DEFAULT_CAPACITY_METRIC
        );
        let parsed = parse_free_bytes(&payload, DEFAULT_CAPACITY_METRIC).unwrap();
        prop_assert!((parsed - value as i64).abs() <= 1);
    }
}

// =============================================================================
// Search Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_search_omits_nodes_without_hits(fleet in fleet_strategy()) {
        let transport = Arc::new(InMemoryTransport::new());
        let mut nodes = Vec::new();
        for (i, objects) in fleet.iter().enumerate() {
            let url = format!("http://node-{i}:9000");
            transport.add_node(&url, 1_000);
            for key in objects {
                transport.insert_object(&url, key, "application/octet-stream", &[]);
            }
            nodes.push(
                Node::new(&url, Alias::from_index(i as u64 + 1), Credentials::new("ak", "sk"), "t")
                    .unwrap(),
            );
        }

        let aggregator = SearchAggregator::new(transport, FleetConfig::default());
        let predicate = SearchPredicate::Extension("csv".into());
        let result = tokio_test::block_on(
            aggregator.search(&HealthyNodes::from_nodes(nodes), &predicate),
        );

        let expected: BTreeMap<NodeId, usize> = fleet
            .iter()
            .enumerate()
            .filter_map(|(i, objects)| {
                let unique: std::collections::BTreeSet<&String> =
                    objects.iter().filter(|k| k.ends_with(".csv")).collect();
                (!unique.is_empty())
                    .then(|| (NodeId::new(format!("http://node-{i}:9000")), unique.len()))
            })
            .collect();

        prop_assert_eq!(result.len(), expected.len());
        for (node, hits) in &result {
            prop_assert!(!hits.is_empty());
            prop_assert_eq!(Some(&hits.len()), expected.get(node));
        }
    }
}
