//! Placement Engine
//!
//! Picks the destination node of a new object from capacity samples.
//!
//! Selection is value-based so it does not depend on the order in which
//! samples arrived: the node with the largest remaining capacity wins, and
//! ties go to the smallest node address. Nothing is reserved, so two
//! concurrent placements can pick the same node.

use tracing::debug;

use super::CapacitySamples;
use crate::domain::NodeId;
use crate::error::{Error, Result};

/// How placement treats nodes without enough room
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlacementPolicy {
    /// Place the object on the least-full node even if no node has room
    /// for it (every sample negative). Off by default.
    pub allow_overcommit: bool,
}

/// Max-remaining-capacity selector.
#[derive(Debug, Clone, Default)]
pub struct PlacementEngine {
    policy: PlacementPolicy,
}

impl PlacementEngine {
    pub fn new(policy: PlacementPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> PlacementPolicy {
        self.policy
    }

    /// Choose the node with the largest remaining capacity.
    ///
    /// Fails with [`Error::NoDestinationAvailable`] when `samples` is empty,
    /// or when the best node would go negative and overcommit is off.
    pub fn choose(&self, samples: &CapacitySamples, object_size: u64) -> Result<NodeId> {
        let mut best: Option<(&NodeId, i64)> = None;

        // BTreeMap iterates by address; strict `>` keeps the first maximum.
        for (node, &remaining) in samples {
            match best {
                Some((_, current)) if remaining <= current => {}
                _ => best = Some((node, remaining)),
            }
        }

        let Some((node, remaining)) = best else {
            return Err(Error::NoDestinationAvailable { object_size });
        };

        if remaining < 0 && !self.policy.allow_overcommit {
            debug!(node = %node, remaining, "Best node lacks room for object");
            return Err(Error::NoDestinationAvailable { object_size });
        }

        Ok(node.clone())
    }
}
