//! FleetStor - Capacity-Aware Coordinator for S3 Storage Fleets
//!
//! Keeps a registry of independent MinIO/S3 nodes and treats them as one
//! logical store: uploads go to the healthy node with the most free
//! capacity, searches fan out to every healthy node and merge the hits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Coordinator                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐     │
//! │  │   Registry   │──▶│    Health    │──▶│ Capacity/Search  │     │
//! │  │  (aliases)   │   │    Prober    │   │  fan-out + merge │     │
//! │  └──────────────┘   └──────────────┘   └──────────────────┘     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │          NodeTransport (S3 over HTTP) │ RegistryStore (file)    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - S3, file and in-memory implementations of the ports
//! - [`coordinator`] - Caller-facing operations
//! - [`domain`] - Value objects and port traits
//! - [`error`] - Error types
//! - [`fleet`] - Health, capacity, placement, search and metadata fan-outs
//! - [`registry`] - Node registry with alias allocation
//! - [`telemetry`] - Prometheus operational metrics

pub mod adapters;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod fleet;
pub mod registry;
pub mod telemetry;

// Re-export commonly used types
pub use coordinator::{Coordinator, Upload};
pub use domain::{Node, NodeId, NodeSpec, SearchPredicate, StoredObject};
pub use error::{Error, Result};
pub use fleet::{FleetConfig, PlacementPolicy};
