//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │          NodeTransport         │       RegistryStore        │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │  S3NodeTransport   │ FileRegistryStore                     │ │
//! │  │  InMemoryTransport │ MemoryRegistryStore                   │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use fleetstor::adapters::{FileRegistryStore, S3NodeTransport, S3TransportConfig};
//!
//! let transport = Arc::new(S3NodeTransport::new(S3TransportConfig::default())?);
//! let store = Arc::new(FileRegistryStore::new("registry.jsonl"));
//!
//! let coordinator = Coordinator::bootstrap(config, policy, transport, store).await?;
//! ```
//!
//! The in-memory adapters simulate a fleet inside one process and back the
//! test suites.

mod file_registry;
mod memory;
mod s3;

pub use file_registry::FileRegistryStore;
pub use memory::{InMemoryTransport, MemoryRegistryStore, MEMORY_BUCKET};
pub use s3::{S3NodeTransport, S3TransportConfig};
