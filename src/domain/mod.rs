//! Domain Layer
//!
//! Value objects describing the fleet and the ports the coordinator depends
//! on.
//!
//! - **Ports** (`ports.rs`) - [`NodeTransport`] and [`RegistryStore`]
//!
//! # Usage
//!
//! ```ignore
//! use fleetstor::domain::{NodeTransport, SearchPredicate};
//!
//! async fn count_csv<T: NodeTransport>(transport: &T, node: &Node) -> Result<usize> {
//!     let hits = transport
//!         .find(node, &SearchPredicate::Extension("csv".into()))
//!         .await?;
//!     Ok(hits.len())
//! }
//! ```

pub mod ports;

pub use ports::{
    Alias, Credentials, Node, NodeId, NodeRecord, NodeSpec, NodeTransport, ObjectDetails,
    ObjectHeaders, PingStatus, PutObject, RegistryStore, SearchPredicate, StoredObject,
    ALIAS_PREFIX,
};
