//! Error types for the FleetStor coordinator

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating the storage fleet
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // =========================================================================
    // Registry Errors
    // =========================================================================
    /// Alias registration against a node failed; the node is not persisted
    #[error("Registration failed for node {url}: {reason}")]
    RegistrationFailure { url: String, reason: String },

    /// Node address could not be turned into connection parameters
    #[error("Invalid node URL '{url}': {reason}")]
    InvalidNodeUrl { url: String, reason: String },

    /// Stored credentials could not be decoded
    #[error("Invalid stored credentials for node {url}: {reason}")]
    Credentials { url: String, reason: String },

    /// A registry record could not be parsed
    #[error("Corrupt registry record at line {line}: {reason}")]
    CorruptRegistry { line: usize, reason: String },

    /// Operation addressed a node the registry does not know
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    // =========================================================================
    // Fleet Errors
    // =========================================================================
    /// The health probe returned an empty set
    #[error("No healthy storage nodes available")]
    NoHealthyNodes,

    /// Placement found no node able to take the object
    #[error("No destination available for an object of {object_size} bytes")]
    NoDestinationAvailable { object_size: u64 },

    /// The object was placed but the transfer to the chosen node failed
    #[error("Transfer to node {node} failed: {reason}")]
    TransferFailed { node: String, reason: String },

    /// Per-object describe failure
    #[error("Metadata unavailable for {key} on {node}: {reason}")]
    MetadataUnavailable {
        node: String,
        key: String,
        reason: String,
    },

    // =========================================================================
    // Node Transport Errors
    // =========================================================================
    /// Connection-level failure talking to a node
    #[error("Node connection error: {0}")]
    NodeConnection(#[source] reqwest::Error),

    /// Node answered with a non-success status
    #[error("Node {node} returned status {status} for {operation}")]
    NodeStatus {
        node: String,
        operation: &'static str,
        status: u16,
    },

    /// Node response body could not be interpreted
    #[error("Failed to parse node response: {0}")]
    ResponseParse(String),

    /// Free-capacity counter missing or malformed in the metrics payload
    #[error("Capacity metric '{metric}' not found in metrics payload")]
    CapacityMetricMissing { metric: String },

    /// Presigned URL could not be built
    #[error("Failed to presign request: {0}")]
    Presign(String),

    // =========================================================================
    // Misc
    // =========================================================================
    /// Operational metric could not be created or encoded
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] prometheus::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error was produced by a single node inside a fan-out
    /// and should only exclude that node from the aggregate.
    pub fn is_node_local(&self) -> bool {
        matches!(
            self,
            Error::NodeConnection(_)
                | Error::NodeStatus { .. }
                | Error::ResponseParse(_)
                | Error::CapacityMetricMissing { .. }
                | Error::MetadataUnavailable { .. }
        )
    }
}
