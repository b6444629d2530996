//! Domain Ports (DDD Port/Adapter Pattern)
//!
//! This module defines the value objects of the fleet and the two seams the
//! coordinator depends on. Infrastructure adapters implement these traits.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │        NodeTransport      │      RegistryStore       │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  S3NodeTransport │ InMemoryTransport │ FileRegistry  │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Prefix of every node alias.
pub const ALIAS_PREFIX: &str = "minio";

// =============================================================================
// Value Objects
// =============================================================================

/// Node identifier: the storage endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Short local name for a node (`minio<N>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Alias(pub String);

impl Alias {
    /// Alias for the given counter value.
    pub fn from_index(index: u64) -> Self {
        Self(format!("{ALIAS_PREFIX}{index}"))
    }

    /// Numeric suffix of the alias, if it has one.
    pub fn suffix(&self) -> Option<u64> {
        let digits: String = self
            .0
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        digits.parse().ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Alias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// S3 access credentials in plain form. Only lives in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// A storage node participating in the fleet.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub alias: Alias,
    /// Parsed endpoint used for every request
    pub endpoint: Url,
    pub credentials: Credentials,
    /// Bearer token for the metrics endpoint
    pub metrics_token: String,
}

impl Node {
    /// Build a node from an address, deriving connection parameters from it.
    pub fn new(
        address: &str,
        alias: Alias,
        credentials: Credentials,
        metrics_token: impl Into<String>,
    ) -> Result<Self> {
        let endpoint = parse_endpoint(address)?;
        Ok(Self {
            id: NodeId::new(address.trim_end_matches('/')),
            alias,
            endpoint,
            credentials,
            metrics_token: metrics_token.into(),
        })
    }

    /// `host[:port]` of the endpoint, as sent in the `Host` header.
    pub fn host(&self) -> String {
        let host = self.endpoint.host_str().unwrap_or_default();
        match self.endpoint.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }
}

fn parse_endpoint(address: &str) -> Result<Url> {
    let url = Url::parse(address).map_err(|e| Error::InvalidNodeUrl {
        url: address.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidNodeUrl {
            url: address.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    if url.host_str().is_none() {
        return Err(Error::InvalidNodeUrl {
            url: address.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}

/// A node as requested by a caller of `add_nodes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub url: String,
    pub token: String,
    pub access_key: String,
    pub secret_key: String,
}

/// Persisted registry record. Credentials are base64-encoded at rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub site: String,
    pub alias: String,
    pub token: String,
    pub access_key: String,
    pub secret_key: String,
}

/// Outcome of a single ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingStatus {
    Healthy,
    Unhealthy,
}

impl PingStatus {
    pub fn is_healthy(&self) -> bool {
        *self == PingStatus::Healthy
    }
}

/// Query fanned out to every healthy node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchPredicate {
    /// Every key/value pair must be present on the object
    Tags(BTreeMap<String, String>),
    /// Object name matches `*.<extension>`
    Extension(String),
    /// `Content-Type` metadata equals the value
    ContentType(String),
    /// Everything in the bucket
    All,
}

impl SearchPredicate {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SearchPredicate::Tags(_) => "tags",
            SearchPredicate::Extension(_) => "extension",
            SearchPredicate::ContentType(_) => "content_type",
            SearchPredicate::All => "all",
        }
    }

    /// Name-only part of the predicate. Tag and content-type predicates
    /// need object metadata and always pass here.
    pub fn matches_name(&self, key: &str) -> bool {
        match self {
            SearchPredicate::Extension(ext) => {
                let ext = ext.trim_start_matches("*.").trim_start_matches('.');
                let name = key.rsplit('/').next().unwrap_or(key);
                name.len() > ext.len() + 1 && name.ends_with(&format!(".{ext}"))
            }
            _ => true,
        }
    }

    /// Whether an object's tag set satisfies a tag predicate.
    pub fn matches_tags(&self, tags: &BTreeMap<String, String>) -> bool {
        match self {
            SearchPredicate::Tags(wanted) => wanted
                .iter()
                .all(|(k, v)| tags.get(k).map(|t| t == v).unwrap_or(false)),
            _ => true,
        }
    }

    /// Whether an object's content type satisfies a content-type predicate.
    pub fn matches_content_type(&self, content_type: Option<&str>) -> bool {
        match self {
            SearchPredicate::ContentType(wanted) => content_type
                .map(|ct| ct.eq_ignore_ascii_case(wanted))
                .unwrap_or(false),
            _ => true,
        }
    }
}

/// Object upload handed to a node.
#[derive(Debug, Clone)]
pub struct PutObject {
    pub key: String,
    pub body: Bytes,
    pub content_type: String,
    pub tags: BTreeMap<String, String>,
}

impl PutObject {
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

/// Where an object ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    /// `bucket/key`
    pub path: String,
    pub node: NodeId,
}

/// Response headers of a metadata read, names lowercased.
pub type ObjectHeaders = BTreeMap<String, String>;

/// Metadata and tags of one object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectDetails {
    pub headers: ObjectHeaders,
    pub tags: BTreeMap<String, String>,
}

impl ObjectDetails {
    pub fn access(&self) -> Option<&str> {
        self.header("x-amz-meta-access")
    }

    pub fn download_count(&self) -> Option<&str> {
        self.header("x-amz-meta-download")
    }

    pub fn upload_date(&self) -> Option<&str> {
        self.header("x-amz-meta-uploaddate")
    }

    pub fn tag_count(&self) -> Option<&str> {
        self.header("x-amz-tagging-count")
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

// =============================================================================
// Node Transport Port
// =============================================================================

/// Port for talking to a single storage node.
///
/// Every fleet component reaches nodes through this trait and never touches
/// transport details directly.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Set up the named client profile for a node and verify it answers.
    async fn register(&self, node: &Node) -> Result<()>;

    /// Liveness check. Callers bound it; the health prober wraps every ping
    /// in its configured ping timeout.
    async fn ping(&self, node: &Node) -> Result<PingStatus>;

    /// Raw Prometheus text from the node's cluster metrics endpoint.
    ///
    /// A non-success HTTP status is reported as [`Error::NodeStatus`].
    async fn metrics(&self, node: &Node) -> Result<String>;

    /// Paths (`bucket/key`) matching the predicate, in listing order.
    async fn find(&self, node: &Node, predicate: &SearchPredicate) -> Result<Vec<String>>;

    /// Store an object.
    async fn put(&self, node: &Node, object: PutObject) -> Result<StoredObject>;

    /// Metadata headers of an object.
    async fn stat(&self, node: &Node, key: &str) -> Result<ObjectHeaders>;

    /// Tag set of an object.
    async fn tags(&self, node: &Node, key: &str) -> Result<BTreeMap<String, String>>;

    /// Time-limited download URL for an object.
    async fn presign_get(&self, node: &Node, key: &str, expires: Duration) -> Result<String>;
}

// =============================================================================
// Registry Store Port
// =============================================================================

/// Port for durable node registry storage.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Every record, in the order nodes were added.
    async fn load(&self) -> Result<Vec<NodeRecord>>;

    /// Durably append records. Must not lose records appended concurrently.
    async fn append(&self, records: &[NodeRecord]) -> Result<()>;

    /// Replace the stored state with exactly these records.
    async fn compact(&self, records: &[NodeRecord]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_alias_suffix() {
        assert_eq!(Alias::from_index(7).as_str(), "minio7");
        assert_eq!(Alias::from_index(12).suffix(), Some(12));
        assert_eq!(Alias("minio".into()).suffix(), None);
        assert_eq!(Alias("custom42".into()).suffix(), Some(42));
    }

    #[test]
    fn test_node_derives_endpoint() {
        let node = Node::new(
            "http://storage-1.local:9000/",
            Alias::from_index(1),
            Credentials::new("ak", "sk"),
            "token",
        )
        .unwrap();

        assert_eq!(node.id.as_str(), "http://storage-1.local:9000");
        assert_eq!(node.host(), "storage-1.local:9000");
    }

    #[test]
    fn test_node_rejects_bad_url() {
        let result = Node::new(
            "storage-1:9000",
            Alias::from_index(1),
            Credentials::new("ak", "sk"),
            "t",
        );
        assert!(matches!(result, Err(Error::InvalidNodeUrl { .. })));
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = Credentials::new("AKIA", "super-secret");
        let dbg = format!("{:?}", creds);
        assert!(dbg.contains("AKIA"));
        assert!(!dbg.contains("super-secret"));
    }

    #[test]
    fn test_extension_matching() {
        let csv = SearchPredicate::Extension("csv".into());
        assert!(csv.matches_name("data/report.csv"));
        assert!(csv.matches_name("report.csv"));
        assert!(!csv.matches_name("report.csv.gz"));
        assert!(!csv.matches_name(".csv"));
        assert!(!csv.matches_name("reportcsv"));

        let glob = SearchPredicate::Extension("*.json".into());
        assert!(glob.matches_name("a.json"));
    }

    #[test]
    fn test_tag_matching_requires_every_pair() {
        let predicate = SearchPredicate::Tags(tags(&[("a", "1"), ("b", "2")]));
        assert!(predicate.matches_tags(&tags(&[("a", "1"), ("b", "2"), ("c", "3")])));
        assert!(!predicate.matches_tags(&tags(&[("a", "1")])));
        assert!(!predicate.matches_tags(&tags(&[("a", "1"), ("b", "3")])));
    }

    #[test]
    fn test_content_type_matching() {
        let predicate = SearchPredicate::ContentType("application/json".into());
        assert!(predicate.matches_content_type(Some("Application/JSON")));
        assert!(!predicate.matches_content_type(Some("text/csv")));
        assert!(!predicate.matches_content_type(None));
        assert!(SearchPredicate::All.matches_content_type(None));
    }

    #[test]
    fn test_object_details_optional_fields() {
        let mut details = ObjectDetails::default();
        assert_eq!(details.access(), None);
        details
            .headers
            .insert("x-amz-meta-access".into(), "public".into());
        details.headers.insert("x-amz-tagging-count".into(), "2".into());
        assert_eq!(details.access(), Some("public"));
        assert_eq!(details.tag_count(), Some("2"));
        assert_eq!(details.upload_date(), None);
    }
}
