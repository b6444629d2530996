//! Metadata/Tag Fetcher
//!
//! Reads the metadata headers and tag set of a known object. Failures come
//! back as [`Error::MetadataUnavailable`] values so batch callers can skip
//! them without aborting.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use super::{fan_out, FleetConfig};
use crate::domain::{Node, NodeId, NodeTransport, ObjectDetails};
use crate::error::{Error, Result};

/// One entry of a detailed listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailedObject {
    /// Last path segment of the key
    pub name: String,
    pub key: String,
    pub source: NodeId,
    pub access: Option<String>,
    pub download_count: Option<String>,
    pub upload_date: Option<String>,
    pub tag_count: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl DetailedObject {
    pub fn new(source: NodeId, key: String, details: ObjectDetails) -> Self {
        let owned = |v: Option<&str>| v.map(str::to_string);
        Self {
            name: key.rsplit('/').next().unwrap_or(&key).to_string(),
            access: owned(details.access()),
            download_count: owned(details.download_count()),
            upload_date: owned(details.upload_date()),
            tag_count: owned(details.tag_count()),
            tags: details.tags,
            source,
            key,
        }
    }
}

/// Per-object metadata reader.
pub struct MetadataFetcher {
    transport: Arc<dyn NodeTransport>,
    config: FleetConfig,
}

impl MetadataFetcher {
    pub fn new(transport: Arc<dyn NodeTransport>, config: FleetConfig) -> Self {
        Self { transport, config }
    }

    /// Metadata headers and tags of `key` on `node`.
    #[instrument(skip(self, node), fields(node = %node.id))]
    pub async fn describe(&self, node: &Node, key: &str) -> Result<ObjectDetails> {
        let (headers, tags) = tokio::join!(
            self.transport.stat(node, key),
            self.transport.tags(node, key)
        );

        let unavailable = |e: Error| Error::MetadataUnavailable {
            node: node.id.to_string(),
            key: key.to_string(),
            reason: e.to_string(),
        };

        Ok(ObjectDetails {
            headers: headers.map_err(unavailable)?,
            tags: tags.map_err(unavailable)?,
        })
    }

    /// Describe many objects concurrently, skipping the ones that fail.
    pub async fn describe_all(&self, objects: Vec<(Node, String)>) -> Vec<DetailedObject> {
        fan_out(&self.config, objects, |(node, key)| async move {
            match self.describe(&node, &key).await {
                Ok(details) => Some(DetailedObject::new(node.id.clone(), key, details)),
                Err(e) => {
                    debug!(error = %e, "Skipping object without metadata");
                    None
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryTransport;
    use crate::domain::{Alias, Credentials};
    use assert_matches::assert_matches;

    fn node(url: &str) -> Node {
        Node::new(url, Alias::from_index(1), Credentials::new("ak", "sk"), "t").unwrap()
    }

    #[tokio::test]
    async fn test_describe_reads_headers_and_tags() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.add_node("http://a:9000", 1_000);
        transport.insert_object(
            "http://a:9000",
            "sets/air.jsonld",
            "application/ld+json",
            &[("owner", "lab")],
        );
        transport.set_object_metadata("http://a:9000", "sets/air.jsonld", "access", "public");

        let fetcher = MetadataFetcher::new(transport, FleetConfig::default());
        let details = fetcher
            .describe(&node("http://a:9000"), "sets/air.jsonld")
            .await
            .unwrap();

        assert_eq!(details.access(), Some("public"));
        assert_eq!(details.tag_count(), Some("1"));
        assert_eq!(details.download_count(), None);
        assert_eq!(details.tags.get("owner").map(String::as_str), Some("lab"));
    }

    #[tokio::test]
    async fn test_describe_missing_object_is_sentinel() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.add_node("http://a:9000", 1_000);

        let fetcher = MetadataFetcher::new(transport, FleetConfig::default());
        let result = fetcher.describe(&node("http://a:9000"), "nope").await;

        assert_matches!(result, Err(Error::MetadataUnavailable { key, .. }) if key == "nope");
    }

    #[tokio::test]
    async fn test_describe_all_skips_failures() {
        let transport = Arc::new(InMemoryTransport::new());
        transport.add_node("http://a:9000", 1_000);
        transport.insert_object("http://a:9000", "dir/present.csv", "text/csv", &[]);

        let fetcher = MetadataFetcher::new(transport, FleetConfig::default());
        let a = node("http://a:9000");
        let described = fetcher
            .describe_all(vec![
                (a.clone(), "dir/present.csv".to_string()),
                (a, "missing.csv".to_string()),
            ])
            .await;

        assert_eq!(described.len(), 1);
        assert_eq!(described[0].name, "present.csv");
        assert_eq!(described[0].source, NodeId::from("http://a:9000"));
    }
}
