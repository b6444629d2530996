//! S3 Node Transport Adapter
//!
//! Implements the `NodeTransport` port against MinIO-style S3 nodes with
//! direct HTTP calls:
//!
//! | Operation  | Request                                              |
//! |------------|------------------------------------------------------|
//! | `register` | signed `GET /` (ListBuckets) to verify credentials   |
//! | `ping`     | `GET /minio/health/live`                             |
//! | `metrics`  | `GET /minio/v2/metrics/cluster` with bearer token    |
//! | `find`     | signed ListObjectsV2, then tags / HEAD per candidate |
//! | `put`      | signed `PUT /{bucket}/{key}` with `x-amz-tagging`    |
//! | `stat`     | signed `HEAD /{bucket}/{key}`                        |
//! | `tags`     | signed `GET /{bucket}/{key}?tagging`                 |

mod sigv4;
mod xml;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response};
use tracing::{debug, instrument};

use crate::domain::{
    Node, NodeTransport, ObjectHeaders, PingStatus, PutObject, SearchPredicate, StoredObject,
};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the S3 transport
#[derive(Debug, Clone)]
pub struct S3TransportConfig {
    /// Bucket holding the fleet's objects on every node
    pub bucket: String,

    /// Signing region
    pub region: String,

    /// Default timeout of every request
    pub request_timeout: Duration,

    /// Liveness endpoint path
    pub health_path: String,

    /// Cluster metrics endpoint path
    pub metrics_path: String,

    /// Keys requested per ListObjectsV2 page
    pub list_page_size: u32,

    /// In-flight per-object reads while filtering a listing
    pub metadata_concurrency: usize,
}

impl Default for S3TransportConfig {
    fn default() -> Self {
        Self {
            bucket: "dataspace".to_string(),
            region: "us-east-1".to_string(),
            request_timeout: Duration::from_secs(30),
            health_path: "/minio/health/live".to_string(),
            metrics_path: "/minio/v2/metrics/cluster".to_string(),
            list_page_size: 1000,
            metadata_concurrency: 8,
        }
    }
}

// =============================================================================
// Transport
// =============================================================================

/// HTTP client for S3-compatible storage nodes
pub struct S3NodeTransport {
    client: Client,
    config: S3TransportConfig,
}

impl std::fmt::Debug for S3NodeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3NodeTransport")
            .field("bucket", &self.config.bucket)
            .field("region", &self.config.region)
            .finish()
    }
}

impl S3NodeTransport {
    /// Create a new transport
    pub fn new(config: S3TransportConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &S3TransportConfig {
        &self.config
    }

    fn url(node: &Node, path: &str, query: &[(String, String)]) -> String {
        let base = format!("{}://{}", node.endpoint.scheme(), node.host());
        if query.is_empty() {
            format!("{base}{path}")
        } else {
            format!("{base}{path}?{}", sigv4::canonical_query(query))
        }
    }

    /// Build a SigV4-signed request. `extra_headers` are sent and signed.
    fn signed(
        &self,
        node: &Node,
        method: Method,
        path: &str,
        query: &[(String, String)],
        extra_headers: Vec<(String, String)>,
        payload_hash: String,
    ) -> RequestBuilder {
        let now = Utc::now();
        let mut headers = vec![
            ("host".to_string(), node.host()),
            ("x-amz-content-sha256".to_string(), payload_hash),
            ("x-amz-date".to_string(), sigv4::amz_date(now)),
        ];
        headers.extend(extra_headers);

        let authorization = sigv4::authorization(
            &node.credentials,
            &self.config.region,
            &sigv4::CanonicalRequest {
                method: method.as_str(),
                path,
                query,
                headers: &headers,
                payload_hash: &headers[1].1,
            },
            now,
        );

        let mut request = self
            .client
            .request(method, Self::url(node, path, query))
            .header(AUTHORIZATION, authorization);
        for (name, value) in headers.into_iter().filter(|(n, _)| n != "host") {
            request = request.header(name, value);
        }
        request
    }

    async fn send(
        &self,
        node: &Node,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response> {
        let response = request.send().await.map_err(Error::NodeConnection)?;

        if !response.status().is_success() {
            return Err(Error::NodeStatus {
                node: node.id.to_string(),
                operation,
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }

    /// Every key in the bucket, following continuation tokens.
    async fn list_keys(&self, node: &Node) -> Result<Vec<String>> {
        let path = format!("/{}", urlencoding::encode(&self.config.bucket));
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                (
                    "max-keys".to_string(),
                    self.config.list_page_size.to_string(),
                ),
            ];
            if let Some(token) = continuation.take() {
                query.push(("continuation-token".to_string(), token));
            }

            let request = self.signed(
                node,
                Method::GET,
                &path,
                &query,
                Vec::new(),
                sigv4::EMPTY_PAYLOAD_SHA256.to_string(),
            );
            let body = self
                .send(node, "list", request)
                .await?
                .text()
                .await
                .map_err(Error::NodeConnection)?;

            let page = xml::parse_list_objects(&body)?;
            keys.extend(page.keys);

            match page.continuation {
                Some(token) => continuation = Some(token),
                None => return Ok(keys),
            }
        }
    }

    /// Keep the keys whose metadata satisfies `predicate`, preserving order.
    /// Objects whose metadata cannot be read are skipped.
    async fn filter_by_metadata(
        &self,
        node: &Node,
        keys: Vec<String>,
        predicate: &SearchPredicate,
    ) -> Vec<String> {
        futures::stream::iter(keys)
            .map(|key| async move {
                let matched = match predicate {
                    SearchPredicate::Tags(_) => self
                        .tags(node, &key)
                        .await
                        .map(|tags| predicate.matches_tags(&tags)),
                    SearchPredicate::ContentType(_) => {
                        self.stat(node, &key).await.map(|headers| {
                            predicate.matches_content_type(
                                headers.get("content-type").map(String::as_str),
                            )
                        })
                    }
                    _ => Ok(true),
                };

                match matched {
                    Ok(true) => Some(key),
                    Ok(false) => None,
                    Err(e) => {
                        debug!(node = %node.id, key = %key, error = %e, "Skipping unreadable object");
                        None
                    }
                }
            })
            .buffered(self.config.metadata_concurrency.max(1))
            .filter_map(|key| async move { key })
            .collect()
            .await
    }
}

#[async_trait]
impl NodeTransport for S3NodeTransport {
    #[instrument(skip(self, node), fields(node = %node.id, alias = %node.alias))]
    async fn register(&self, node: &Node) -> Result<()> {
        let request = self.signed(
            node,
            Method::GET,
            "/",
            &[],
            Vec::new(),
            sigv4::EMPTY_PAYLOAD_SHA256.to_string(),
        );
        self.send(node, "register", request).await?;
        debug!("Node credentials accepted");
        Ok(())
    }

    async fn ping(&self, node: &Node) -> Result<PingStatus> {
        let response = self
            .client
            .get(Self::url(node, &self.config.health_path, &[]))
            .send()
            .await
            .map_err(Error::NodeConnection)?;

        Ok(if response.status().is_success() {
            PingStatus::Healthy
        } else {
            PingStatus::Unhealthy
        })
    }

    async fn metrics(&self, node: &Node) -> Result<String> {
        let request = self
            .client
            .get(Self::url(node, &self.config.metrics_path, &[]))
            .bearer_auth(&node.metrics_token);

        self.send(node, "metrics", request)
            .await?
            .text()
            .await
            .map_err(Error::NodeConnection)
    }

    #[instrument(skip(self, node), fields(node = %node.id, kind = predicate.kind()))]
    async fn find(&self, node: &Node, predicate: &SearchPredicate) -> Result<Vec<String>> {
        let keys: Vec<String> = self
            .list_keys(node)
            .await?
            .into_iter()
            .filter(|key| predicate.matches_name(key))
            .collect();

        let keys = match predicate {
            SearchPredicate::Tags(_) | SearchPredicate::ContentType(_) => {
                self.filter_by_metadata(node, keys, predicate).await
            }
            _ => keys,
        };

        Ok(keys
            .into_iter()
            .map(|key| format!("{}/{key}", self.config.bucket))
            .collect())
    }

    #[instrument(skip(self, node, object), fields(node = %node.id, key = %object.key, size = object.size()))]
    async fn put(&self, node: &Node, object: PutObject) -> Result<StoredObject> {
        let path = sigv4::object_path(&self.config.bucket, &object.key);
        let mut headers = vec![(CONTENT_TYPE.as_str().to_string(), object.content_type.clone())];
        if !object.tags.is_empty() {
            headers.push((
                "x-amz-tagging".to_string(),
                xml::tagging_header(&object.tags),
            ));
        }

        let request = self
            .signed(
                node,
                Method::PUT,
                &path,
                &[],
                headers,
                sigv4::payload_sha256(&object.body),
            )
            .body(object.body);
        self.send(node, "put", request).await?;

        Ok(StoredObject {
            path: format!("{}/{}", self.config.bucket, object.key),
            node: node.id.clone(),
        })
    }

    async fn stat(&self, node: &Node, key: &str) -> Result<ObjectHeaders> {
        let request = self.signed(
            node,
            Method::HEAD,
            &sigv4::object_path(&self.config.bucket, key),
            &[],
            Vec::new(),
            sigv4::EMPTY_PAYLOAD_SHA256.to_string(),
        );
        let response = self.send(node, "stat", request).await?;

        Ok(response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect())
    }

    async fn tags(&self, node: &Node, key: &str) -> Result<BTreeMap<String, String>> {
        let query = [("tagging".to_string(), String::new())];
        let request = self.signed(
            node,
            Method::GET,
            &sigv4::object_path(&self.config.bucket, key),
            &query,
            Vec::new(),
            sigv4::EMPTY_PAYLOAD_SHA256.to_string(),
        );
        let body = self
            .send(node, "tags", request)
            .await?
            .text()
            .await
            .map_err(Error::NodeConnection)?;

        xml::parse_tagging(&body)
    }

    async fn presign_get(&self, node: &Node, key: &str, expires: Duration) -> Result<String> {
        let endpoint = format!("{}://{}", node.endpoint.scheme(), node.host());
        sigv4::presign_get(
            &node.credentials,
            &self.config.region,
            &endpoint,
            &node.host(),
            &self.config.bucket,
            key,
            expires.as_secs(),
            Utc::now(),
        )
    }
}
