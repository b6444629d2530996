//! AWS Signature Version 4 for outgoing S3 requests.
//!
//! Header-based signing for API calls and query-string signing for
//! presigned download links.
//!
//! [Reference](https://docs.aws.amazon.com/AmazonS3/latest/API/sig-v4-authenticating-requests.html)

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::domain::Credentials;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

/// SHA-256 of the empty payload.
pub(crate) const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Maximum lifetime of a presigned URL (7 days).
pub(crate) const MAX_PRESIGN_SECONDS: u64 = 604_800;

/// Request parts covered by the signature.
pub(crate) struct CanonicalRequest<'a> {
    pub method: &'a str,
    /// Already percent-encoded path, e.g. `/bucket/some%20key`
    pub path: &'a str,
    /// Decoded query parameters
    pub query: &'a [(String, String)],
    /// Lowercase header names with values; all of them are signed
    pub headers: &'a [(String, String)],
    pub payload_hash: &'a str,
}

impl CanonicalRequest<'_> {
    fn signed_headers(&self) -> String {
        let mut names: Vec<&str> = self.headers.iter().map(|(n, _)| n.as_str()).collect();
        names.sort_unstable();
        names.join(";")
    }

    fn to_canonical_string(&self) -> String {
        let mut headers: Vec<(&str, &str)> = self
            .headers
            .iter()
            .map(|(n, v)| (n.as_str(), v.trim()))
            .collect();
        headers.sort_by_key(|(name, _)| *name);

        let mut canonical_headers = String::new();
        for (name, value) in headers {
            canonical_headers.push_str(name);
            canonical_headers.push(':');
            canonical_headers.push_str(value);
            canonical_headers.push('\n');
        }

        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.method,
            if self.path.is_empty() { "/" } else { self.path },
            canonical_query(self.query),
            canonical_headers,
            self.signed_headers(),
            self.payload_hash
        )
    }
}

/// `Authorization` header value for a request signed at `now`.
///
/// `headers` must already contain `host`, `x-amz-date` (formatted from
/// `now`) and `x-amz-content-sha256`.
pub(crate) fn authorization(
    credentials: &Credentials,
    region: &str,
    request: &CanonicalRequest<'_>,
    now: DateTime<Utc>,
) -> String {
    let date = now.format("%Y%m%d").to_string();
    let scope = format!("{date}/{region}/{SERVICE}/aws4_request");
    let string_to_sign = string_to_sign(&amz_date(now), &scope, &request.to_canonical_string());
    let key = signing_key(&credentials.secret_key, &date, region);
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

    format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={}, Signature={signature}",
        credentials.access_key,
        request.signed_headers()
    )
}

/// Presigned GET URL for `bucket/key` on `endpoint` (scheme://host[:port]).
#[allow(clippy::too_many_arguments)]
pub(crate) fn presign_get(
    credentials: &Credentials,
    region: &str,
    endpoint: &str,
    host: &str,
    bucket: &str,
    key: &str,
    expires_secs: u64,
    now: DateTime<Utc>,
) -> Result<String> {
    if credentials.access_key.is_empty() || credentials.secret_key.is_empty() {
        return Err(Error::Presign("missing credentials".into()));
    }
    if bucket.is_empty() || key.is_empty() {
        return Err(Error::Presign("bucket and key are required".into()));
    }

    let date = now.format("%Y%m%d").to_string();
    let scope = format!("{date}/{region}/{SERVICE}/aws4_request");
    let path = object_path(bucket, key);

    let query = vec![
        ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
        (
            "X-Amz-Credential".to_string(),
            format!("{}/{scope}", credentials.access_key),
        ),
        ("X-Amz-Date".to_string(), amz_date(now)),
        (
            "X-Amz-Expires".to_string(),
            expires_secs.clamp(1, MAX_PRESIGN_SECONDS).to_string(),
        ),
        ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
    ];
    let headers = vec![("host".to_string(), host.to_string())];

    let request = CanonicalRequest {
        method: "GET",
        path: &path,
        query: &query,
        headers: &headers,
        payload_hash: "UNSIGNED-PAYLOAD",
    };
    let string_to_sign = string_to_sign(&amz_date(now), &scope, &request.to_canonical_string());
    let signing_key = signing_key(&credentials.secret_key, &date, region);
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    Ok(format!(
        "{}{path}?{}&X-Amz-Signature={signature}",
        endpoint.trim_end_matches('/'),
        canonical_query(&query)
    ))
}

/// `YYYYMMDD'T'HHMMSS'Z'`
pub(crate) fn amz_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Hex SHA-256 of a payload.
pub(crate) fn payload_sha256(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Path-style object path with every key segment percent-encoded.
pub(crate) fn object_path(bucket: &str, key: &str) -> String {
    let encoded: Vec<String> = key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("/{}/{}", urlencoding::encode(bucket), encoded.join("/"))
}

/// Query string with keys and values percent-encoded and sorted.
pub(crate) fn canonical_query(params: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            (
                urlencoding::encode(k).into_owned(),
                urlencoding::encode(v).into_owned(),
            )
        })
        .collect();
    pairs.sort();

    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn string_to_sign(timestamp: &str, scope: &str, canonical_request: &str) -> String {
    let hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    format!("{ALGORITHM}\n{timestamp}\n{scope}\n{hash}")
}

fn signing_key(secret: &str, date: &str, region: &str) -> Vec<u8> {
    let date_key = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let region_key = hmac_sha256(&date_key, region.as_bytes());
    let service_key = hmac_sha256(&region_key, SERVICE.as_bytes());
    hmac_sha256(&service_key, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
