//! S3 XML response bodies, deserialized via `quick-xml` + `serde`.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{Error, Result};

// -----------------------------------------------------------------------
// ListObjectsV2 (GET /bucket?list-type=2)
// -----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ObjectEntry>,
    #[serde(default)]
    is_truncated: bool,
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ObjectEntry {
    key: String,
}

/// One page of a bucket listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ListPage {
    pub keys: Vec<String>,
    /// Token for the next page, if the listing was truncated
    pub continuation: Option<String>,
}

pub(crate) fn parse_list_objects(body: &str) -> Result<ListPage> {
    let result: ListBucketResult = quick_xml::de::from_str(body)
        .map_err(|e| Error::ResponseParse(format!("ListBucketResult: {e}")))?;

    let continuation = if result.is_truncated {
        match result.next_continuation_token {
            Some(token) if !token.is_empty() => Some(token),
            _ => {
                return Err(Error::ResponseParse(
                    "truncated listing without continuation token".into(),
                ))
            }
        }
    } else {
        None
    };

    Ok(ListPage {
        keys: result.contents.into_iter().map(|e| e.key).collect(),
        continuation,
    })
}

// -----------------------------------------------------------------------
// GetObjectTagging (GET /bucket/key?tagging)
// -----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Tagging {
    #[serde(default)]
    tag_set: TagSet,
}

#[derive(Debug, Default, Deserialize)]
struct TagSet {
    #[serde(rename = "Tag", default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Tag {
    key: String,
    #[serde(default)]
    value: String,
}

pub(crate) fn parse_tagging(body: &str) -> Result<BTreeMap<String, String>> {
    let tagging: Tagging = quick_xml::de::from_str(body)
        .map_err(|e| Error::ResponseParse(format!("Tagging: {e}")))?;

    Ok(tagging
        .tag_set
        .tags
        .into_iter()
        .map(|t| (t.key, t.value))
        .collect())
}

/// `x-amz-tagging` header value (URL query encoding of the tag set).
pub(crate) fn tagging_header(tags: &BTreeMap<String, String>) -> String {
    tags.iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_objects_page() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>dataspace</Name>
  <Prefix></Prefix>
  <KeyCount>2</KeyCount>
  <MaxKeys>1000</MaxKeys>
  <IsTruncated>true</IsTruncated>
  <Contents><Key>a.csv</Key><Size>10</Size><ETag>"x"</ETag></Contents>
  <Contents><Key>dir/b.json</Key><Size>20</Size><ETag>"y"</ETag></Contents>
  <NextContinuationToken>token-2</NextContinuationToken>
</ListBucketResult>"#;

        let page = parse_list_objects(body).unwrap();
        assert_eq!(page.keys, vec!["a.csv", "dir/b.json"]);
        assert_eq!(page.continuation.as_deref(), Some("token-2"));
    }

    #[test]
    fn test_parse_empty_listing() {
        let body = r#"<ListBucketResult><Name>dataspace</Name><KeyCount>0</KeyCount><IsTruncated>false</IsTruncated></ListBucketResult>"#;
        let page = parse_list_objects(body).unwrap();
        assert!(page.keys.is_empty());
        assert!(page.continuation.is_none());
    }

    #[test]
    fn test_truncated_listing_needs_token() {
        let body = r#"<ListBucketResult><IsTruncated>true</IsTruncated></ListBucketResult>"#;
        assert!(parse_list_objects(body).is_err());
    }

    #[test]
    fn test_parse_tagging() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<Tagging xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <TagSet>
    <Tag><Key>project</Key><Value>sedimark</Value></Tag>
    <Tag><Key>a</Key><Value>1</Value></Tag>
  </TagSet>
</Tagging>"#;

        let tags = parse_tagging(body).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("project").map(String::as_str), Some("sedimark"));
    }

    #[test]
    fn test_parse_empty_tag_set() {
        let tags = parse_tagging("<Tagging><TagSet></TagSet></Tagging>").unwrap();
        assert!(tags.is_empty());
    }

    #[test]
    fn test_tagging_header_encodes() {
        let tags = [("a", "1"), ("team name", "data&ml")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(tagging_header(&tags), "a=1&team%20name=data%26ml");
    }
}
