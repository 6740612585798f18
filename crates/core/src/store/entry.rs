//! Cache entry metadata and stored-header filtering.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Response headers persisted for asset replays.
pub const ASSET_HEADER_WHITELIST: &[&str] = &[
    "content-type",
    "cache-control",
    "etag",
    "last-modified",
    "vary",
    "access-control-allow-origin",
    "access-control-allow-credentials",
    "access-control-allow-methods",
    "access-control-allow-headers",
    "access-control-expose-headers",
    "timing-allow-origin",
    "x-content-type-options",
];

/// Response headers persisted for document replays: the asset set plus the
/// security and session headers a page load depends on.
pub const DOC_HEADER_WHITELIST: &[&str] = &[
    "content-type",
    "cache-control",
    "etag",
    "last-modified",
    "vary",
    "access-control-allow-origin",
    "access-control-allow-credentials",
    "access-control-allow-methods",
    "access-control-allow-headers",
    "access-control-expose-headers",
    "timing-allow-origin",
    "x-content-type-options",
    "content-security-policy",
    "x-frame-options",
    "set-cookie",
    "link",
];

/// Metadata record for one cached response.
///
/// Serialized into `index.json` keyed by the hex cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMeta {
    /// Original request URL, kept for reporting.
    pub url: String,
    /// SHA-256 of the body, lowercased hex.
    pub blob_hash: String,
    /// Wall-clock milliseconds at store/refresh time.
    pub stored_at: u64,
    /// Whitelisted response headers, lowercased names.
    pub headers: HashMap<String, String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub vary: Option<String>,
    /// Resource type tag from the automation layer.
    pub resource_type: String,
    /// Origin label (`ad`, `third-party`, or `document`).
    pub origin: String,
    /// Body byte length.
    pub size: u64,
}

impl CacheMeta {
    /// True when the entry can be conditionally revalidated.
    pub fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }
}

/// Reduce response headers to a stored whitelist, lowercasing names.
pub fn filter_headers(headers: &HashMap<String, String>, whitelist: &[&str]) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.to_ascii_lowercase();
            whitelist.contains(&name.as_str()).then_some((name, value.clone()))
        })
        .collect()
}

/// Case-insensitive single-header lookup.
pub fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_filter_headers_whitelist_and_case() {
        let input = headers(&[
            ("Content-Type", "text/css"),
            ("ETag", "\"v1\""),
            ("X-Powered-By", "nope"),
            ("Content-Encoding", "br"),
        ]);
        let filtered = filter_headers(&input, ASSET_HEADER_WHITELIST);
        assert_eq!(filtered.get("content-type").map(String::as_str), Some("text/css"));
        assert_eq!(filtered.get("etag").map(String::as_str), Some("\"v1\""));
        assert!(!filtered.contains_key("x-powered-by"));
        assert!(!filtered.contains_key("content-encoding"));
    }

    #[test]
    fn test_document_whitelist_is_wider() {
        let input = headers(&[("Set-Cookie", "sid=1"), ("Link", "<...>; rel=preload")]);
        assert!(filter_headers(&input, ASSET_HEADER_WHITELIST).is_empty());
        let doc = filter_headers(&input, DOC_HEADER_WHITELIST);
        assert_eq!(doc.len(), 2);
        assert!(doc.contains_key("set-cookie"));
    }

    #[test]
    fn test_has_validators() {
        let mut meta = CacheMeta {
            url: "https://a.example/x".into(),
            blob_hash: "00".repeat(32),
            stored_at: 0,
            headers: HashMap::new(),
            etag: None,
            last_modified: None,
            vary: None,
            resource_type: "script".into(),
            origin: "third-party".into(),
            size: 0,
        };
        assert!(!meta.has_validators());
        meta.last_modified = Some("Mon, 01 Jan 2024 00:00:00 GMT".into());
        assert!(meta.has_validators());
        meta.etag = Some("\"v1\"".into());
        meta.last_modified = None;
        assert!(meta.has_validators());
    }

    #[test]
    fn test_meta_json_schema_field_names() {
        let meta = CacheMeta {
            url: "https://a.example/x".into(),
            blob_hash: "ab".repeat(32),
            stored_at: 1_700_000_000_000,
            headers: HashMap::new(),
            etag: Some("\"v1\"".into()),
            last_modified: None,
            vary: None,
            resource_type: "script".into(),
            origin: "third-party".into(),
            size: 12,
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"blobHash\""));
        assert!(json.contains("\"storedAt\""));
        assert!(json.contains("\"lastModified\""));
        assert!(json.contains("\"resourceType\""));
        let back: CacheMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back.blob_hash, meta.blob_hash);
        assert_eq!(back.size, 12);
    }

    #[test]
    fn test_header_value_case_insensitive() {
        let input = headers(&[("Content-Type", "image/png")]);
        assert_eq!(header_value(&input, "content-type"), Some("image/png"));
        assert_eq!(header_value(&input, "CONTENT-TYPE"), Some("image/png"));
        assert_eq!(header_value(&input, "etag"), None);
    }
}
