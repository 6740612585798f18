//! Header rewriting for cache replay and outbound fetches.

use edgeproxy_core::CacheMeta;
use edgeproxy_core::store::entry::header_value;

use crate::route::Headers;

/// Via token attached to every outbound fetch.
pub const VIA_HEADER_VALUE: &str = "1.1 CDN_EdgeProxy";

/// Engine tag emitted on replayed responses.
pub const ENGINE_TAG: &str = concat!("edgeproxy/", env!("CARGO_PKG_VERSION"));

/// Bodies cross the automation boundary decompressed, so the origin's
/// encoding and length headers are dropped on every fulfill path.
const DROP_ON_REPLAY: &[&str] = &["content-encoding", "content-length", "transfer-encoding"];

/// Headers for replaying a cached asset body.
pub fn replay_headers(stored: &Headers) -> Headers {
    decorated(stored, "HIT")
}

/// Headers for replaying a cached document body.
pub fn replay_doc_headers(stored: &Headers) -> Headers {
    decorated(stored, "DOC-HIT")
}

fn decorated(stored: &Headers, marker: &str) -> Headers {
    let mut headers = strip_encoding(stored);
    headers.insert("x-edgeproxy".into(), marker.into());
    headers.insert("x-edgeproxy-engine".into(), ENGINE_TAG.into());
    headers
}

/// Drop encoding/length headers from an origin response before fulfilling.
pub fn strip_encoding(headers: &Headers) -> Headers {
    headers
        .iter()
        .filter(|(name, _)| !DROP_ON_REPLAY.contains(&name.to_ascii_lowercase().as_str()))
        .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
        .collect()
}

/// Request headers for an unconditional outbound fetch.
pub fn outbound(request: &Headers) -> Headers {
    let mut headers = request.clone();
    headers.insert("via".into(), VIA_HEADER_VALUE.into());
    headers
}

/// Request headers for a conditional revalidation fetch.
pub fn conditional(request: &Headers, meta: &CacheMeta) -> Headers {
    let mut headers = outbound(request);
    if let Some(etag) = &meta.etag {
        headers.insert("if-none-match".into(), etag.clone());
    }
    if let Some(last_modified) = &meta.last_modified {
        headers.insert("if-modified-since".into(), last_modified.clone());
    }
    headers
}

/// Origin-advertised content length, when present and parseable.
pub fn content_length(headers: &Headers) -> Option<u64> {
    header_value(headers, "content-length")?.trim().parse().ok()
}
