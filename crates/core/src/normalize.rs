//! URL normalization for cache keying.
//!
//! Three key shapes are derived from a raw URL:
//!
//! - **canonical**: lowercased host + path + a filtered, sorted query.
//!   Tracking parameters always drop; for ad-origin URLs cache-buster
//!   parameters and long decimal values drop too. Hashed to form the
//!   primary index key.
//! - **alias**: a secondary identifier that survives cache-buster churn on
//!   static assets and ad CDN paths.
//! - **document**: `doc:`-prefixed host + path with a narrow tracking
//!   filter, keying the always-revalidate document store.
//!
//! All functions are pure. A URL that fails to parse round-trips unchanged
//! (canonical/document) or yields no alias.

use md5::{Digest, Md5};
use url::Url;

use crate::classify::TrafficOrigin;

/// Query parameters that never contribute to resource identity.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "utm_id",
    "gclid",
    "gclsrc",
    "dclid",
    "fbclid",
    "msclkid",
    "yclid",
    "twclid",
    "igshid",
    "ttclid",
    "mc_cid",
    "mc_eid",
    "_ga",
    "_gl",
    "mkt_tok",
    "vero_id",
    "oly_enc_id",
    "oly_anon_id",
];

/// Parameters ad servers rotate per-impression to defeat caching.
const CACHE_BUSTER_PARAMS: &[&str] = &[
    "cb",
    "cachebuster",
    "cache_buster",
    "cbuster",
    "rnd",
    "rand",
    "random",
    "ord",
    "correlator",
    "t",
    "ts",
    "timestamp",
    "nc",
    "_",
    "__",
];

/// Hosts whose query strings carry no resource identity at all: the
/// canonical collapses to host + path.
const PATH_ONLY_HOSTS: &[&str] = &[
    "fonts.googleapis.com",
    "fonts.gstatic.com",
    "use.typekit.net",
    "p.typekit.net",
    "tpc.googlesyndication.com",
    "pagead2.googlesyndication.com",
    "securepubads.g.doubleclick.net",
    "s0.2mdn.net",
];

/// Ad CDNs whose creatives are stable per path; the alias strips the whole
/// query string.
const AD_ALIAS_HOSTS: &[&str] = &[
    "s0.2mdn.net",
    "tpc.googlesyndication.com",
    "pagead2.googlesyndication.com",
    "securepubads.g.doubleclick.net",
    "static.criteo.net",
    "cdn.adsafeprotected.com",
    "static.adsafeprotected.com",
    "z.moatads.com",
    "c.amazon-adsystem.com",
    "acdn.adnxs.com",
    "cdn.doubleverify.com",
];

/// File extensions treated as static assets for alias derivation.
const STATIC_EXTENSIONS: &[&str] = &[
    "js", "css", "woff", "woff2", "ttf", "otf", "eot", "svg", "png", "jpg", "jpeg", "gif", "webp", "avif", "ico",
    "wasm", "mp4", "webm", "mp3", "ogg",
];

/// Version/cache-buster parameter names stripped when deriving an alias
/// for a static asset.
const VERSION_PARAMS: &[&str] = &[
    "v",
    "ver",
    "version",
    "hash",
    "h",
    "rev",
    "build",
    "cb",
    "cachebuster",
    "cache_buster",
    "t",
    "ts",
    "timestamp",
    "_",
    "__",
    "rnd",
    "rand",
    "random",
    "nc",
    "chunk",
    "m",
];

/// Tracking parameters stripped from document URLs. `utm_*` is matched by
/// prefix on top of this list.
const DOC_TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "_ga", "_gl", "mc_cid", "mc_eid", "ref", "ref_", "twclid", "igshid", "ttclid", "dclid",
    "msclkid", "yclid",
];

/// Compute the canonical key source for a URL.
///
/// Duplicate parameter keys are preserved and the surviving pairs are
/// sorted by (key, value), so any permutation of the original query string
/// canonicalizes identically.
pub fn canonical(url: &str, origin: TrafficOrigin) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    let path = parsed.path();

    if PATH_ONLY_HOSTS.contains(&host.as_str()) {
        return format!("{host}{path}");
    }

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, value)| keep_param(key.as_ref(), value.as_ref(), origin))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if pairs.is_empty() {
        return format!("{host}{path}");
    }
    pairs.sort();
    format!("{host}{path}?{}", encode_pairs(&pairs))
}

fn keep_param(key: &str, value: &str, origin: TrafficOrigin) -> bool {
    let lower = key.to_ascii_lowercase();
    if TRACKING_PARAMS.contains(&lower.as_str()) {
        return false;
    }
    if origin == TrafficOrigin::Ad {
        if CACHE_BUSTER_PARAMS.contains(&lower.as_str()) {
            return false;
        }
        // Impression ids and epoch stamps: ten or more decimal digits.
        if value.len() >= 10 && value.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
    }
    true
}

/// Compute the alias key source for a URL, if one applies.
///
/// Ad CDN hosts alias on the bare path; static assets alias on the path
/// plus the query minus version parameters, but only when at least one
/// version parameter was actually removed.
pub fn alias(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let path = parsed.path();

    if AD_ALIAS_HOSTS.contains(&host.as_str()) {
        return Some(format!("alias|{host}{path}"));
    }

    let extension = path.rsplit('/').next()?.rsplit_once('.')?.1.to_ascii_lowercase();
    if !STATIC_EXTENSIONS.contains(&extension.as_str()) {
        return None;
    }

    let mut dropped = false;
    let mut survivors: Vec<(String, String)> = Vec::new();
    for (key, value) in parsed.query_pairs() {
        if VERSION_PARAMS.contains(&key.to_ascii_lowercase().as_str()) {
            dropped = true;
        } else {
            survivors.push((key.into_owned(), value.into_owned()));
        }
    }
    if !dropped {
        return None;
    }

    survivors.sort();
    if survivors.is_empty() {
        Some(format!("alias|{host}{path}"))
    } else {
        Some(format!("alias|{host}{path}?{}", encode_pairs(&survivors)))
    }
}

/// Compute the document key source (`doc:` + host + path + narrow filter).
pub fn document(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return format!("doc:{url}");
    };
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    let path = parsed.path();

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !is_doc_tracking(key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if pairs.is_empty() {
        return format!("doc:{host}{path}");
    }
    pairs.sort();
    format!("doc:{host}{path}?{}", encode_pairs(&pairs))
}

fn is_doc_tracking(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    lower.starts_with("utm_") || DOC_TRACKING_PARAMS.contains(&lower.as_str())
}

/// True when a stored `Vary` header names the `accept` token.
pub fn varies_on_accept(vary: &str) -> bool {
    vary.split(',').any(|token| token.trim().eq_ignore_ascii_case("accept"))
}

/// Extend a canonical key source with the negotiated Accept variant.
///
/// Only applies when the stored `Vary` names `accept`; otherwise the
/// canonical passes through unchanged.
pub fn vary_suffix(canonical: &str, request_accept: Option<&str>, stored_vary: Option<&str>) -> String {
    let Some(vary) = stored_vary else {
        return canonical.to_string();
    };
    if !varies_on_accept(vary) {
        return canonical.to_string();
    }
    let accept = request_accept.unwrap_or_default().trim();
    let digest = hex::encode(Md5::digest(accept.as_bytes()));
    format!("{canonical}|accept={}", &digest[..8])
}

fn encode_pairs(pairs: &[(String, String)]) -> String {
    let mut encoder = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        encoder.append_pair(key, value);
    }
    encoder.finish()
}
