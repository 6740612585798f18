//! Traffic classification for intercepted requests.
//!
//! Every request is sorted into one of three classes before the cache is
//! consulted:
//!
//! - `Auction` (A): ad decisioning traffic, always released untouched
//! - `Beacon` (B): measurement traffic, always released untouched
//! - `Cacheable` (C): creative and asset traffic, eligible for the cache
//!
//! Classes A and B are matched by configurable glob pattern lists; a path
//! heuristic catches unlisted beacon endpoints. The origin label (`ad` vs
//! `third-party`) is derived from a curated set of ad-infrastructure
//! substrings and feeds statistics and aggressive normalization only.

use regex::{Regex, RegexSet};
use url::Url;

/// Hostname/URL substrings identifying ad and measurement infrastructure.
const AD_INFRA_SUBSTRINGS: &[&str] = &[
    "doubleclick",
    "googlesyndication",
    "googleadservices",
    "adservice.google",
    "amazon-adsystem",
    "adnxs",
    "adsrvr",
    "adsafeprotected",
    "doubleverify",
    "moatads",
    "criteo",
    "casalemedia",
    "rubiconproject",
    "pubmatic",
    "openx.net",
    "indexww",
    "taboola",
    "outbrain",
    "scorecardresearch",
    "smartadserver",
    "teads",
    "33across",
    "adform",
    "bidswitch",
    "sharethrough",
    "triplelift",
    "yieldmo",
    "2mdn.net",
];

/// Path segments that mark measurement endpoints when the resource type
/// is consistent with a tracking pixel.
const BEACON_PATH_TOKENS: &[&str] = &["pixel", "beacon", "collect", "impression", "ping", "log", "fire"];

const BEACON_RESOURCE_TYPES: &[&str] = &["image", "ping", "other"];

/// Three-valued traffic class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficClass {
    /// Ad auction / decisioning traffic (class A).
    Auction,
    /// Measurement / beacon traffic (class B).
    Beacon,
    /// Creative or asset traffic eligible for caching (class C).
    Cacheable,
}

/// Origin label for statistics and normalization aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficOrigin {
    Ad,
    ThirdParty,
}

impl TrafficOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficOrigin::Ad => "ad",
            TrafficOrigin::ThirdParty => "third-party",
        }
    }
}

/// Result of classifying one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub class: TrafficClass,
    pub origin: TrafficOrigin,
}

/// Pattern-driven request classifier.
///
/// Constructed once from the configured class-A and class-B glob lists and
/// shared across the whole session.
pub struct Classifier {
    auction: RegexSet,
    beacon: RegexSet,
}

impl Classifier {
    /// Compile the configured pattern lists.
    ///
    /// Patterns that fail to compile are skipped with a warning; an empty or
    /// fully invalid list yields a set that matches nothing.
    pub fn new(auction_patterns: &[String], beacon_patterns: &[String]) -> Self {
        Self { auction: compile_patterns(auction_patterns), beacon: compile_patterns(beacon_patterns) }
    }

    /// Classify a request by URL and automation-layer resource type.
    pub fn classify(&self, url: &str, resource_type: &str) -> Classification {
        let parsed = Url::parse(url).ok();
        let host = parsed
            .as_ref()
            .and_then(|u| u.host_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let origin = if is_ad_infrastructure(&host, url) { TrafficOrigin::Ad } else { TrafficOrigin::ThirdParty };

        if self.auction.is_match(url) {
            return Classification { class: TrafficClass::Auction, origin };
        }
        if self.beacon.is_match(url) {
            return Classification { class: TrafficClass::Beacon, origin };
        }
        if BEACON_RESOURCE_TYPES.contains(&resource_type) && path_looks_like_beacon(parsed.as_ref()) {
            return Classification { class: TrafficClass::Beacon, origin };
        }

        Classification { class: TrafficClass::Cacheable, origin }
    }
}

fn is_ad_infrastructure(host: &str, url: &str) -> bool {
    let url_lower = url.to_ascii_lowercase();
    AD_INFRA_SUBSTRINGS
        .iter()
        .any(|s| host.contains(s) || url_lower.contains(s))
}

fn path_looks_like_beacon(parsed: Option<&Url>) -> bool {
    let Some(url) = parsed else { return false };
    let path = url.path();
    if path == "/tr" || path == "/tr/" {
        return true;
    }
    // Segment-delimited: "/log/x" counts, "/blog/x" does not.
    path.split('/')
        .any(|segment| BEACON_PATH_TOKENS.contains(&segment.to_ascii_lowercase().as_str()))
}

/// Convert the configured glob lists into one case-insensitive regex set.
fn compile_patterns(patterns: &[String]) -> RegexSet {
    let mut sources = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        let source = format!("(?i){}", glob_to_regex(pattern));
        match Regex::new(&source) {
            Ok(_) => sources.push(source),
            Err(error) => {
                tracing::warn!(pattern = %pattern, error = %error, "skipping unparseable traffic pattern");
            }
        }
    }
    RegexSet::new(&sources).unwrap_or_else(|error| {
        tracing::warn!(error = %error, "traffic pattern set failed to compile, matching nothing");
        RegexSet::empty()
    })
}

/// Escape regex meta-characters, mapping `*` to `.*`.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    for ch in glob.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '.' | '+' | '^' | '$' | '{' | '}' | '(' | ')' | '|' | '[' | ']' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Decide whether a fetch/xhr response body is worth caching.
///
/// Media resources (images, video, audio, fonts) and code-ish payloads
/// (css, javascript, wasm, svg, non-HTML xml) qualify; everything else is
/// assumed to be a dynamic API response.
pub fn should_cache_by_content_type(content_type: Option<&str>) -> bool {
    let Some(raw) = content_type else { return false };
    let media = raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    if media.is_empty() {
        return false;
    }
    if ["image/", "video/", "audio/", "font/"].iter().any(|p| media.starts_with(p)) {
        return true;
    }
    if ["font", "css", "javascript", "wasm", "svg"].iter().any(|t| media.contains(t)) {
        return true;
    }
    media.contains("xml") && !media.contains("html")
}
