//! The request handler state machine.
//!
//! Each intercepted request resolves to exactly one terminal action:
//! released to the network (bypass), fulfilled from cache, fulfilled from
//! origin, or a propagated fetch error when nothing cached can stand in.
//!
//! Assets flow through: cacheability screen, classification, key
//! derivation, primary + alias lookup, then fresh-hit / conditional
//! revalidation / cold miss, with stale-hit and stale-rescue fallbacks on
//! fetch failure. Documents take their own always-revalidate path.

use bytes::Bytes;
use edgeproxy_core::classify::{self, TrafficClass, TrafficOrigin};
use edgeproxy_core::normalize;
use edgeproxy_core::store::entry::header_value;
use edgeproxy_core::store::hash;
use edgeproxy_core::CacheMeta;

use crate::context::Context;
use crate::document;
use crate::headers;
use crate::route::{FetchedResponse, Headers, RouteError, RouteHandle};

/// Resource types eligible for the asset cache.
const CACHEABLE_RESOURCE_TYPES: &[&str] = &["stylesheet", "script", "image", "font", "media", "fetch", "xhr"];

/// Everything needed to store a fetched response under the right keys.
struct StorePlan {
    base_key: String,
    canonical: String,
    accept: Option<String>,
    alias_key: Option<String>,
    origin: TrafficOrigin,
}

/// Handle one intercepted request to its terminal action.
pub async fn handle_request<R: RouteHandle>(ctx: &Context, route: &R) -> Result<(), RouteError> {
    if !route.method().eq_ignore_ascii_case("GET") {
        return route.proceed().await;
    }
    if route.resource_type() == "document" {
        return document::handle_document(ctx, route).await;
    }
    if !CACHEABLE_RESOURCE_TYPES.contains(&route.resource_type()) {
        return route.proceed().await;
    }

    let classification = ctx.classifier.classify(route.url(), route.resource_type());
    if classification.class != TrafficClass::Cacheable {
        tracing::debug!(url = route.url(), class = ?classification.class, "bypassing revenue traffic");
        return route.proceed().await;
    }

    serve_asset(ctx, route, classification.origin).await
}

async fn serve_asset<R: RouteHandle>(ctx: &Context, route: &R, origin: TrafficOrigin) -> Result<(), RouteError> {
    let url = route.url();
    let canonical = normalize::canonical(url, origin);
    let accept = header_value(route.headers(), "accept").map(str::to_string);
    let alias_key = normalize::alias(url);

    let (cache_key, mut meta) = effective_lookup(ctx, &canonical, accept.as_deref()).await;
    let mut used_alias = false;
    if meta.is_none()
        && let Some(alias) = &alias_key
    {
        meta = ctx.store.peek_alias(alias).await;
        used_alias = meta.is_some();
    }

    let plan = StorePlan { base_key: hash::cache_key(&canonical), canonical, accept, alias_key, origin };

    let fresh = match &meta {
        Some(m) if ctx.store.is_fresh(m) => Some(m.clone()),
        _ => None,
    };
    if let Some(m) = fresh {
        if let Some(blob) = ctx.store.get_blob(&m.blob_hash).await {
            ctx.store
                .stats()
                .hit(url, route.resource_type(), origin.as_str(), blob.len() as u64, blob.len() as u64);
            return route.fulfill(200, headers::replay_headers(&m.headers), blob).await;
        }
        // An entry without a readable blob is as good as absent.
        meta = None;
    }

    match meta {
        Some(m) if m.has_validators() => revalidate(ctx, route, cache_key, m, used_alias, plan).await,
        rescue => cold_miss(ctx, route, plan, rescue).await,
    }
}

/// Base-key lookup, redirected to the Accept-variant key when the stored
/// entry declares `Vary: Accept`.
async fn effective_lookup(ctx: &Context, canonical: &str, accept: Option<&str>) -> (String, Option<CacheMeta>) {
    let base_key = hash::cache_key(canonical);
    let meta = ctx.store.peek_meta_allow_stale(&base_key).await;
    if let Some(m) = &meta
        && let Some(vary) = &m.vary
        && normalize::varies_on_accept(vary)
    {
        let variant_key = hash::cache_key(&normalize::vary_suffix(canonical, accept, Some(vary)));
        let variant = ctx.store.peek_meta_allow_stale(&variant_key).await;
        return (variant_key, variant);
    }
    (base_key, meta)
}

async fn revalidate<R: RouteHandle>(
    ctx: &Context, route: &R, cache_key: String, meta: CacheMeta, used_alias: bool, plan: StorePlan,
) -> Result<(), RouteError> {
    match route.fetch(headers::conditional(route.headers(), &meta)).await {
        Ok(response) if response.status() == 304 => {
            let Some(blob) = ctx.store.get_blob(&meta.blob_hash).await else {
                tracing::warn!(url = route.url(), "validated entry lost its blob, refetching");
                return cold_miss(ctx, route, plan, None).await;
            };
            ctx.store.refresh_ttl(&cache_key).await;
            if used_alias {
                // Alias promotion: the next direct request finds a
                // canonical entry instead of revalidating again.
                if let Err(error) = ctx
                    .store
                    .put(
                        &cache_key,
                        route.url(),
                        blob.clone(),
                        &meta.headers,
                        route.resource_type(),
                        plan.origin.as_str(),
                        plan.alias_key.as_deref(),
                    )
                    .await
                {
                    tracing::warn!(error = %error, url = route.url(), "alias promotion failed");
                }
            }
            ctx.store.stats().revalidated(
                route.url(),
                route.resource_type(),
                plan.origin.as_str(),
                blob.len() as u64,
                blob.len() as u64,
            );
            route.fulfill(200, headers::replay_headers(&meta.headers), blob).await
        }
        Ok(response) => store_and_fulfill(ctx, route, response, plan).await,
        Err(error) => {
            // Stale-hit: the origin is unreachable but the body is on hand.
            if let Some(blob) = ctx.store.get_blob(&meta.blob_hash).await {
                tracing::debug!(url = route.url(), error = %error, "origin unreachable, serving stale body");
                ctx.store
                    .stats()
                    .hit(route.url(), route.resource_type(), plan.origin.as_str(), blob.len() as u64, blob.len() as u64);
                return route.fulfill(200, headers::replay_headers(&meta.headers), blob).await;
            }
            cold_miss(ctx, route, plan, None).await
        }
    }
}

async fn cold_miss<R: RouteHandle>(
    ctx: &Context, route: &R, plan: StorePlan, rescue: Option<CacheMeta>,
) -> Result<(), RouteError> {
    match route.fetch(headers::outbound(route.headers())).await {
        Ok(response) => store_and_fulfill(ctx, route, response, plan).await,
        Err(error) => {
            // Stale-rescue: last resort before surfacing the failure.
            if let Some(meta) = rescue
                && let Some(blob) = ctx.store.get_blob(&meta.blob_hash).await
            {
                tracing::warn!(url = route.url(), error = %error, "origin fetch failed, rescuing stale body");
                return route.fulfill(200, headers::replay_headers(&meta.headers), blob).await;
            }
            Err(error)
        }
    }
}

async fn store_and_fulfill<R: RouteHandle>(
    ctx: &Context, route: &R, response: R::Response, plan: StorePlan,
) -> Result<(), RouteError> {
    let status = response.status();
    let ok = response.ok();
    let response_headers = response.headers().clone();
    let body = response.body().await?;
    let wire_bytes = headers::content_length(&response_headers).unwrap_or(body.len() as u64);
    let resource_type = route.resource_type();
    let origin = plan.origin.as_str();

    // fetch/xhr bodies only enter the cache when the payload looks static.
    let fetch_like = resource_type == "fetch" || resource_type == "xhr";
    if fetch_like && !classify::should_cache_by_content_type(header_value(&response_headers, "content-type")) {
        ctx.store.stats().miss(route.url(), resource_type, origin, body.len() as u64, wire_bytes);
        return route.fulfill(status, headers::strip_encoding(&response_headers), body).await;
    }

    if ok && !body.is_empty() {
        store_response(ctx, route, &response_headers, &body, &plan).await;
        ctx.store.stats().miss(route.url(), resource_type, origin, body.len() as u64, wire_bytes);
    } else {
        ctx.store.stats().miss(route.url(), resource_type, origin, 0, 0);
    }
    route.fulfill(status, headers::strip_encoding(&response_headers), body).await
}

async fn store_response<R: RouteHandle>(
    ctx: &Context, route: &R, response_headers: &Headers, body: &Bytes, plan: &StorePlan,
) {
    let vary = header_value(response_headers, "vary");
    let store_key = match vary {
        Some(v) if normalize::varies_on_accept(v) => {
            hash::cache_key(&normalize::vary_suffix(&plan.canonical, plan.accept.as_deref(), Some(v)))
        }
        _ => plan.base_key.clone(),
    };
    if store_key != plan.base_key {
        // The base entry records the Vary so later lookups redirect to the
        // right variant; both entries share one blob.
        if let Err(error) = ctx
            .store
            .put(&plan.base_key, route.url(), body.clone(), response_headers, route.resource_type(), plan.origin.as_str(), None)
            .await
        {
            tracing::warn!(error = %error, url = route.url(), "vary base entry store failed");
        }
    }
    if let Err(error) = ctx
        .store
        .put(
            &store_key,
            route.url(),
            body.clone(),
            response_headers,
            route.resource_type(),
            plan.origin.as_str(),
            plan.alias_key.as_deref(),
        )
        .await
    {
        tracing::warn!(error = %error, url = route.url(), "cache store failed, serving uncached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{FakeResponse, FakeRoute, Outcome, test_context, test_context_with_ttl};
    use bytes::Bytes;
    use std::collections::HashMap;

    fn asset_headers() -> HashMap<String, String> {
        [("content-type".to_string(), "text/javascript".to_string())].into()
    }

    #[tokio::test]
    async fn test_non_get_continues() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path()).await;
        let route = FakeRoute::new("POST", "https://cdn.example/a.js", "script");
        handle_request(&ctx, &route).await.unwrap();
        assert_eq!(route.outcome(), Outcome::Continued);
        assert!(route.fetch_count() == 0);
    }

    #[tokio::test]
    async fn test_uncacheable_resource_type_continues() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path()).await;
        let route = FakeRoute::get("https://site.example/ws", "websocket");
        handle_request(&ctx, &route).await.unwrap();
        assert_eq!(route.outcome(), Outcome::Continued);
    }

    #[tokio::test]
    async fn test_classifier_bypass_leaves_storage_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path()).await;
        let route = FakeRoute::get("https://ad.doubleclick.net/gampad/ads?foo=1", "script");
        handle_request(&ctx, &route).await.unwrap();
        assert_eq!(route.outcome(), Outcome::Continued);

        let canonical = normalize::canonical("https://ad.doubleclick.net/gampad/ads?foo=1", TrafficOrigin::Ad);
        assert!(ctx.store.peek_meta(&hash::cache_key(&canonical)).await.is_none());
        assert_eq!(ctx.store.stats().snapshot().misses, 0);
    }

    #[tokio::test]
    async fn test_fresh_hit_serves_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path()).await;
        let url = "https://cdn.example/a.js";
        let key = hash::cache_key(&normalize::canonical(url, TrafficOrigin::ThirdParty));
        ctx.store
            .put(&key, url, Bytes::from_static(b"X"), &asset_headers(), "script", "third-party", None)
            .await
            .unwrap();

        let route = FakeRoute::get(url, "script");
        handle_request(&ctx, &route).await.unwrap();

        let (status, headers, body) = route.fulfilled();
        assert_eq!(status, 200);
        assert_eq!(&body[..], b"X");
        assert_eq!(headers.get("x-edgeproxy").map(String::as_str), Some("HIT"));
        assert_eq!(route.fetch_count(), 0);
        let snap = ctx.store.stats().snapshot();
        assert_eq!(snap.hits, 1);
        assert_eq!(snap.misses, 0);
    }

    #[tokio::test]
    async fn test_stale_with_etag_revalidates_on_304() {
        let dir = tempfile::tempdir().unwrap();
        // TTL floor: every entry is instantly stale.
        let ctx = test_context_with_ttl(dir.path(), 0).await;
        let url = "https://cdn.example/a.js";
        let key = hash::cache_key(&normalize::canonical(url, TrafficOrigin::ThirdParty));
        let mut stored_headers = asset_headers();
        stored_headers.insert("etag".into(), "\"v1\"".into());
        ctx.store
            .put(&key, url, Bytes::from_static(b"X"), &stored_headers, "script", "third-party", None)
            .await
            .unwrap();
        let stored_at_before = ctx.store.peek_meta(&key).await.unwrap().stored_at;

        let route = FakeRoute::get(url, "script").respond(FakeResponse::new(304, b""));
        handle_request(&ctx, &route).await.unwrap();

        let (status, headers, body) = route.fulfilled();
        assert_eq!(status, 200);
        assert_eq!(&body[..], b"X");
        assert_eq!(headers.get("x-edgeproxy").map(String::as_str), Some("HIT"));

        // The conditional fetch carried the validators and the via tag.
        let sent = route.seen_fetch_headers();
        assert_eq!(sent[0].get("if-none-match").map(String::as_str), Some("\"v1\""));
        assert_eq!(sent[0].get("via").map(String::as_str), Some(headers::VIA_HEADER_VALUE));

        let meta = ctx.store.peek_meta(&key).await.unwrap();
        assert!(meta.stored_at >= stored_at_before);
        let snap = ctx.store.stats().snapshot();
        assert_eq!(snap.revalidated, 1);
        assert_eq!(snap.hits, 1);
    }

    #[tokio::test]
    async fn test_revalidation_200_replaces_entry() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context_with_ttl(dir.path(), 0).await;
        let url = "https://cdn.example/a.js";
        let key = hash::cache_key(&normalize::canonical(url, TrafficOrigin::ThirdParty));
        let mut stored_headers = asset_headers();
        stored_headers.insert("etag".into(), "\"v1\"".into());
        ctx.store
            .put(&key, url, Bytes::from_static(b"old"), &stored_headers, "script", "third-party", None)
            .await
            .unwrap();

        let route = FakeRoute::get(url, "script").respond(
            FakeResponse::new(200, b"new").with_header("content-type", "text/javascript").with_header("etag", "\"v2\""),
        );
        handle_request(&ctx, &route).await.unwrap();

        let (_, _, body) = route.fulfilled();
        assert_eq!(&body[..], b"new");
        let meta = ctx.store.peek_meta(&key).await.unwrap();
        assert_eq!(meta.etag.as_deref(), Some("\"v2\""));
        assert_eq!(&ctx.store.get_blob(&meta.blob_hash).await.unwrap()[..], b"new");
        assert_eq!(ctx.store.stats().snapshot().misses, 1);
    }

    #[tokio::test]
    async fn test_cold_miss_fetches_and_stores() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path()).await;
        let url = "https://cdn.example/fresh.css";
        let route = FakeRoute::get(url, "stylesheet").respond(
            FakeResponse::new(200, b"body{}").with_header("content-type", "text/css").with_header("content-length", "3"),
        );
        handle_request(&ctx, &route).await.unwrap();

        let (status, headers, body) = route.fulfilled();
        assert_eq!(status, 200);
        assert_eq!(&body[..], b"body{}");
        // Origin headers replayed without the edge markers on a miss.
        assert!(!headers.contains_key("x-edgeproxy"));

        let key = hash::cache_key(&normalize::canonical(url, TrafficOrigin::ThirdParty));
        let meta = ctx.store.peek_meta(&key).await.unwrap();
        assert_eq!(meta.resource_type, "stylesheet");
        let snap = ctx.store.stats().snapshot();
        assert_eq!(snap.misses, 1);
        // Wire bytes come from the advertised content-length.
        assert_eq!(snap.wire_bytes_fetched, 3);
        assert_eq!(snap.body_bytes_fetched, 6);
    }

    #[tokio::test]
    async fn test_cold_miss_non_2xx_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path()).await;
        let url = "https://cdn.example/missing.js";
        let route = FakeRoute::get(url, "script").respond(FakeResponse::new(404, b"not found"));
        handle_request(&ctx, &route).await.unwrap();

        let (status, _, _) = route.fulfilled();
        assert_eq!(status, 404);
        let key = hash::cache_key(&normalize::canonical(url, TrafficOrigin::ThirdParty));
        assert!(ctx.store.peek_meta(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_fetch_response_screened_by_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path()).await;
        let url = "https://api.example/v1/session";
        let route = FakeRoute::get(url, "xhr")
            .respond(FakeResponse::new(200, b"{\"ok\":true}").with_header("content-type", "application/json"));
        handle_request(&ctx, &route).await.unwrap();

        let (status, _, body) = route.fulfilled();
        assert_eq!(status, 200);
        assert_eq!(&body[..], b"{\"ok\":true}");
        let key = hash::cache_key(&normalize::canonical(url, TrafficOrigin::ThirdParty));
        assert!(ctx.store.peek_meta(&key).await.is_none());
        assert_eq!(ctx.store.stats().snapshot().misses, 1);
    }

    #[tokio::test]
    async fn test_fetch_response_with_static_payload_cached() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path()).await;
        let url = "https://cdn.example/data/font-loader";
        let route = FakeRoute::get(url, "fetch")
            .respond(FakeResponse::new(200, b"wasmbits").with_header("content-type", "application/wasm"));
        handle_request(&ctx, &route).await.unwrap();

        let key = hash::cache_key(&normalize::canonical(url, TrafficOrigin::ThirdParty));
        assert!(ctx.store.peek_meta(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_stale_hit_when_revalidation_fetch_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context_with_ttl(dir.path(), 0).await;
        let url = "https://cdn.example/a.js";
        let key = hash::cache_key(&normalize::canonical(url, TrafficOrigin::ThirdParty));
        let mut stored_headers = asset_headers();
        stored_headers.insert("etag".into(), "\"v1\"".into());
        ctx.store
            .put(&key, url, Bytes::from_static(b"X"), &stored_headers, "script", "third-party", None)
            .await
            .unwrap();

        let route = FakeRoute::get(url, "script").fail_fetch();
        handle_request(&ctx, &route).await.unwrap();

        let (status, headers, body) = route.fulfilled();
        assert_eq!(status, 200);
        assert_eq!(&body[..], b"X");
        assert_eq!(headers.get("x-edgeproxy").map(String::as_str), Some("HIT"));
        assert_eq!(ctx.store.stats().snapshot().hits, 1);
    }

    #[tokio::test]
    async fn test_stale_rescue_without_validators() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context_with_ttl(dir.path(), 0).await;
        let url = "https://cdn.example/a.js";
        let key = hash::cache_key(&normalize::canonical(url, TrafficOrigin::ThirdParty));
        // No validators: the handler goes straight to the cold miss path.
        ctx.store
            .put(&key, url, Bytes::from_static(b"X"), &asset_headers(), "script", "third-party", None)
            .await
            .unwrap();
        let hits_before = ctx.store.stats().snapshot().hits;

        let route = FakeRoute::get(url, "script").fail_fetch();
        handle_request(&ctx, &route).await.unwrap();

        let (status, _, body) = route.fulfilled();
        assert_eq!(status, 200);
        assert_eq!(&body[..], b"X");
        // Rescue leaves the counters alone.
        assert_eq!(ctx.store.stats().snapshot().hits, hits_before);
    }

    #[tokio::test]
    async fn test_cold_miss_failure_without_cache_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path()).await;
        let route = FakeRoute::get("https://cdn.example/never-seen.js", "script").fail_fetch();
        let result = handle_request(&ctx, &route).await;
        assert!(matches!(result, Err(RouteError::Fetch(_))));
        assert!(route.no_outcome());
    }

    #[tokio::test]
    async fn test_alias_promotion_after_304() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context_with_ttl(dir.path(), 0).await;

        // Entry exists for the bare URL only.
        let bare_key = hash::cache_key(&normalize::canonical("https://cdn.example/lib.js", TrafficOrigin::ThirdParty));
        let mut stored_headers = asset_headers();
        stored_headers.insert("etag".into(), "\"v1\"".into());
        ctx.store
            .put(&bare_key, "https://cdn.example/lib.js", Bytes::from_static(b"LIB"), &stored_headers, "script", "third-party", None)
            .await
            .unwrap();

        // Versioned request misses canonically, hits via the alias, and the
        // origin confirms with a 304.
        let versioned = "https://cdn.example/lib.js?v=9";
        let route = FakeRoute::get(versioned, "script").respond(FakeResponse::new(304, b""));
        handle_request(&ctx, &route).await.unwrap();

        let (_, _, body) = route.fulfilled();
        assert_eq!(&body[..], b"LIB");

        // Promotion: the versioned canonical key now resolves directly.
        let versioned_key = hash::cache_key(&normalize::canonical(versioned, TrafficOrigin::ThirdParty));
        let promoted = ctx.store.peek_meta(&versioned_key).await.unwrap();
        assert_eq!(&ctx.store.get_blob(&promoted.blob_hash).await.unwrap()[..], b"LIB");
        assert_eq!(ctx.store.stats().snapshot().revalidated, 1);
    }

    #[tokio::test]
    async fn test_vary_accept_variants_cached_separately() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path()).await;
        let url = "https://cdn.example/hero.img";

        // First client negotiates avif.
        let avif_route = FakeRoute::get(url, "image").with_request_header("accept", "image/avif").respond(
            FakeResponse::new(200, b"AVIF").with_header("content-type", "image/avif").with_header("vary", "Accept"),
        );
        handle_request(&ctx, &avif_route).await.unwrap();

        // Second client negotiates webp: the avif variant must not leak.
        let webp_route = FakeRoute::get(url, "image").with_request_header("accept", "image/webp").respond(
            FakeResponse::new(200, b"WEBP").with_header("content-type", "image/webp").with_header("vary", "Accept"),
        );
        handle_request(&ctx, &webp_route).await.unwrap();
        let (_, _, webp_body) = webp_route.fulfilled();
        assert_eq!(&webp_body[..], b"WEBP");
        assert_eq!(webp_route.fetch_count(), 1);

        // Each client now gets its own variant as a fresh hit.
        let avif_again = FakeRoute::get(url, "image").with_request_header("accept", "image/avif");
        handle_request(&ctx, &avif_again).await.unwrap();
        let (_, headers, body) = avif_again.fulfilled();
        assert_eq!(&body[..], b"AVIF");
        assert_eq!(headers.get("x-edgeproxy").map(String::as_str), Some("HIT"));
        assert_eq!(avif_again.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_replay_never_carries_encoding_headers() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path()).await;
        let url = "https://cdn.example/a.js";
        let route = FakeRoute::get(url, "script").respond(
            FakeResponse::new(200, b"X")
                .with_header("content-type", "text/javascript")
                .with_header("content-encoding", "br")
                .with_header("content-length", "1")
                .with_header("transfer-encoding", "chunked"),
        );
        handle_request(&ctx, &route).await.unwrap();
        let (_, miss_headers, _) = route.fulfilled();
        for name in ["content-encoding", "content-length", "transfer-encoding"] {
            assert!(!miss_headers.contains_key(name), "{name} leaked on miss fulfill");
        }

        let again = FakeRoute::get(url, "script");
        handle_request(&ctx, &again).await.unwrap();
        let (_, hit_headers, _) = again.fulfilled();
        for name in ["content-encoding", "content-length", "transfer-encoding"] {
            assert!(!hit_headers.contains_key(name), "{name} leaked on cache replay");
        }
    }

    #[tokio::test]
    async fn test_repeated_requests_one_miss_then_revalidations() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context_with_ttl(dir.path(), 0).await;
        let url = "https://cdn.example/cycle.js";
        let key = hash::cache_key(&normalize::canonical(url, TrafficOrigin::ThirdParty));

        let first = FakeRoute::get(url, "script").respond(
            FakeResponse::new(200, b"X").with_header("content-type", "text/javascript").with_header("etag", "\"v1\""),
        );
        handle_request(&ctx, &first).await.unwrap();
        let mut last_stored_at = ctx.store.peek_meta(&key).await.unwrap().stored_at;

        for _ in 0..3 {
            let route = FakeRoute::get(url, "script").respond(FakeResponse::new(304, b""));
            handle_request(&ctx, &route).await.unwrap();
            let (_, _, body) = route.fulfilled();
            assert_eq!(&body[..], b"X");
            let stored_at = ctx.store.peek_meta(&key).await.unwrap().stored_at;
            assert!(stored_at >= last_stored_at);
            last_stored_at = stored_at;
        }

        let snap = ctx.store.stats().snapshot();
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.revalidated, 3);
    }
}
