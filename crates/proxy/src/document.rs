//! Always-revalidate handling for HTML documents.
//!
//! Documents are never served from cache without asking the origin first:
//! a stored entry only short-circuits the body transfer when the origin
//! answers 304. Entries are keyed under `doc:` + a narrowly filtered URL
//! and only stored when the origin hands out validators.

use edgeproxy_core::CacheMeta;
use edgeproxy_core::normalize;
use edgeproxy_core::store::entry::header_value;
use edgeproxy_core::store::hash;

use crate::context::Context;
use crate::headers;
use crate::route::{FetchedResponse, Headers, RouteError, RouteHandle};

pub(crate) async fn handle_document<R: RouteHandle>(ctx: &Context, route: &R) -> Result<(), RouteError> {
    let key = hash::cache_key(&normalize::document(route.url()));

    match ctx.store.peek_meta(&key).await {
        Some(meta) if meta.has_validators() => conditional_document(ctx, route, key, meta).await,
        _ => unconditional_document(ctx, route, key).await,
    }
}

async fn conditional_document<R: RouteHandle>(
    ctx: &Context, route: &R, key: String, meta: CacheMeta,
) -> Result<(), RouteError> {
    match route.fetch(headers::conditional(route.headers(), &meta)).await {
        Ok(response) if response.status() == 304 => {
            if let Some(blob) = ctx.store.get_blob(&meta.blob_hash).await {
                ctx.store.stats().doc_hit(route.url(), blob.len() as u64, blob.len() as u64);
                return route.fulfill(200, headers::replay_doc_headers(&meta.headers), blob).await;
            }
            tracing::warn!(url = route.url(), "document entry lost its blob, refetching");
            unconditional_document(ctx, route, key).await
        }
        Ok(response) if response.ok() => {
            let response_headers = response.headers().clone();
            let status = response.status();
            let body = response.body().await?;
            let wire_bytes = headers::content_length(&response_headers).unwrap_or(body.len() as u64);
            if has_validators(&response_headers) && !body.is_empty() {
                if let Err(error) = ctx.store.put_document(&key, route.url(), body.clone(), &response_headers).await {
                    tracing::warn!(error = %error, url = route.url(), "document store failed");
                }
                ctx.store.stats().doc_miss(route.url(), body.len() as u64, wire_bytes);
            }
            route.fulfill(status, headers::strip_encoding(&response_headers), body).await
        }
        Ok(response) => {
            // Non-2xx passes through uncached.
            let response_headers = response.headers().clone();
            let status = response.status();
            let body = response.body().await?;
            route.fulfill(status, headers::strip_encoding(&response_headers), body).await
        }
        Err(error) => {
            if let Some(blob) = ctx.store.get_blob(&meta.blob_hash).await {
                tracing::warn!(url = route.url(), error = %error, "origin unreachable, serving stale document");
                return route.fulfill(200, headers::replay_doc_headers(&meta.headers), blob).await;
            }
            // Let the browser surface the network error itself.
            tracing::debug!(url = route.url(), error = %error, "document fetch failed with nothing cached");
            route.proceed().await
        }
    }
}

async fn unconditional_document<R: RouteHandle>(ctx: &Context, route: &R, key: String) -> Result<(), RouteError> {
    match route.fetch(headers::outbound(route.headers())).await {
        Ok(response) => {
            let response_headers = response.headers().clone();
            let status = response.status();
            let body = response.body().await?;
            let wire_bytes = headers::content_length(&response_headers).unwrap_or(body.len() as u64);
            if response.ok() && !body.is_empty() && has_validators(&response_headers) {
                if let Err(error) = ctx.store.put_document(&key, route.url(), body.clone(), &response_headers).await {
                    tracing::warn!(error = %error, url = route.url(), "document store failed");
                }
            }
            ctx.store.stats().doc_miss(route.url(), body.len() as u64, wire_bytes);
            route.fulfill(status, headers::strip_encoding(&response_headers), body).await
        }
        Err(error) => {
            // An entry without validators may still hold a usable body.
            if let Some(meta) = ctx.store.peek_meta(&key).await
                && let Some(blob) = ctx.store.get_blob(&meta.blob_hash).await
            {
                tracing::warn!(url = route.url(), error = %error, "origin unreachable, serving stale document");
                return route.fulfill(200, headers::replay_doc_headers(&meta.headers), blob).await;
            }
            Err(error)
        }
    }
}

fn has_validators(response_headers: &Headers) -> bool {
    header_value(response_headers, "etag").is_some() || header_value(response_headers, "last-modified").is_some()
}
