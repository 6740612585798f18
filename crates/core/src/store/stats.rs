//! Per-class cache statistics.
//!
//! Call sites in the request handler report hits, revalidations, and misses
//! with both decompressed body bytes and origin-advertised wire bytes; the
//! two feed separate savings totals (disk/memory vs compressed bandwidth).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Cap on distinct URL prefixes tracked for the report.
const MAX_TRACKED_PREFIXES: usize = 48;

/// URL prefix length used for grouping.
const PREFIX_LEN: usize = 120;

/// Shared statistics handle; clones observe the same counters.
#[derive(Clone, Default)]
pub struct CacheStats {
    inner: Arc<Mutex<StatsState>>,
}

#[derive(Default)]
struct StatsState {
    hits: u64,
    misses: u64,
    revalidated: u64,
    doc_hits: u64,
    doc_misses: u64,
    dedup_puts: u64,
    body_bytes_saved: u64,
    wire_bytes_saved: u64,
    body_bytes_fetched: u64,
    wire_bytes_fetched: u64,
    per_origin: HashMap<String, GroupCounters>,
    per_type: HashMap<String, GroupCounters>,
    prefixes: HashMap<String, u64>,
}

/// Counters for one origin label or resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupCounters {
    pub hits: u64,
    pub misses: u64,
    pub revalidated: u64,
    pub bytes_saved: u64,
}

/// Point-in-time copy of the counters, ready for rendering.
#[derive(Debug, Clone)]
pub struct ReportSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub revalidated: u64,
    pub doc_hits: u64,
    pub doc_misses: u64,
    pub dedup_puts: u64,
    pub body_bytes_saved: u64,
    pub wire_bytes_saved: u64,
    pub body_bytes_fetched: u64,
    pub wire_bytes_fetched: u64,
    /// (origin label, counters), descending by bytes saved.
    pub per_origin: Vec<(String, GroupCounters)>,
    /// (resource type, counters), descending by bytes saved.
    pub per_type: Vec<(String, GroupCounters)>,
    /// (url prefix, cumulative saved bytes), descending, top ten.
    pub top_prefixes: Vec<(String, u64)>,
}

impl CacheStats {
    /// Record a fresh or stale cache hit.
    pub fn hit(&self, url: &str, resource_type: &str, origin: &str, body_bytes: u64, wire_bytes: u64) {
        let mut s = self.lock();
        s.hits += 1;
        s.body_bytes_saved += body_bytes;
        s.wire_bytes_saved += wire_bytes;
        let group = s.per_origin.entry(origin.to_string()).or_default();
        group.hits += 1;
        group.bytes_saved += wire_bytes;
        let group = s.per_type.entry(resource_type.to_string()).or_default();
        group.hits += 1;
        group.bytes_saved += wire_bytes;
        s.credit_prefix(url, wire_bytes);
    }

    /// Record a 304-confirmed replay. Counts as a served-from-cache hit too.
    pub fn revalidated(&self, url: &str, resource_type: &str, origin: &str, body_bytes: u64, wire_bytes: u64) {
        let mut s = self.lock();
        s.hits += 1;
        s.revalidated += 1;
        s.body_bytes_saved += body_bytes;
        s.wire_bytes_saved += wire_bytes;
        let group = s.per_origin.entry(origin.to_string()).or_default();
        group.hits += 1;
        group.revalidated += 1;
        group.bytes_saved += wire_bytes;
        let group = s.per_type.entry(resource_type.to_string()).or_default();
        group.hits += 1;
        group.revalidated += 1;
        group.bytes_saved += wire_bytes;
        s.credit_prefix(url, wire_bytes);
    }

    /// Record a fetch from origin.
    pub fn miss(&self, _url: &str, resource_type: &str, origin: &str, body_bytes: u64, wire_bytes: u64) {
        let mut s = self.lock();
        s.misses += 1;
        s.body_bytes_fetched += body_bytes;
        s.wire_bytes_fetched += wire_bytes;
        s.per_origin.entry(origin.to_string()).or_default().misses += 1;
        s.per_type.entry(resource_type.to_string()).or_default().misses += 1;
    }

    /// Record a 304-confirmed document replay.
    pub fn doc_hit(&self, url: &str, body_bytes: u64, wire_bytes: u64) {
        let mut s = self.lock();
        s.doc_hits += 1;
        s.body_bytes_saved += body_bytes;
        s.wire_bytes_saved += wire_bytes;
        s.credit_prefix(url, wire_bytes);
    }

    /// Record a document fetched from origin.
    pub fn doc_miss(&self, _url: &str, body_bytes: u64, wire_bytes: u64) {
        let mut s = self.lock();
        s.doc_misses += 1;
        s.body_bytes_fetched += body_bytes;
        s.wire_bytes_fetched += wire_bytes;
    }

    /// Record a put whose body deduplicated against an existing blob.
    pub fn dedup_put(&self) {
        self.lock().dedup_puts += 1;
    }

    /// Copy the counters for rendering.
    pub fn snapshot(&self) -> ReportSnapshot {
        let s = self.lock();
        let mut per_origin: Vec<_> = s.per_origin.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        per_origin.sort_by(|a, b| b.1.bytes_saved.cmp(&a.1.bytes_saved).then_with(|| a.0.cmp(&b.0)));
        let mut per_type: Vec<_> = s.per_type.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        per_type.sort_by(|a, b| b.1.bytes_saved.cmp(&a.1.bytes_saved).then_with(|| a.0.cmp(&b.0)));
        let mut top_prefixes: Vec<_> = s.prefixes.iter().map(|(k, v)| (k.clone(), *v)).collect();
        top_prefixes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_prefixes.truncate(10);

        ReportSnapshot {
            hits: s.hits,
            misses: s.misses,
            revalidated: s.revalidated,
            doc_hits: s.doc_hits,
            doc_misses: s.doc_misses,
            dedup_puts: s.dedup_puts,
            body_bytes_saved: s.body_bytes_saved,
            wire_bytes_saved: s.wire_bytes_saved,
            body_bytes_fetched: s.body_bytes_fetched,
            wire_bytes_fetched: s.wire_bytes_fetched,
            per_origin,
            per_type,
            top_prefixes,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatsState> {
        self.inner.lock().expect("stats mutex poisoned")
    }
}

impl StatsState {
    fn credit_prefix(&mut self, url: &str, bytes: u64) {
        let prefix = match url.char_indices().nth(PREFIX_LEN) {
            Some((idx, _)) => &url[..idx],
            None => url,
        };
        if let Some(total) = self.prefixes.get_mut(prefix) {
            *total += bytes;
            return;
        }
        if self.prefixes.len() >= MAX_TRACKED_PREFIXES {
            // Displace the coldest tracked prefix to stay bounded.
            if let Some(coldest) = self
                .prefixes
                .iter()
                .min_by_key(|(_, total)| **total)
                .map(|(key, _)| key.clone())
            {
                self.prefixes.remove(&coldest);
            }
        }
        self.prefixes.insert(prefix.to_string(), bytes);
    }
}
