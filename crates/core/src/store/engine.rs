//! The storage engine: content-addressed blobs, metadata and alias indices,
//! deduplication, eviction, and debounced crash-safe persistence.
//!
//! On disk the engine owns one directory:
//!
//! ```text
//! <cache>/
//!   index.json          { <hex-cache-key>: <entry> }
//!   alias-index.json    { <alias-string>: <hex-cache-key> }
//!   blobs/<xx>/<hex>    raw body bytes, sharded on the first two hex chars
//! ```
//!
//! The in-memory state is authoritative; the JSON files are a snapshot that
//! lags writes by at most the debounce window. All index writes go through
//! temp-file-then-rename. Mutations are serialized behind one async mutex,
//! which the single-owner process model makes sufficient.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use super::entry::{self, ASSET_HEADER_WHITELIST, CacheMeta, DOC_HEADER_WHITELIST};
use super::hash;
use super::stats::CacheStats;
use crate::Error;
use crate::config::AppConfig;

const INDEX_FILE: &str = "index.json";
const ALIAS_INDEX_FILE: &str = "alias-index.json";
const BLOBS_DIR: &str = "blobs";

/// Rapid put-storms within this window collapse into one index write.
const FLUSH_DEBOUNCE: Duration = Duration::from_secs(2);

/// Eviction drains total body bytes to this fraction of the cap.
const EVICTION_LOW_WATER: f64 = 0.9;

const SEVEN_DAYS_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Storage engine sizing and location.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub cache_dir: PathBuf,
    /// On-disk body byte cap.
    pub max_size_bytes: u64,
    /// Freshness window for cached bodies.
    pub body_ttl_ms: u64,
}

impl StoreConfig {
    /// Entries older than this are invisible to validator-aware lookups.
    pub fn stale_ttl_ms(&self) -> u64 {
        (30u64.saturating_mul(self.body_ttl_ms)).max(SEVEN_DAYS_MS)
    }
}

impl From<&AppConfig> for StoreConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            cache_dir: config.cache_dir.clone(),
            max_size_bytes: config.max_size_bytes,
            body_ttl_ms: config.body_ttl_ms,
        }
    }
}

/// Content-addressed cache store handle.
///
/// Clones share the same state; mutating operations form one logical
/// critical section behind the internal mutex.
#[derive(Clone)]
pub struct CacheStore {
    config: Arc<StoreConfig>,
    stats: CacheStats,
    state: Arc<Mutex<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    index: HashMap<String, CacheMeta>,
    aliases: HashMap<String, String>,
    /// Hot tier: blob hash to decompressed body bytes.
    hot: HashMap<String, Bytes>,
    /// Keys whose put observed a pre-existing blob.
    dedup: HashSet<String>,
    dirty: bool,
    flush_task: Option<tokio::task::JoinHandle<()>>,
}

impl CacheStore {
    pub fn new(config: StoreConfig) -> Self {
        Self { config: Arc::new(config), stats: CacheStats::default(), state: Arc::new(Mutex::new(StoreState::default())) }
    }

    /// Create the store and run [`CacheStore::init`].
    pub async fn open(config: StoreConfig) -> Result<Self, Error> {
        let store = Self::new(config);
        store.init().await?;
        Ok(store)
    }

    /// Per-call-site statistics sink.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Create the directory tree, load both indices, pre-load referenced
    /// blobs into the hot tier, and drop entries whose blob file is gone.
    ///
    /// Unreadable index files start fresh with a warning. Idempotent.
    pub async fn init(&self) -> Result<(), Error> {
        tokio::fs::create_dir_all(self.config.cache_dir.join(BLOBS_DIR)).await?;

        let mut state = self.state.lock().await;
        state.index = read_json_or_default(&self.config.cache_dir.join(INDEX_FILE)).await;
        state.aliases = read_json_or_default(&self.config.cache_dir.join(ALIAS_INDEX_FILE)).await;

        let referenced: HashSet<String> = state.index.values().map(|meta| meta.blob_hash.clone()).collect();
        let mut missing: HashSet<String> = HashSet::new();
        for blob_hash in referenced {
            if state.hot.contains_key(&blob_hash) {
                continue;
            }
            match tokio::fs::read(self.blob_path(&blob_hash)).await {
                Ok(bytes) => {
                    state.hot.insert(blob_hash, Bytes::from(bytes));
                }
                Err(error) => {
                    tracing::warn!(blob = %blob_hash, error = %error, "blob unreadable at startup, dropping its entries");
                    missing.insert(blob_hash);
                }
            }
        }

        if !missing.is_empty() {
            state.index.retain(|_, meta| !missing.contains(&meta.blob_hash));
            state.dirty = true;
        }

        // Aliases must point at live keys.
        let live: HashSet<String> = state.index.keys().cloned().collect();
        let before = state.aliases.len();
        state.aliases.retain(|_, key| live.contains(key));
        if state.aliases.len() != before {
            state.dirty = true;
        }

        self.write_indices_if_dirty(&mut state).await?;
        tracing::info!(
            entries = state.index.len(),
            aliases = state.aliases.len(),
            "cache store initialized"
        );
        Ok(())
    }

    /// Entry for `key`, regardless of age. Never deletes anything.
    pub async fn peek_meta(&self, key: &str) -> Option<CacheMeta> {
        self.state.lock().await.index.get(key).cloned()
    }

    /// Entry for `key` unless it has aged past the stale TTL.
    pub async fn peek_meta_allow_stale(&self, key: &str) -> Option<CacheMeta> {
        let state = self.state.lock().await;
        let meta = state.index.get(key)?;
        (now_ms().saturating_sub(meta.stored_at) < self.config.stale_ttl_ms()).then(|| meta.clone())
    }

    /// Resolve an alias to an entry.
    ///
    /// Falls back to the canonical key of the alias's stripped URL form, so
    /// a versioned request can find an entry stored for the bare URL before
    /// any alias registration happened.
    pub async fn peek_alias(&self, alias: &str) -> Option<CacheMeta> {
        let target = self.state.lock().await.aliases.get(alias).cloned();
        if let Some(key) = target
            && let Some(meta) = self.peek_meta_allow_stale(&key).await
        {
            return Some(meta);
        }
        let stripped = alias.strip_prefix("alias|")?;
        self.peek_meta_allow_stale(&hash::cache_key(stripped)).await
    }

    /// True while the entry is inside the body TTL.
    pub fn is_fresh(&self, meta: &CacheMeta) -> bool {
        now_ms().saturating_sub(meta.stored_at) < self.config.body_ttl_ms
    }

    /// Body bytes for a blob hash: hot tier first, then disk (populating
    /// the hot tier on the way back).
    pub async fn get_blob(&self, blob_hash: &str) -> Option<Bytes> {
        {
            let state = self.state.lock().await;
            if let Some(bytes) = state.hot.get(blob_hash) {
                return Some(bytes.clone());
            }
        }
        match tokio::fs::read(self.blob_path(blob_hash)).await {
            Ok(bytes) => {
                let bytes = Bytes::from(bytes);
                self.state.lock().await.hot.insert(blob_hash.to_string(), bytes.clone());
                Some(bytes)
            }
            Err(error) => {
                if error.kind() != ErrorKind::NotFound {
                    tracing::warn!(blob = %blob_hash, error = %error, "blob read failed");
                }
                None
            }
        }
    }

    /// Reset an entry's age after a confirmed revalidation.
    pub async fn refresh_ttl(&self, key: &str) {
        let mut state = self.state.lock().await;
        if let Some(meta) = state.index.get_mut(key) {
            meta.stored_at = now_ms();
            self.mark_dirty(&mut state);
        }
    }

    /// Store an asset response body and its metadata.
    ///
    /// The blob is written once per distinct body; a repeated body marks
    /// the key in the dedup set instead. A blob write failure leaves the
    /// index untouched so the caller can still serve the body uncached.
    #[allow(clippy::too_many_arguments)]
    pub async fn put(
        &self, key: &str, url: &str, body: Bytes, response_headers: &HashMap<String, String>, resource_type: &str,
        origin: &str, alias_key: Option<&str>,
    ) -> Result<(), Error> {
        self.put_inner(key, url, body, response_headers, ASSET_HEADER_WHITELIST, resource_type, origin, alias_key, true)
            .await
    }

    /// Store a document response body and its metadata.
    pub async fn put_document(
        &self, key: &str, url: &str, body: Bytes, response_headers: &HashMap<String, String>,
    ) -> Result<(), Error> {
        self.put_inner(key, url, body, response_headers, DOC_HEADER_WHITELIST, "document", "document", None, false)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn put_inner(
        &self, key: &str, url: &str, body: Bytes, response_headers: &HashMap<String, String>, whitelist: &[&str],
        resource_type: &str, origin: &str, alias_key: Option<&str>, track_dedup: bool,
    ) -> Result<(), Error> {
        let blob_hash = hash::blob_hash(&body);
        let size = body.len() as u64;

        let mut state = self.state.lock().await;
        if state.hot.contains_key(&blob_hash) {
            if track_dedup && state.dedup.insert(key.to_string()) {
                self.stats.dedup_put();
            }
        } else {
            if let Err(error) = self.write_blob(&blob_hash, &body).await {
                tracing::warn!(url, blob = %blob_hash, error = %error, "blob write failed, response not cached");
                return Err(error);
            }
            state.hot.insert(blob_hash.clone(), body);
        }

        let meta = CacheMeta {
            url: url.to_string(),
            blob_hash,
            stored_at: now_ms(),
            etag: entry::header_value(response_headers, "etag").map(str::to_string),
            last_modified: entry::header_value(response_headers, "last-modified").map(str::to_string),
            vary: entry::header_value(response_headers, "vary").map(str::to_string),
            headers: entry::filter_headers(response_headers, whitelist),
            resource_type: resource_type.to_string(),
            origin: origin.to_string(),
            size,
        };
        state.index.insert(key.to_string(), meta);
        if let Some(alias) = alias_key {
            state.aliases.insert(alias.to_string(), key.to_string());
        }
        self.mark_dirty(&mut state);
        self.evict_if_needed(&mut state).await;
        Ok(())
    }

    /// Write both index files now if anything changed, cancelling any
    /// pending debounce. Must complete before process exit.
    pub async fn flush(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        if let Some(task) = state.flush_task.take() {
            task.abort();
        }
        self.write_indices_if_dirty(&mut state).await
    }

    /// Drop oldest entries until total body bytes fit under the low-water
    /// mark, unlinking blobs nothing references anymore.
    async fn evict_if_needed(&self, state: &mut StoreState) {
        let total: u64 = state.index.values().map(|meta| meta.size).sum();
        if total <= self.config.max_size_bytes {
            return;
        }
        let low_water = (self.config.max_size_bytes as f64 * EVICTION_LOW_WATER) as u64;

        let mut order: Vec<(String, u64, u64)> = state
            .index
            .iter()
            .map(|(key, meta)| (key.clone(), meta.stored_at, meta.size))
            .collect();
        order.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut remaining = total;
        let mut evicted = 0usize;
        for (key, _, size) in order {
            if remaining <= low_water {
                break;
            }
            let Some(meta) = state.index.remove(&key) else { continue };
            state.dedup.remove(&key);
            remaining -= size;
            evicted += 1;

            let still_referenced = state.index.values().any(|m| m.blob_hash == meta.blob_hash);
            if !still_referenced {
                state.hot.remove(&meta.blob_hash);
                if let Err(error) = tokio::fs::remove_file(self.blob_path(&meta.blob_hash)).await {
                    tracing::warn!(blob = %meta.blob_hash, error = %error, "blob unlink failed, orphan until next startup");
                }
            }
        }

        let live: HashSet<String> = state.index.keys().cloned().collect();
        state.aliases.retain(|_, key| live.contains(key));

        tracing::info!(evicted, remaining_bytes = remaining, "evicted oldest cache entries");
        state.dirty = true;
        if let Err(error) = self.write_indices_if_dirty(state).await {
            tracing::warn!(error = %error, "index write after eviction failed");
        }
    }

    fn mark_dirty(&self, state: &mut StoreState) {
        state.dirty = true;
        let scheduled = state.flush_task.as_ref().is_some_and(|task| !task.is_finished());
        if !scheduled {
            let store = self.clone();
            state.flush_task = Some(tokio::spawn(async move {
                tokio::time::sleep(FLUSH_DEBOUNCE).await;
                store.debounced_flush().await;
            }));
        }
    }

    async fn debounced_flush(&self) {
        let mut state = self.state.lock().await;
        state.flush_task = None;
        if let Err(error) = self.write_indices_if_dirty(&mut state).await {
            tracing::warn!(error = %error, "debounced index flush failed");
        }
    }

    async fn write_indices_if_dirty(&self, state: &mut StoreState) -> Result<(), Error> {
        if !state.dirty {
            return Ok(());
        }
        write_json_atomic(&self.config.cache_dir.join(INDEX_FILE), &state.index).await?;
        write_json_atomic(&self.config.cache_dir.join(ALIAS_INDEX_FILE), &state.aliases).await?;
        state.dirty = false;
        Ok(())
    }

    async fn write_blob(&self, blob_hash: &str, body: &[u8]) -> Result<(), Error> {
        let path = self.blob_path(blob_hash);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = tmp_sibling(&path);
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    fn blob_path(&self, blob_hash: &str) -> PathBuf {
        let shard = blob_hash.get(..2).unwrap_or("00");
        self.config.cache_dir.join(BLOBS_DIR).join(shard).join(blob_hash)
    }

    #[cfg(test)]
    pub(crate) async fn set_stored_at(&self, key: &str, stored_at: u64) {
        let mut state = self.state.lock().await;
        if let Some(meta) = state.index.get_mut(key) {
            meta.stored_at = stored_at;
        }
    }
}

/// Wall-clock milliseconds.
pub(crate) fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

async fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "unreadable index file, starting fresh");
                T::default()
            }
        },
        Err(error) if error.kind() == ErrorKind::NotFound => T::default(),
        Err(error) => {
            tracing::warn!(path = %path.display(), error = %error, "index file read failed, starting fresh");
            T::default()
        }
    }
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = tmp_sibling(path);
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// `<path>.tmp.<pid>`; the pid suffix keeps concurrent writers off the
/// same temp name.
fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".tmp.{}", std::process::id()));
    PathBuf::from(name)
}
