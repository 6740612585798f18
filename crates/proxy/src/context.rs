//! Shared wiring for the request pipeline.
//!
//! One `Context` is built in the entry point and threaded through every
//! request task; nothing in the pipeline is process-global.

use std::time::Duration;

use edgeproxy_core::store::StoreConfig;
use edgeproxy_core::{AppConfig, CacheStore, Classifier, Error};

/// Classifier + storage + report cadence for one proxy session.
pub struct Context {
    pub classifier: Classifier,
    pub store: CacheStore,
    pub report_interval: Duration,
}

impl Context {
    pub fn new(classifier: Classifier, store: CacheStore, report_interval: Duration) -> Self {
        Self { classifier, store, report_interval }
    }

    /// Build the full pipeline context from configuration.
    ///
    /// Initializes the storage engine; a failure here is fatal for the
    /// session (exit code 1 at the embedder).
    pub async fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let classifier = Classifier::new(&config.auction_patterns, &config.beacon_patterns);
        let store = CacheStore::open(StoreConfig::from(config)).await?;
        Ok(Self::new(classifier, store, config.report_interval()))
    }
}
