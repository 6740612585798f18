//! Application configuration with layered loading.
//!
//! Loading precedence (highest wins):
//!
//! 1. Environment variables (EDGEPROXY_*)
//! 2. TOML config file (if EDGEPROXY_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root of the cache directory tree.
    ///
    /// Set via EDGEPROXY_CACHE_DIR environment variable.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// On-disk body byte cap; eviction drains to 90% of this.
    ///
    /// Set via EDGEPROXY_MAX_SIZE_BYTES environment variable.
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,

    /// Freshness window for cached bodies, in milliseconds. Entries older
    /// than this revalidate; entries older than `max(30×, 7 days)` are
    /// treated as absent.
    ///
    /// Set via EDGEPROXY_BODY_TTL_MS environment variable.
    #[serde(default = "default_body_ttl_ms")]
    pub body_ttl_ms: u64,

    /// Class-A (auction) bypass patterns; glob syntax, `*` is the only
    /// wildcard.
    #[serde(default = "default_auction_patterns")]
    pub auction_patterns: Vec<String>,

    /// Class-B (beacon/measurement) bypass patterns.
    #[serde(default = "default_beacon_patterns")]
    pub beacon_patterns: Vec<String>,

    /// Seconds between savings reports.
    ///
    /// Set via EDGEPROXY_REPORT_INTERVAL_SECS environment variable.
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,

    /// Browser channel for the automation layer (pass-through).
    #[serde(default)]
    pub browser_channel: Option<String>,

    /// Log verbosity, 0 (errors only) through 4 (trace).
    #[serde(default = "default_log_level")]
    pub log_level: u8,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/cdn-cache")
}

fn default_max_size_bytes() -> u64 {
    2 * 1024 * 1024 * 1024 * 1024 // 2 TiB
}

fn default_body_ttl_ms() -> u64 {
    24 * 60 * 60 * 1000 // 24h
}

fn default_report_interval_secs() -> u64 {
    60
}

fn default_log_level() -> u8 {
    2
}

fn default_auction_patterns() -> Vec<String> {
    [
        "*doubleclick.net*/gampad/ads?*",
        "*googlesyndication.com/pagead/ads?*",
        "*adnxs.com/ut/v3*",
        "*amazon-adsystem.com/e/dtb*",
        "*casalemedia.com/cygnus*",
        "*openx.net/w/1.0/arj*",
        "*rubiconproject.com/exchange/*",
        "*pubmatic.com/AdServer/*",
        "*adsrvr.org/bid/*",
        "*indexww.com/cygnus*",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_beacon_patterns() -> Vec<String> {
    [
        "*google-analytics.com/*collect*",
        "*analytics.google.com/g/collect*",
        "*facebook.com/tr*",
        "*scorecardresearch.com/b?*",
        "*demdex.net/event*",
        "*bat.bing.com/action*",
        "*px.ads.linkedin.com*",
        "*doubleclick.net/*/view?*",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_size_bytes: default_max_size_bytes(),
            body_ttl_ms: default_body_ttl_ms(),
            auction_patterns: default_auction_patterns(),
            beacon_patterns: default_beacon_patterns(),
            report_interval_secs: default_report_interval_secs(),
            browser_channel: None,
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Body TTL as a Duration.
    pub fn body_ttl(&self) -> Duration {
        Duration::from_millis(self.body_ttl_ms)
    }

    /// Report cadence as a Duration.
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    /// Tracing filter directive for the configured verbosity level.
    pub fn env_filter_directive(&self) -> &'static str {
        match self.log_level {
            0 => "error",
            1 => "warn",
            2 => "info",
            3 => "debug",
            _ => "trace",
        }
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a source cannot be read or parsed, or if
    /// validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("EDGEPROXY_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("EDGEPROXY_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
