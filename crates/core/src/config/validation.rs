//! Configuration validation rules.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `max_size_bytes` is 0
    /// - `body_ttl_ms` is under one minute
    /// - `report_interval_secs` is 0
    /// - `log_level` exceeds 4
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_size_bytes".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.body_ttl_ms < 60_000 {
            return Err(ConfigError::Invalid {
                field: "body_ttl_ms".into(),
                reason: "must be at least one minute (60000ms)".into(),
            });
        }

        if self.report_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "report_interval_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.log_level > 4 {
            return Err(ConfigError::Invalid { field: "log_level".into(), reason: "must be 0-4".into() });
        }

        if self.auction_patterns.is_empty() {
            tracing::warn!("auction_patterns is empty; ad auction traffic will be treated as cacheable");
        }

        Ok(())
    }
}
