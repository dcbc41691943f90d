//! Configuration validation.

use std::collections::BTreeSet;

use super::Config;
use crate::error::{Result, SyncError};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.connection_string.is_none() && config.source.dsn.trim().is_empty() {
        return Err(SyncError::Config(
            "source.dsn is required (or set source.connection_string)".into(),
        ));
    }

    // API validation
    let url = url::Url::parse(&config.api.base_url)
        .map_err(|e| SyncError::Config(format!("api.base_url is invalid: {}", e)))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(SyncError::Config(format!(
            "api.base_url must be http or https, got '{}'",
            url.scheme()
        )));
    }
    if config.api.client_id.trim().is_empty() {
        return Err(SyncError::Config("api.client_id is required".into()));
    }
    if config.api.timeout_secs == 0 {
        return Err(SyncError::Config(
            "api.timeout_secs must be at least 1".into(),
        ));
    }
    if !config.api.backoff_factor_secs.is_finite() || config.api.backoff_factor_secs < 0.0 {
        return Err(SyncError::Config(
            "api.backoff_factor_secs must be a non-negative number".into(),
        ));
    }
    if let Some(status) = config
        .api
        .retry_statuses
        .iter()
        .find(|s| !(100..=599).contains(*s))
    {
        return Err(SyncError::Config(format!(
            "api.retry_statuses contains invalid HTTP status {}",
            status
        )));
    }

    // Batch sizes are checked here so partitioning never sees zero.
    if config.sync.default_batch_size == 0 {
        return Err(SyncError::Config(
            "sync.default_batch_size must be at least 1".into(),
        ));
    }
    if config.sync.large_table_batch_size == 0 {
        return Err(SyncError::Config(
            "sync.large_table_batch_size must be at least 1".into(),
        ));
    }
    for (kind, overrides) in &config.sync.entities {
        if let Some(0) = overrides.batch_size {
            return Err(SyncError::Config(format!(
                "sync.entities.{}.batch_size must be at least 1",
                kind
            )));
        }
        if let Some(ref endpoint) = overrides.endpoint {
            if !endpoint.starts_with('/') {
                return Err(SyncError::Config(format!(
                    "sync.entities.{}.endpoint must start with '/'",
                    kind
                )));
            }
        }
    }

    // Order must be non-empty and free of duplicates
    if config.sync.order.is_empty() {
        return Err(SyncError::Config(
            "sync.order must list at least one entity".into(),
        ));
    }
    let mut seen = BTreeSet::new();
    for kind in &config.sync.order {
        if !seen.insert(*kind) {
            return Err(SyncError::Config(format!(
                "sync.order lists '{}' more than once",
                kind
            )));
        }
    }

    Ok(())
}
