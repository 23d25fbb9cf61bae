//! Configuration validation
//!
//! Rules:
//! - batch limit within 1..=1000
//! - endpoint is a non-empty http(s) URL
//! - storage capacity of at least 1 KiB
//! - fewer than 10 instant retries
//! - intervals, timeouts, workers and queues greater than zero

use contracts::{
    ChannelConfig, ContractError, MAX_INSTANT_RETRIES_LIMIT, MAX_TELEMETRIES_IN_BATCH_LIMIT,
};

/// Smallest storage budget accepted
pub const MIN_STORAGE_CAPACITY: u64 = 1024;

/// Validate a `ChannelConfig`, returning the first problem found
pub fn validate(config: &ChannelConfig) -> Result<(), ContractError> {
    validate_buffer(config)?;
    validate_network(config)?;
    validate_storage(config)?;
    validate_policy(config)?;
    validate_workers(config)?;
    Ok(())
}

fn validate_buffer(config: &ChannelConfig) -> Result<(), ContractError> {
    let limit = config.buffer.max_telemetries_in_batch;
    if !(1..=MAX_TELEMETRIES_IN_BATCH_LIMIT).contains(&limit) {
        return Err(ContractError::config_validation(
            "buffer.max_telemetries_in_batch",
            format!("must be within 1..={MAX_TELEMETRIES_IN_BATCH_LIMIT}, got {limit}"),
        ));
    }
    positive("buffer.flush_interval_ms", config.buffer.flush_interval_ms)
}

fn validate_network(config: &ChannelConfig) -> Result<(), ContractError> {
    let network = &config.network;
    let url = network.endpoint_url.trim();
    if url.is_empty() {
        return Err(ContractError::config_validation(
            "network.endpoint_url",
            "endpoint cannot be empty",
        ));
    }
    let scheme_ok = ["http://", "https://"].iter().any(|scheme| {
        url.len() > scheme.len() && url[..scheme.len()].eq_ignore_ascii_case(scheme)
    });
    if !scheme_ok {
        return Err(ContractError::config_validation(
            "network.endpoint_url",
            format!("endpoint must be an http(s) URL, got '{url}'"),
        ));
    }

    if network.max_instant_retries >= MAX_INSTANT_RETRIES_LIMIT {
        return Err(ContractError::config_validation(
            "network.max_instant_retries",
            format!(
                "must be less than {MAX_INSTANT_RETRIES_LIMIT}, got {}",
                network.max_instant_retries
            ),
        ));
    }

    positive("network.request_timeout_ms", network.request_timeout_ms)?;
    positive("network.max_concurrent_sends", network.max_concurrent_sends as u64)?;
    positive("network.queue_capacity", network.queue_capacity as u64)
}

fn validate_storage(config: &ChannelConfig) -> Result<(), ContractError> {
    let storage = &config.storage;
    if storage.max_transmission_storage_capacity < MIN_STORAGE_CAPACITY {
        return Err(ContractError::config_validation(
            "storage.max_transmission_storage_capacity",
            format!(
                "must be at least {MIN_STORAGE_CAPACITY} bytes, got {}",
                storage.max_transmission_storage_capacity
            ),
        ));
    }
    if storage
        .directory
        .as_ref()
        .is_some_and(|dir| dir.as_os_str().is_empty())
    {
        return Err(ContractError::config_validation(
            "storage.directory",
            "directory cannot be empty",
        ));
    }
    positive("storage.queue_capacity", storage.queue_capacity as u64)?;
    positive("storage.max_send_attempts", storage.max_send_attempts as u64)
}

fn validate_policy(config: &ChannelConfig) -> Result<(), ContractError> {
    let policy = &config.policy;
    positive("policy.default_throttle_ms", policy.default_throttle_ms)?;
    positive("policy.quota_block_ms", policy.quota_block_ms)?;
    positive("policy.backoff_base_ms", policy.backoff_base_ms)?;
    if policy.backoff_base_ms > policy.backoff_max_ms {
        return Err(ContractError::config_validation(
            "policy.backoff_base_ms / policy.backoff_max_ms",
            format!(
                "backoff_base_ms ({}) must be <= backoff_max_ms ({})",
                policy.backoff_base_ms, policy.backoff_max_ms
            ),
        ));
    }
    positive("loader.idle_interval_ms", config.loader.idle_interval_ms)?;
    positive("loader.dispatch_interval_ms", config.loader.dispatch_interval_ms)
}

fn validate_workers(config: &ChannelConfig) -> Result<(), ContractError> {
    positive("transmitter.workers", config.transmitter.workers as u64)?;
    positive(
        "transmitter.max_pending_requests",
        config.transmitter.max_pending_requests as u64,
    )
}

fn positive(field: &str, value: u64) -> Result<(), ContractError> {
    if value == 0 {
        return Err(ContractError::config_validation(
            field,
            "must be greater than 0",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_rejected(config: &ChannelConfig, needle: &str) {
        let err = validate(config).unwrap_err().to_string();
        assert!(err.contains(needle), "got: {err}");
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&ChannelConfig::default()).is_ok());
    }

    #[test]
    fn test_batch_limit_bounds() {
        let mut config = ChannelConfig::default();
        config.buffer.max_telemetries_in_batch = 0;
        assert_rejected(&config, "buffer.max_telemetries_in_batch");

        config.buffer.max_telemetries_in_batch = 1001;
        assert_rejected(&config, "1..=1000");

        config.buffer.max_telemetries_in_batch = 1000;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_endpoint_must_be_http() {
        let mut config = ChannelConfig::default();
        config.network.endpoint_url = String::new();
        assert_rejected(&config, "cannot be empty");

        config.network.endpoint_url = "ftp://example.com/track".into();
        assert_rejected(&config, "http(s) URL");

        config.network.endpoint_url = "HTTP://localhost:8080/v2/track".into();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_instant_retries_limit() {
        let mut config = ChannelConfig::default();
        config.network.max_instant_retries = 10;
        assert_rejected(&config, "less than 10");

        config.network.max_instant_retries = 0;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_storage_capacity_minimum() {
        let mut config = ChannelConfig::default();
        config.storage.max_transmission_storage_capacity = 1023;
        assert_rejected(&config, "at least 1024 bytes");
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = ChannelConfig::default();
        config.loader.idle_interval_ms = 0;
        assert_rejected(&config, "loader.idle_interval_ms");
    }

    #[test]
    fn test_backoff_range() {
        let mut config = ChannelConfig::default();
        config.policy.backoff_base_ms = 10_000;
        config.policy.backoff_max_ms = 1_000;
        assert_rejected(&config, "backoff_base_ms");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = ChannelConfig::default();
        config.transmitter.workers = 0;
        assert_rejected(&config, "transmitter.workers");
    }
}
