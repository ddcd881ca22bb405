use crate::config::types::{
    Config, RetryConfig, SchedulerConfig, SourceConfig, SourceKind, StorageConfig,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_retry_config(&config.retry)?;
    validate_storage_config(&config.storage)?;
    validate_sources(config)?;
    Ok(())
}

/// Validates scheduler configuration
fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.cycle_delay_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "cycle-delay-secs must be >= 1, got {}",
            config.cycle_delay_secs
        )));
    }

    if config.fetch_cap < 1 {
        return Err(ConfigError::Validation(format!(
            "fetch-cap must be >= 1, got {}",
            config.fetch_cap
        )));
    }

    Ok(())
}

/// Validates retry configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.rate_limit_base_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "rate-limit-base-secs must be >= 1, got {}",
            config.rate_limit_base_secs
        )));
    }

    if config.rate_limit_cap_secs < config.rate_limit_base_secs {
        return Err(ConfigError::Validation(format!(
            "rate-limit-cap-secs ({}) must be >= rate-limit-base-secs ({})",
            config.rate_limit_cap_secs, config.rate_limit_base_secs
        )));
    }

    if config.transient_base_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "transient-base-secs must be >= 1, got {}",
            config.transient_base_secs
        )));
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.pool_size < 1 || config.pool_size > 100 {
        return Err(ConfigError::Validation(format!(
            "pool-size must be between 1 and 100, got {}",
            config.pool_size
        )));
    }

    Ok(())
}

/// Validates source entries and their adapter sections
fn validate_sources(config: &Config) -> Result<(), ConfigError> {
    if config.sources.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[source]] must be configured".to_string(),
        ));
    }

    let mut seen: HashSet<(&SourceKind, &str)> = HashSet::new();
    for source in &config.sources {
        validate_source(source)?;

        if !seen.insert((&source.kind, source.name.as_str())) {
            return Err(ConfigError::Validation(format!(
                "duplicate source '{}'",
                source.name
            )));
        }

        // Each source kind in use needs its adapter section
        match source.kind {
            SourceKind::Chan => {
                let chan = config.chan.as_ref().ok_or_else(|| {
                    ConfigError::Validation(format!(
                        "source '{}' requires a [chan] section",
                        source.name
                    ))
                })?;
                validate_endpoint(&chan.endpoint)?;
            }
            SourceKind::Reddit => {
                let reddit = config.reddit.as_ref().ok_or_else(|| {
                    ConfigError::Validation(format!(
                        "source '{}' requires a [reddit] section",
                        source.name
                    ))
                })?;
                validate_endpoint(&reddit.endpoint)?;
                validate_endpoint(&reddit.auth_endpoint)?;

                if reddit.client_id.is_empty() || reddit.client_secret.is_empty() {
                    return Err(ConfigError::Validation(
                        "reddit client-id and client-secret cannot be empty".to_string(),
                    ));
                }
            }
        }
    }

    Ok(())
}

/// Validates a single source entry
fn validate_source(source: &SourceConfig) -> Result<(), ConfigError> {
    if source.name.is_empty() {
        return Err(ConfigError::Validation(
            "source name cannot be empty".to_string(),
        ));
    }

    if !source
        .name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "source name must contain only alphanumeric characters, hyphens, and underscores, got '{}'",
            source.name
        )));
    }

    Ok(())
}

/// Validates an endpoint URL string
fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    let url = Url::parse(endpoint)
        .map_err(|e| ConfigError::InvalidEndpoint(format!("'{}': {}", endpoint, e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidEndpoint(format!(
            "'{}' must use http or https",
            endpoint
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{ChanConfig, DetectionStrategy};

    fn minimal_config() -> Config {
        Config {
            scheduler: SchedulerConfig {
                cycle_delay_secs: 120,
                fetch_cap: 200,
            },
            retry: RetryConfig::default(),
            storage: StorageConfig {
                database_path: "./boardwatch.db".to_string(),
                pool_size: 10,
            },
            chan: Some(ChanConfig {
                endpoint: "https://a.4cdn.org".to_string(),
            }),
            reddit: None,
            sources: vec![SourceConfig {
                name: "pol".to_string(),
                kind: SourceKind::Chan,
                strategy: DetectionStrategy::Snapshot,
            }],
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&minimal_config()).is_ok());
    }

    #[test]
    fn test_no_sources_rejected() {
        let mut config = minimal_config();
        config.sources.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_duplicate_source_rejected() {
        let mut config = minimal_config();
        config.sources.push(config.sources[0].clone());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_adapter_section_rejected() {
        let mut config = minimal_config();
        config.chan = None;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_endpoint_rejected() {
        let mut config = minimal_config();
        config.chan = Some(ChanConfig {
            endpoint: "not a url".to_string(),
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_cap_below_base_rejected() {
        let mut config = minimal_config();
        config.retry.rate_limit_cap_secs = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_pool_rejected() {
        let mut config = minimal_config();
        config.storage.pool_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_source_name_rejected() {
        let mut config = minimal_config();
        config.sources[0].name = "has spaces".to_string();
        assert!(validate(&config).is_err());
    }
}
