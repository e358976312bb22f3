use crate::config::types::{
    Config, IdentityConfig, JobConfig, RetryConfig, SiteCapabilities, TargetConfig,
    ThrottleConfig,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_job_config(&config.job)?;
    validate_throttle_config(&config.throttle)?;
    validate_retry_config(&config.retry)?;
    validate_identity_config(&config.identity)?;

    if config.output.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    validate_sites(&config.sites)?;
    validate_targets(&config.targets, config)?;
    Ok(())
}

fn validate_job_config(config: &JobConfig) -> Result<(), ConfigError> {
    if config.id.is_empty() {
        return Err(ConfigError::Validation("job id cannot be empty".to_string()));
    }

    // The id doubles as a file name
    if !config
        .id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "job id must contain only ASCII letters, digits, '-' and '_', got '{}'",
            config.id
        )));
    }

    if config.checkpoint_batch_size < 1 {
        return Err(ConfigError::Validation(
            "checkpoint_batch_size must be >= 1".to_string(),
        ));
    }

    if config.max_concurrent_targets < 1 || config.max_concurrent_targets > 64 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_targets must be between 1 and 64, got {}",
            config.max_concurrent_targets
        )));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation("max_pages must be >= 1".to_string()));
    }

    if config.fetch_timeout_secs < 1 || config.target_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "fetch and target timeouts must be at least one second".to_string(),
        ));
    }

    Ok(())
}

fn validate_throttle_config(config: &ThrottleConfig) -> Result<(), ConfigError> {
    if config.min_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "min_delay_ms ({}) must not exceed max_delay_ms ({})",
            config.min_delay_ms, config.max_delay_ms
        )));
    }

    if config.window_size < 1 {
        return Err(ConfigError::Validation(
            "window_size must be >= 1".to_string(),
        ));
    }

    let rates_ok = config.low_block_rate > 0.0
        && config.low_block_rate < config.high_block_rate
        && config.high_block_rate <= 1.0;
    if !rates_ok {
        return Err(ConfigError::Validation(format!(
            "block rate thresholds must satisfy 0 < low < high <= 1, got low={} high={}",
            config.low_block_rate, config.high_block_rate
        )));
    }

    if config.escalation_factor <= 1.0 {
        return Err(ConfigError::Validation(format!(
            "escalation_factor must be > 1.0, got {}",
            config.escalation_factor
        )));
    }

    if config.max_escalation < config.escalation_factor {
        return Err(ConfigError::Validation(format!(
            "max_escalation ({}) must be >= escalation_factor ({})",
            config.max_escalation, config.escalation_factor
        )));
    }

    if config.decay_step <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "decay_step must be positive, got {}",
            config.decay_step
        )));
    }

    if config.sustained_window < 1 || config.consecutive_block_cap < 1 {
        return Err(ConfigError::Validation(
            "sustained_window and consecutive_block_cap must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(
            "max_attempts must be >= 1".to_string(),
        ));
    }

    if config.base_backoff_ms > config.max_backoff_ms {
        return Err(ConfigError::Validation(format!(
            "base_backoff_ms ({}) must not exceed max_backoff_ms ({})",
            config.base_backoff_ms, config.max_backoff_ms
        )));
    }

    Ok(())
}

fn validate_identity_config(config: &IdentityConfig) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for profile in &config.profiles {
        if profile.name.is_empty() || profile.user_agent.is_empty() {
            return Err(ConfigError::Validation(
                "identity profiles need a name and a user-agent".to_string(),
            ));
        }

        if profile.viewport_width == 0 || profile.viewport_height == 0 {
            return Err(ConfigError::Validation(format!(
                "identity '{}' has an empty viewport",
                profile.name
            )));
        }

        if !names.insert(profile.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate identity profile '{}'",
                profile.name
            )));
        }
    }
    Ok(())
}

fn validate_sites(sites: &[SiteCapabilities]) -> Result<(), ConfigError> {
    let mut keys = HashSet::new();
    for site in sites {
        if site.key.is_empty() || site.store.is_empty() {
            return Err(ConfigError::Validation(
                "sites need a non-empty key and store".to_string(),
            ));
        }

        if !keys.insert(site.key.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate site key '{}'",
                site.key
            )));
        }

        if site.page_url.is_none() && site.endpoint_url.is_none() {
            return Err(ConfigError::Validation(format!(
                "site '{}' needs a page-url or an endpoint-url",
                site.key
            )));
        }

        for template in [&site.page_url, &site.endpoint_url].into_iter().flatten() {
            validate_template(site, template)?;
        }

        if site.rendering && site.page_url.is_none() {
            return Err(ConfigError::Validation(format!(
                "site '{}' enables rendering without a page-url",
                site.key
            )));
        }

        if site.endpoint_url.is_none() && !site.embedded_data && !site.rendering {
            return Err(ConfigError::Validation(format!(
                "site '{}' has a page-url but neither embedded-data nor rendering enabled",
                site.key
            )));
        }
    }
    Ok(())
}

/// Checks that a template carries a page placeholder and expands to a valid URL
fn validate_template(site: &SiteCapabilities, template: &str) -> Result<(), ConfigError> {
    if !template.contains("{page}") {
        return Err(ConfigError::InvalidTemplate(format!(
            "'{}' for site '{}' has no {{page}} placeholder",
            template, site.key
        )));
    }

    let expanded = site.expand(template, "sample", 0);
    let url = Url::parse(&expanded).map_err(|e| {
        ConfigError::InvalidTemplate(format!("'{}' for site '{}': {}", template, site.key, e))
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidTemplate(format!(
            "'{}' for site '{}' must use http or https",
            template, site.key
        )));
    }

    Ok(())
}

fn validate_targets(targets: &[TargetConfig], config: &Config) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for target in targets {
        if config.site(&target.site).is_none() {
            return Err(ConfigError::UnknownSite(target.site.clone()));
        }

        if target.query.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "target on site '{}' has an empty query",
                target.site
            )));
        }

        if target.max_pages == Some(0) {
            return Err(ConfigError::Validation(format!(
                "target '{}:{}' has max-pages = 0",
                target.site, target.query
            )));
        }

        if !seen.insert((target.site.as_str(), target.query.as_str())) {
            return Err(ConfigError::Validation(format!(
                "duplicate target '{}:{}'",
                target.site, target.query
            )));
        }
    }
    Ok(())
}
