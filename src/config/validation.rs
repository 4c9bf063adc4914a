//! Configuration validation.

use crate::config::Config;
use crate::orchestrator::Strategy;
use std::collections::HashSet;
use tracing::warn;

/// Validate the configuration.
///
/// Checks for:
/// - At least one pool, with unique non-empty names
/// - Unique backend addresses within each pool
/// - Routes that reference existing pools
/// - Sane adaptive settings (confidence range, known fallback, non-zero intervals)
///
/// Non-positive backend weights are normalized at runtime, so they only warn.
///
/// # Returns
///
/// `Ok(())` if valid, or every problem found joined into one message.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.pools.is_empty() {
        errors.push("at least one pool must be defined".to_string());
    }

    let mut pool_names = HashSet::new();
    for pool in &config.pools {
        if pool.name.is_empty() {
            errors.push("pool name cannot be empty".to_string());
        }

        if !pool_names.insert(pool.name.as_str()) {
            errors.push(format!("duplicate pool name: {}", pool.name));
        }

        let mut addresses = HashSet::new();
        for backend in &pool.backends {
            if backend.address.is_empty() {
                errors.push(format!("pool '{}' has a backend with an empty address", pool.name));
            }

            if !addresses.insert(backend.address.as_str()) {
                errors.push(format!(
                    "duplicate backend address {} in pool '{}'",
                    backend.address, pool.name
                ));
            }

            if backend.weight <= 0 {
                warn!(
                    pool = %pool.name,
                    backend = %backend.address,
                    weight = backend.weight,
                    "non-positive weight will be treated as 1"
                );
            }
        }
    }

    for route in &config.routes {
        if !pool_names.contains(route.pool.as_str()) {
            errors.push(format!(
                "route '{}{}' references non-existent pool '{}'",
                route.host, route.path_prefix, route.pool
            ));
        }
    }

    let adaptive = &config.adaptive;
    if !(0.0..=1.0).contains(&adaptive.min_confidence_level) {
        errors.push(format!(
            "min_confidence_level {} must be between 0 and 1",
            adaptive.min_confidence_level
        ));
    }

    if adaptive.fallback_algorithm.parse::<Strategy>().is_err() {
        errors.push(format!(
            "unknown fallback_algorithm '{}'",
            adaptive.fallback_algorithm
        ));
    }

    if adaptive.adaptation_interval.is_zero() {
        errors.push("adaptation_interval must be greater than zero".to_string());
    }

    if adaptive.metrics_interval.is_zero() {
        errors.push("metrics_interval must be greater than zero".to_string());
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
