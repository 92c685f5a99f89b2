/*!
 * Logging functionality for HueFlow.
 *
 * This module provides tracing setup and utilities for consistent logging
 * across the HueFlow crates.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the logging system with a specific filter
///
/// `RUST_LOG` takes precedence over `filter` when it is set.
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "hueflow_engine=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    init_with(filter, false)
}

/// Initialize the logging system from the logging section of the configuration
pub fn init_from_config(config: &LoggingConfig) -> Result<()> {
    init_with(&config.level, config.json_format)
}

fn init_with(filter: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a new span for a component
///
/// # Arguments
///
/// * `name` - The name of the component
/// * `id` - An optional ID for the component instance
pub fn component_span(name: &str, id: Option<&str>) -> Span {
    match id {
        Some(id) => tracing::info_span!("component", name = %name, id = %id),
        None => tracing::info_span!("component", name = %name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_fails_cleanly() {
        // Only one global subscriber may be installed per process
        let _ = init_with_filter("info");
        assert!(matches!(init_with_filter("info"), Err(Error::Runtime(_))));
    }

    #[test]
    fn test_component_span() {
        let span = component_span("bridge", Some("Living Room"));
        let _guard = span.enter();
        let span = component_span("pairing", None);
        let _guard = span.enter();
    }
}
